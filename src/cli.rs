//! CLI argument parsing for instvfs

use crate::clock::ClockSource;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for reports and event logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// CSV format for spreadsheet analysis
    Csv,
}

/// Backend the wrapper is stacked on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// In-process files
    Memory,
    /// Host filesystem under --dir
    Os,
}

impl BackendKind {
    /// Name the backend is registered under
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Os => "os",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "instvfs")]
#[command(version)]
#[command(about = "Time and count every file-system call a storage engine makes", long_about = None)]
pub struct Cli {
    /// TOML command script to run (default: built-in page workload)
    #[arg(value_name = "SCRIPT")]
    pub script: Option<PathBuf>,

    /// Backend registered as the default vfs
    #[arg(short = 'b', long = "backend", value_enum, default_value = "memory")]
    pub backend: BackendKind,

    /// Root directory for the os backend
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Seed for the memory backend's randomness
    #[arg(long = "seed", value_name = "SEED")]
    pub seed: Option<u64>,

    /// Name of the wrapper created by the built-in workload
    #[arg(short = 'n', long = "name", default_value = "instvfs")]
    pub name: String,

    /// Pages written and read back by the built-in workload
    #[arg(long = "pages", default_value_t = 16)]
    pub pages: usize,

    /// Page size in bytes for the built-in workload
    #[arg(long = "page-size", default_value_t = 4096)]
    pub page_size: usize,

    /// Record and print every intercepted call (built-in workload)
    #[arg(short = 'T', long = "trace")]
    pub trace: bool,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Tick source for wrappers that do not choose one
    #[arg(long = "clock", value_enum, default_value = "hardware")]
    pub clock: ClockSource,

    /// Enable debug logging to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
