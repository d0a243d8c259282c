use anyhow::{bail, Result};
use clap::Parser;
use instvfs::backends::{MemoryVfs, OsVfs};
use instvfs::cli::{BackendKind, Cli, OutputFormat};
use instvfs::csv_output::{CsvEventOutput, CsvStatsOutput};
use instvfs::json_output::JsonOutput;
use instvfs::registry::VfsRegistry;
use instvfs::script::{Script, ScriptOutcome, ScriptRunner};
use instvfs::vfs::Vfs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn build_backend(cli: &Cli) -> Arc<dyn Vfs> {
    let name = cli.backend.as_str();
    match cli.backend {
        BackendKind::Memory => Arc::new(match cli.seed {
            Some(seed) => MemoryVfs::with_seed(name, seed),
            None => MemoryVfs::new(name),
        }),
        BackendKind::Os => {
            let root = cli.dir.clone().unwrap_or_else(|| PathBuf::from("."));
            Arc::new(OsVfs::with_root(name, root))
        }
    }
}

fn print_outcome(format: OutputFormat, outcome: &ScriptOutcome) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for event in &outcome.events {
                println!("{event}");
            }
            if !outcome.events.is_empty() && !outcome.reports.is_empty() {
                println!();
            }
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for report in &outcome.reports {
                report.write_summary(&mut out)?;
            }
        }
        OutputFormat::Json => {
            println!("{}", JsonOutput::from_outcome(outcome).to_json()?);
        }
        OutputFormat::Csv => {
            if !outcome.events.is_empty() {
                let mut events = CsvEventOutput::new(true);
                for event in &outcome.events {
                    events.add_event(event.clone());
                }
                print!("{}", events.to_csv());
            }
            let mut stats = CsvStatsOutput::new();
            for report in &outcome.reports {
                stats.add_report(report.clone());
            }
            print!("{}", stats.to_csv(true));
        }
    }

    for err in &outcome.errors {
        eprintln!("step {} ({}): {}", err.step, err.op, err.error);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if cli.script.is_none() && cli.page_size == 0 {
        bail!("--page-size must be greater than zero");
    }
    if cli.dir.is_some() && cli.backend != BackendKind::Os {
        bail!("--dir requires --backend os");
    }

    let registry = VfsRegistry::new();
    registry.register(build_backend(&cli), true)?;

    let script = match &cli.script {
        Some(path) => Script::load(path)?,
        None => Script::page_workload(
            cli.backend.as_str(),
            &cli.name,
            cli.pages,
            cli.page_size,
            cli.trace,
        )?,
    };

    let outcome = ScriptRunner::new(&registry)
        .with_clock(cli.clock)
        .run(&script)?;
    print_outcome(cli.format, &outcome)
}
