#![no_main]

use instvfs::backends::MemoryVfs;
use instvfs::clock::ClockSource;
use instvfs::registry::VfsRegistry;
use instvfs::script::{Command, Script, ScriptRunner};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

const MAX_LEN: usize = 1 << 20;

fn cheap(command: &Command) -> bool {
    match command {
        Command::Sleep { .. } => false,
        Command::Read { len, .. } => *len <= MAX_LEN,
        Command::Write { len, offset, .. } => *len <= MAX_LEN && *offset <= MAX_LEN as i64,
        Command::Truncate { size, .. } => *size <= MAX_LEN as i64,
        Command::FileControl { arg, .. } => *arg <= MAX_LEN as i64,
        Command::Randomness { bytes, .. } => *bytes <= MAX_LEN,
        _ => true,
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    // Parsing must not panic, and neither may running whatever parsed
    let Ok(script) = Script::from_toml(input) else {
        return;
    };
    if script.commands.len() > 64 || !script.commands.iter().all(cheap) {
        return;
    }
    let registry = VfsRegistry::new();
    if registry
        .register(Arc::new(MemoryVfs::with_seed("memory", 0)), true)
        .is_err()
    {
        return;
    }
    let _ = ScriptRunner::new(&registry)
        .with_clock(ClockSource::Disabled)
        .run(&script);
});
