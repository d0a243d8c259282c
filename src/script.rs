//! Command scripts for driving wrappers and backends
//!
//! A script is a TOML document holding an array of `[[command]]` tables, each
//! tagged by `op`:
//!
//! ```toml
//! [[command]]
//! op = "create"
//! name = "inst"
//! parent = "mem"
//!
//! [[command]]
//! op = "open"
//! vfs = "inst"
//! file = "db"
//! path = "test.db"
//!
//! [[command]]
//! op = "write"
//! file = "db"
//! offset = 0
//! len = 4096
//!
//! [[command]]
//! op = "report"
//! name = "inst"
//! ```
//!
//! Lifecycle commands (`create`, `configure`, `reset`, `report`, `destroy`)
//! stop the script on failure. Errors returned by a backend are recorded and
//! the script carries on, since passing those through is what is being
//! measured.

use crate::callback::{EventRecord, OwnedEvent};
use crate::clock::ClockSource;
use crate::instrument::{InstConfig, InstVfs};
use crate::registry::VfsRegistry;
use crate::stats::Report;
use crate::vfs::{AccessMode, LockLevel, OpenFlags, SyncFlags, Vfs, VfsError, VfsFile, VfsResult};
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

const DEFAULT_OPEN_FLAGS: &str = "READWRITE | CREATE | MAIN_DB";

fn default_open_flags() -> String {
    DEFAULT_OPEN_FLAGS.to_string()
}

fn default_sync_flags() -> String {
    "NORMAL".to_string()
}

fn default_access_mode() -> AccessMode {
    AccessMode::Exists
}

/// One scripted step
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Create {
        name: String,
        parent: Option<String>,
        #[serde(default)]
        default: bool,
        clock: Option<ClockSource>,
    },
    /// `trace = true` records every event; `false` removes the handler
    Configure {
        name: String,
        #[serde(default)]
        trace: bool,
    },
    Reset {
        name: String,
    },
    Report {
        name: String,
    },
    Destroy {
        name: String,
    },
    Open {
        vfs: Option<String>,
        file: String,
        path: Option<String>,
        #[serde(default = "default_open_flags")]
        flags: String,
    },
    Close {
        file: String,
    },
    Read {
        file: String,
        offset: i64,
        len: usize,
    },
    Write {
        file: String,
        offset: i64,
        len: usize,
        #[serde(default)]
        fill: u8,
    },
    Truncate {
        file: String,
        size: i64,
    },
    Sync {
        file: String,
        #[serde(default = "default_sync_flags")]
        flags: String,
    },
    FileSize {
        file: String,
    },
    Lock {
        file: String,
        level: LockLevel,
    },
    Unlock {
        file: String,
        level: LockLevel,
    },
    CheckReservedLock {
        file: String,
    },
    FileControl {
        file: String,
        code: i32,
        #[serde(default)]
        arg: i64,
    },
    SectorSize {
        file: String,
    },
    DeviceCharacteristics {
        file: String,
    },
    Delete {
        vfs: Option<String>,
        path: String,
        #[serde(default)]
        sync_dir: bool,
    },
    Access {
        vfs: Option<String>,
        path: String,
        #[serde(default = "default_access_mode")]
        mode: AccessMode,
    },
    TempName {
        vfs: Option<String>,
    },
    FullPathname {
        vfs: Option<String>,
        path: String,
    },
    Randomness {
        vfs: Option<String>,
        bytes: usize,
    },
    Sleep {
        vfs: Option<String>,
        micros: i32,
    },
    CurrentTime {
        vfs: Option<String>,
    },
}

impl Command {
    /// The `op` tag this command is written with
    pub fn op_name(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Configure { .. } => "configure",
            Command::Reset { .. } => "reset",
            Command::Report { .. } => "report",
            Command::Destroy { .. } => "destroy",
            Command::Open { .. } => "open",
            Command::Close { .. } => "close",
            Command::Read { .. } => "read",
            Command::Write { .. } => "write",
            Command::Truncate { .. } => "truncate",
            Command::Sync { .. } => "sync",
            Command::FileSize { .. } => "file_size",
            Command::Lock { .. } => "lock",
            Command::Unlock { .. } => "unlock",
            Command::CheckReservedLock { .. } => "check_reserved_lock",
            Command::FileControl { .. } => "file_control",
            Command::SectorSize { .. } => "sector_size",
            Command::DeviceCharacteristics { .. } => "device_characteristics",
            Command::Delete { .. } => "delete",
            Command::Access { .. } => "access",
            Command::TempName { .. } => "temp_name",
            Command::FullPathname { .. } => "full_pathname",
            Command::Randomness { .. } => "randomness",
            Command::Sleep { .. } => "sleep",
            Command::CurrentTime { .. } => "current_time",
        }
    }
}

/// A parsed command script
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Script {
    #[serde(rename = "command", default)]
    pub commands: Vec<Command>,
}

impl Script {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse command script")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read command script: {}", path.as_ref().display())
        })?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid command script: {}", path.as_ref().display()))
    }

    /// Wrap `backend` as `name`, then write and read back `pages` pages of a
    /// database file under the usual lock sequence, report and tear down.
    pub fn page_workload(
        backend: &str,
        name: &str,
        pages: usize,
        page_size: usize,
        trace: bool,
    ) -> Result<Self> {
        let file = || "db".to_string();
        let vfs = || Some(name.to_string());
        let path = "test.db".to_string();
        let offsets = (0..pages)
            .map(|page| {
                page.checked_mul(page_size)
                    .and_then(|offset| i64::try_from(offset).ok())
                    .ok_or_else(|| {
                        anyhow!("{pages} pages of {page_size} bytes overflow the file offset range")
                    })
            })
            .collect::<Result<Vec<i64>>>()?;
        let mut commands = vec![Command::Create {
            name: name.to_string(),
            parent: Some(backend.to_string()),
            default: false,
            clock: None,
        }];
        if trace {
            commands.push(Command::Configure {
                name: name.to_string(),
                trace: true,
            });
        }
        commands.push(Command::Open {
            vfs: vfs(),
            file: file(),
            path: Some(path.clone()),
            flags: default_open_flags(),
        });
        for level in [LockLevel::Shared, LockLevel::Reserved, LockLevel::Exclusive] {
            commands.push(Command::Lock { file: file(), level });
        }
        for (page, &offset) in offsets.iter().enumerate() {
            commands.push(Command::Write {
                file: file(),
                offset,
                len: page_size,
                fill: page as u8,
            });
        }
        commands.push(Command::Sync {
            file: file(),
            flags: default_sync_flags(),
        });
        commands.push(Command::FileSize { file: file() });
        commands.push(Command::Unlock {
            file: file(),
            level: LockLevel::Shared,
        });
        for &offset in &offsets {
            commands.push(Command::Read {
                file: file(),
                offset,
                len: page_size,
            });
        }
        commands.push(Command::Unlock {
            file: file(),
            level: LockLevel::None,
        });
        commands.push(Command::CheckReservedLock { file: file() });
        commands.push(Command::Close { file: file() });
        commands.push(Command::Access {
            vfs: vfs(),
            path: path.clone(),
            mode: AccessMode::Exists,
        });
        commands.push(Command::Delete {
            vfs: vfs(),
            path,
            sync_dir: false,
        });
        commands.push(Command::Report {
            name: name.to_string(),
        });
        commands.push(Command::Destroy {
            name: name.to_string(),
        });
        Ok(Self { commands })
    }
}

/// A backend error observed while running a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepError {
    /// 1-based step number
    pub step: usize,
    pub op: &'static str,
    pub error: VfsError,
}

/// Everything a script run produced
#[derive(Debug, Default)]
pub struct ScriptOutcome {
    pub reports: Vec<Report>,
    pub events: Vec<OwnedEvent>,
    pub errors: Vec<StepError>,
}

/// Executes scripts against a registry
pub struct ScriptRunner<'r> {
    registry: &'r VfsRegistry,
    clock: ClockSource,
    files: HashMap<String, Box<dyn VfsFile>>,
    events: Arc<Mutex<Vec<OwnedEvent>>>,
    outcome: ScriptOutcome,
}

impl<'r> ScriptRunner<'r> {
    pub fn new(registry: &'r VfsRegistry) -> Self {
        Self {
            registry,
            clock: ClockSource::default(),
            files: HashMap::new(),
            events: Arc::default(),
            outcome: ScriptOutcome::default(),
        }
    }

    /// Clock used by `create` commands that do not name one
    pub fn with_clock(mut self, clock: ClockSource) -> Self {
        self.clock = clock;
        self
    }

    pub fn run(mut self, script: &Script) -> Result<ScriptOutcome> {
        for (index, command) in script.commands.iter().enumerate() {
            let step = index + 1;
            debug!(step, op = command.op_name(), "script step");
            self.step(step, command)
                .with_context(|| format!("step {step} ({}) failed", command.op_name()))?;
        }

        for (label, file) in self.files.drain() {
            warn!(file = %label, "file left open at end of script");
            drop(file);
        }
        let events = std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner));
        self.outcome.events = events;
        Ok(self.outcome)
    }

    fn step(&mut self, step: usize, command: &Command) -> Result<()> {
        let op = command.op_name();
        match command {
            Command::Create {
                name,
                parent,
                default,
                clock,
            } => {
                let config = InstConfig {
                    clock: clock.unwrap_or(self.clock),
                    make_default: *default,
                };
                InstVfs::create_with(self.registry, name, parent.as_deref(), config)?;
            }
            Command::Configure { name, trace } => {
                let inst = InstVfs::find(self.registry, name)?;
                if *trace {
                    let sink = Arc::clone(&self.events);
                    let handler = move |event: &EventRecord<'_>| -> anyhow::Result<()> {
                        sink.lock()
                            .map_err(|_| anyhow!("event log poisoned"))?
                            .push(event.to_owned_event());
                        Ok(())
                    };
                    inst.configure(Some(Box::new(handler)))?;
                } else {
                    inst.configure(None)?;
                }
            }
            Command::Reset { name } => InstVfs::find(self.registry, name)?.reset()?,
            Command::Report { name } => {
                let report = InstVfs::find(self.registry, name)?.report()?;
                self.outcome.reports.push(report);
            }
            Command::Destroy { name } => InstVfs::find(self.registry, name)?.destroy(self.registry)?,
            Command::Open {
                vfs,
                file,
                path,
                flags,
            } => {
                if self.files.contains_key(file) {
                    bail!("file label already in use: {file}");
                }
                let flags: OpenFlags = bitflags::parser::from_str(flags)
                    .map_err(|e| anyhow!("invalid open flags {flags:?}: {e}"))?;
                let vfs = self.vfs(vfs.as_deref())?;
                if let Some((handle, _)) = self.note(step, op, vfs.open(path.as_deref(), flags)) {
                    self.files.insert(file.clone(), handle);
                }
            }
            Command::Close { file } => {
                let handle = self
                    .files
                    .remove(file)
                    .ok_or_else(|| anyhow!("no open file labelled {file}"))?;
                self.note(step, op, handle.close());
            }
            Command::Read { file, offset, len } => {
                let mut buf = vec![0u8; *len];
                let result = self.file(file)?.read(&mut buf, *offset);
                self.note(step, op, result);
            }
            Command::Write {
                file,
                offset,
                len,
                fill,
            } => {
                let buf = vec![*fill; *len];
                let result = self.file(file)?.write(&buf, *offset);
                self.note(step, op, result);
            }
            Command::Truncate { file, size } => {
                let result = self.file(file)?.truncate(*size);
                self.note(step, op, result);
            }
            Command::Sync { file, flags } => {
                let flags: SyncFlags = bitflags::parser::from_str(flags)
                    .map_err(|e| anyhow!("invalid sync flags {flags:?}: {e}"))?;
                let result = self.file(file)?.sync(flags);
                self.note(step, op, result);
            }
            Command::FileSize { file } => {
                let result = self.file(file)?.file_size();
                self.note(step, op, result);
            }
            Command::Lock { file, level } => {
                let result = self.file(file)?.lock(*level);
                self.note(step, op, result);
            }
            Command::Unlock { file, level } => {
                let result = self.file(file)?.unlock(*level);
                self.note(step, op, result);
            }
            Command::CheckReservedLock { file } => {
                let result = self.file(file)?.check_reserved_lock();
                self.note(step, op, result);
            }
            Command::FileControl { file, code, arg } => {
                let mut arg = *arg;
                let result = self.file(file)?.file_control(*code, &mut arg);
                self.note(step, op, result);
            }
            Command::SectorSize { file } => {
                self.file(file)?.sector_size();
            }
            Command::DeviceCharacteristics { file } => {
                self.file(file)?.device_characteristics();
            }
            Command::Delete {
                vfs,
                path,
                sync_dir,
            } => {
                let result = self.vfs(vfs.as_deref())?.delete(path, *sync_dir);
                self.note(step, op, result);
            }
            Command::Access { vfs, path, mode } => {
                let result = self.vfs(vfs.as_deref())?.access(path, *mode);
                self.note(step, op, result);
            }
            Command::TempName { vfs } => {
                let result = self.vfs(vfs.as_deref())?.temp_name();
                self.note(step, op, result);
            }
            Command::FullPathname { vfs, path } => {
                let result = self.vfs(vfs.as_deref())?.full_pathname(path);
                self.note(step, op, result);
            }
            Command::Randomness { vfs, bytes } => {
                let mut buf = vec![0u8; *bytes];
                self.vfs(vfs.as_deref())?.randomness(&mut buf);
            }
            Command::Sleep { vfs, micros } => {
                self.vfs(vfs.as_deref())?.sleep(*micros);
            }
            Command::CurrentTime { vfs } => {
                let result = self.vfs(vfs.as_deref())?.current_time();
                self.note(step, op, result);
            }
        }
        Ok(())
    }

    fn vfs(&self, name: Option<&str>) -> Result<Arc<dyn Vfs>> {
        Ok(self.registry.resolve(name)?)
    }

    fn file(&mut self, label: &str) -> Result<&mut Box<dyn VfsFile>> {
        self.files
            .get_mut(label)
            .ok_or_else(|| anyhow!("no open file labelled {label}"))
    }

    /// Keep the value of a successful backend call, record a failed one
    fn note<T>(&mut self, step: usize, op: &'static str, result: VfsResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(step, op, %error, "backend returned an error");
                self.outcome.errors.push(StepError { step, op, error });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryVfs;
    use crate::events::OperationKind;

    fn registry() -> VfsRegistry {
        let registry = VfsRegistry::new();
        registry
            .register(Arc::new(MemoryVfs::with_seed("mem", 9)), false)
            .unwrap();
        registry
    }

    #[test]
    fn test_parse_script() {
        let script = Script::from_toml(
            r#"
            [[command]]
            op = "create"
            name = "inst"
            parent = "mem"
            default = true

            [[command]]
            op = "lock"
            file = "db"
            level = "reserved"

            [[command]]
            op = "access"
            path = "x"
            mode = "read_write"
            "#,
        )
        .unwrap();

        assert_eq!(script.commands.len(), 3);
        assert_eq!(
            script.commands[0],
            Command::Create {
                name: "inst".into(),
                parent: Some("mem".into()),
                default: true,
                clock: None,
            }
        );
        assert_eq!(
            script.commands[1],
            Command::Lock {
                file: "db".into(),
                level: LockLevel::Reserved,
            }
        );
        assert_eq!(script.commands[2].op_name(), "access");
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let err = Script::from_toml("[[command]]\nop = \"format_disk\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse command script"));
    }

    #[test]
    fn test_empty_script() {
        assert!(Script::from_toml("").unwrap().commands.is_empty());
    }

    #[test]
    fn test_page_workload_rejects_offset_overflow() {
        let err = Script::page_workload("mem", "inst", 3, usize::MAX / 2, false).unwrap_err();
        assert!(err.to_string().contains("overflow the file offset range"));
        assert!(Script::page_workload("mem", "inst", 2, usize::MAX, false).is_err());
        assert!(Script::page_workload("mem", "inst", 1, usize::MAX, false).is_ok());
    }

    #[test]
    fn test_page_workload_runs() {
        let registry = registry();
        let script = Script::page_workload("mem", "inst", 4, 1024, true).unwrap();
        let outcome = ScriptRunner::new(&registry)
            .with_clock(ClockSource::Monotonic)
            .run(&script)
            .unwrap();

        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        let report = &outcome.reports[0];
        assert_eq!(report.entry(OperationKind::Write).unwrap().calls, 4);
        assert_eq!(report.entry(OperationKind::Read).unwrap().calls, 4);
        assert_eq!(report.entry(OperationKind::Lock).unwrap().calls, 3);
        assert_eq!(report.entry(OperationKind::Open).unwrap().calls, 1);
        assert_eq!(report.entry(OperationKind::Close).unwrap().calls, 1);

        // Every counted call produced exactly one event
        assert_eq!(outcome.events.len() as u64, report.totals().total_calls);
        assert!(!registry.contains("inst"));
    }

    #[test]
    fn test_backend_errors_are_recorded() {
        let registry = registry();
        let script = Script::from_toml(
            r#"
            [[command]]
            op = "create"
            name = "inst"

            [[command]]
            op = "open"
            vfs = "inst"
            file = "db"
            path = "missing.db"
            flags = "READWRITE"

            [[command]]
            op = "report"
            name = "inst"
            "#,
        )
        .unwrap();

        let outcome = ScriptRunner::new(&registry).run(&script).unwrap();
        assert_eq!(
            outcome.errors,
            vec![StepError {
                step: 2,
                op: "open",
                error: VfsError::CantOpen,
            }]
        );
        let open = outcome.reports[0].entry(OperationKind::Open).unwrap();
        assert_eq!((open.calls, open.errors), (1, 1));
    }

    #[test]
    fn test_lifecycle_errors_stop_the_script() {
        let registry = registry();
        let script = Script::from_toml(
            r#"
            [[command]]
            op = "report"
            name = "mem"
            "#,
        )
        .unwrap();

        let err = ScriptRunner::new(&registry).run(&script).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("step 1 (report) failed"));
        assert!(message.contains("no such vfs: mem"));
    }

    #[test]
    fn test_unknown_file_label() {
        let registry = registry();
        let script = Script {
            commands: vec![Command::FileSize { file: "nope".into() }],
        };
        let err = ScriptRunner::new(&registry).run(&script).unwrap_err();
        assert!(format!("{err:#}").contains("no open file labelled nope"));
    }

    #[test]
    fn test_invalid_flags() {
        let registry = registry();
        let script = Script {
            commands: vec![Command::Open {
                vfs: None,
                file: "db".into(),
                path: Some("a".into()),
                flags: "READWRITE | BOGUS".into(),
            }],
        };
        let err = ScriptRunner::new(&registry).run(&script).unwrap_err();
        assert!(format!("{err:#}").contains("invalid open flags"));
    }
}
