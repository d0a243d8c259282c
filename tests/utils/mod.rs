// Integration test utilities
//
// A stub backend that records every call it receives and answers with canned
// values, so wrapped and unwrapped behaviour can be compared call for call.

#![allow(dead_code)]

use instvfs::vfs::{
    AccessMode, DeviceCharacteristics, LockLevel, OpenFlags, SyncFlags, Vfs, VfsError, VfsFile,
    VfsResult,
};
use std::sync::{Arc, Mutex};

/// Byte every successful stub read fills the buffer with
pub const STUB_FILL: u8 = 0xAB;

/// Shared call log
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Backend returning fixed answers, optionally failing every fallible call
#[derive(Debug)]
pub struct StubVfs {
    name: String,
    log: CallLog,
    fail: Option<VfsError>,
}

impl StubVfs {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::default(),
            fail: None,
        }
    }

    pub fn failing(name: &str, error: VfsError) -> Self {
        Self {
            fail: Some(error),
            ..Self::new(name)
        }
    }

    pub fn log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn outcome<T>(&self, value: T) -> VfsResult<T> {
        match self.fail {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }
}

impl Vfs for StubVfs {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, path: Option<&str>, flags: OpenFlags) -> VfsResult<(Box<dyn VfsFile>, OpenFlags)> {
        self.record(format!("open {:?} {:#x}", path, flags.bits()));
        let file: Box<dyn VfsFile> = Box::new(StubFile {
            log: self.log(),
            fail: self.fail,
        });
        self.outcome((file, flags))
    }

    fn delete(&self, path: &str, sync_dir: bool) -> VfsResult<()> {
        self.record(format!("delete {path} {sync_dir}"));
        self.outcome(())
    }

    fn access(&self, path: &str, mode: AccessMode) -> VfsResult<bool> {
        self.record(format!("access {path} {}", mode.as_i32()));
        self.outcome(true)
    }

    fn temp_name(&self) -> VfsResult<String> {
        self.record("temp_name".to_string());
        self.outcome("/tmp/stub".to_string())
    }

    fn full_pathname(&self, path: &str) -> VfsResult<String> {
        self.record(format!("full_pathname {path}"));
        self.outcome(format!("/stub/{path}"))
    }

    fn randomness(&self, buf: &mut [u8]) -> usize {
        self.record(format!("randomness {}", buf.len()));
        buf.fill(7);
        buf.len()
    }

    fn sleep(&self, micros: i32) -> i32 {
        self.record(format!("sleep {micros}"));
        micros
    }

    fn current_time(&self) -> VfsResult<f64> {
        self.record("current_time".to_string());
        self.outcome(2_440_587.5)
    }
}

/// Handle produced by [`StubVfs`]
#[derive(Debug)]
pub struct StubFile {
    log: CallLog,
    fail: Option<VfsError>,
}

impl StubFile {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn outcome<T>(&self, value: T) -> VfsResult<T> {
        match self.fail {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }
}

impl VfsFile for StubFile {
    fn close(self: Box<Self>) -> VfsResult<()> {
        self.record("close".to_string());
        self.outcome(())
    }

    fn read(&mut self, buf: &mut [u8], offset: i64) -> VfsResult<()> {
        self.record(format!("read {} {offset}", buf.len()));
        buf.fill(STUB_FILL);
        self.outcome(())
    }

    fn write(&mut self, buf: &[u8], offset: i64) -> VfsResult<()> {
        self.record(format!("write {} {offset}", buf.len()));
        self.outcome(())
    }

    fn truncate(&mut self, size: i64) -> VfsResult<()> {
        self.record(format!("truncate {size}"));
        self.outcome(())
    }

    fn sync(&mut self, flags: SyncFlags) -> VfsResult<()> {
        self.record(format!("sync {:#x}", flags.bits()));
        self.outcome(())
    }

    fn file_size(&self) -> VfsResult<i64> {
        self.record("file_size".to_string());
        self.outcome(8192)
    }

    fn lock(&mut self, level: LockLevel) -> VfsResult<()> {
        self.record(format!("lock {}", level.as_i32()));
        self.outcome(())
    }

    fn unlock(&mut self, level: LockLevel) -> VfsResult<()> {
        self.record(format!("unlock {}", level.as_i32()));
        self.outcome(())
    }

    fn check_reserved_lock(&self) -> VfsResult<bool> {
        self.record("check_reserved_lock".to_string());
        self.outcome(false)
    }

    fn file_control(&mut self, op: i32, arg: &mut i64) -> VfsResult<()> {
        self.record(format!("file_control {op} {arg}"));
        *arg += 1;
        self.outcome(())
    }

    fn sector_size(&self) -> i32 {
        self.record("sector_size".to_string());
        4096
    }

    fn device_characteristics(&self) -> DeviceCharacteristics {
        self.record("device_characteristics".to_string());
        DeviceCharacteristics::ATOMIC | DeviceCharacteristics::SAFE_APPEND
    }
}

/// Flags most tests open database files with
pub fn rw_create() -> OpenFlags {
    OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_DB
}
