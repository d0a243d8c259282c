//! Backend over the host filesystem
//!
//! Relative paths resolve against a root directory. Locks are tracked per
//! canonical path inside this process only; two `OsVfs` values, or two
//! processes, do not see each other's locks.

use super::lock::LockTable;
use crate::vfs::{
    fcntl, julian_day_from_unix_millis, AccessMode, DeviceCharacteristics, LockLevel, OpenFlags,
    SyncFlags, Vfs, VfsError, VfsFile, VfsResult, DEFAULT_SECTOR_SIZE,
};
use rand::RngCore;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

type LockMap = Arc<Mutex<HashMap<PathBuf, Arc<Mutex<LockTable>>>>>;

fn map_io(err: io::Error) -> VfsError {
    match err.kind() {
        io::ErrorKind::NotFound => VfsError::NotFound,
        io::ErrorKind::PermissionDenied => VfsError::Perm,
        io::ErrorKind::OutOfMemory => VfsError::NoMem,
        _ => VfsError::Io,
    }
}

/// Backend using `std::fs`
#[derive(Debug)]
pub struct OsVfs {
    name: String,
    root: PathBuf,
    locks: LockMap,
}

impl OsVfs {
    /// Resolve relative paths against the current directory
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_root(name, PathBuf::from("."))
    }

    pub fn with_root(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            locks: Arc::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn lock_table(&self, path: &Path) -> Arc<Mutex<LockTable>> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key).or_default())
    }
}

impl Vfs for OsVfs {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, path: Option<&str>, flags: OpenFlags) -> VfsResult<(Box<dyn VfsFile>, OpenFlags)> {
        let (path, mut flags) = match path {
            Some(path) => (self.resolve(path), flags),
            None => (
                PathBuf::from(self.temp_name()?),
                flags | OpenFlags::CREATE | OpenFlags::DELETEONCLOSE,
            ),
        };

        let read_only = flags.contains(OpenFlags::READONLY);
        let mut options = OpenOptions::new();
        options.read(true).write(!read_only);
        if !read_only && flags.contains(OpenFlags::CREATE) {
            if flags.contains(OpenFlags::EXCLUSIVE) {
                options.create_new(true);
            } else {
                options.create(true);
            }
        }

        let file = match options.open(&path) {
            Ok(file) => file,
            // Fall back to read-only when write access is refused
            Err(e) if !read_only && e.kind() == io::ErrorKind::PermissionDenied => {
                flags.remove(OpenFlags::READWRITE);
                flags.insert(OpenFlags::READONLY);
                OpenOptions::new().read(true).open(&path).map_err(|_| VfsError::CantOpen)?
            }
            Err(e) => {
                debug!(vfs = %self.name, path = %path.display(), error = %e, "os open failed");
                return Err(VfsError::CantOpen);
            }
        };

        let locks = self.lock_table(&path);
        debug!(vfs = %self.name, path = %path.display(), flags = flags.bits(), "os open");
        let handle = OsFile {
            file,
            path,
            locks,
            level: LockLevel::None,
            read_only: flags.contains(OpenFlags::READONLY),
            delete_on_close: flags.contains(OpenFlags::DELETEONCLOSE),
            chunk_size: 0,
        };
        Ok((Box::new(handle), flags))
    }

    fn delete(&self, path: &str, sync_dir: bool) -> VfsResult<()> {
        let path = self.resolve(path);
        fs::remove_file(&path).map_err(map_io)?;
        if sync_dir {
            if let Some(dir) = path.parent() {
                // Not every platform can open a directory as a file
                if let Ok(dir) = File::open(dir) {
                    let _ = dir.sync_all();
                }
            }
        }
        Ok(())
    }

    fn access(&self, path: &str, mode: AccessMode) -> VfsResult<bool> {
        let metadata = match fs::metadata(self.resolve(path)) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(map_io(e)),
        };
        Ok(match mode {
            AccessMode::Exists | AccessMode::Read => true,
            AccessMode::ReadWrite => !metadata.permissions().readonly(),
        })
    }

    fn temp_name(&self) -> VfsResult<String> {
        let name = format!("etilqs_{:016x}", rand::thread_rng().next_u64());
        Ok(std::env::temp_dir().join(name).to_string_lossy().into_owned())
    }

    fn full_pathname(&self, path: &str) -> VfsResult<String> {
        let resolved = self.resolve(path);
        let full = if resolved.is_absolute() {
            resolved
        } else {
            std::env::current_dir().map_err(map_io)?.join(resolved)
        };
        let full = full.to_string_lossy().into_owned();
        if full.len() > self.max_pathname() {
            return Err(VfsError::CantOpen);
        }
        Ok(full)
    }

    fn randomness(&self, buf: &mut [u8]) -> usize {
        rand::thread_rng().fill_bytes(buf);
        buf.len()
    }

    fn sleep(&self, micros: i32) -> i32 {
        let micros = micros.max(0);
        std::thread::sleep(Duration::from_micros(micros as u64));
        micros
    }

    fn current_time(&self) -> VfsResult<f64> {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| VfsError::Io)?;
        let millis = i64::try_from(since_epoch.as_millis()).map_err(|_| VfsError::Io)?;
        Ok(julian_day_from_unix_millis(millis))
    }
}

#[derive(Debug)]
struct OsFile {
    file: File,
    path: PathBuf,
    locks: Arc<Mutex<LockTable>>,
    level: LockLevel,
    read_only: bool,
    delete_on_close: bool,
    chunk_size: u64,
}

impl OsFile {
    fn seek_to(&mut self, offset: i64) -> VfsResult<()> {
        let offset = u64::try_from(offset).map_err(|_| VfsError::Io)?;
        self.file.seek(SeekFrom::Start(offset)).map_err(map_io)?;
        Ok(())
    }

    fn writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::Perm)
        } else {
            Ok(())
        }
    }
}

impl VfsFile for OsFile {
    fn close(self: Box<Self>) -> VfsResult<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], offset: i64) -> VfsResult<()> {
        self.seek_to(offset)?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Err(VfsError::Io),
            }
        }
        if filled < buf.len() {
            buf[filled..].fill(0);
            return Err(VfsError::ShortRead);
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8], offset: i64) -> VfsResult<()> {
        self.writable()?;
        self.seek_to(offset)?;
        self.file.write_all(buf).map_err(|e| match e.kind() {
            io::ErrorKind::WriteZero => VfsError::Full,
            _ => map_io(e),
        })
    }

    fn truncate(&mut self, size: i64) -> VfsResult<()> {
        self.writable()?;
        let mut size = u64::try_from(size).map_err(|_| VfsError::Io)?;
        if self.chunk_size > 0 {
            size = size
                .div_ceil(self.chunk_size)
                .checked_mul(self.chunk_size)
                .ok_or(VfsError::Full)?;
        }
        self.file.set_len(size).map_err(map_io)
    }

    fn sync(&mut self, flags: SyncFlags) -> VfsResult<()> {
        let result = if flags.contains(SyncFlags::DATAONLY) {
            self.file.sync_data()
        } else {
            self.file.sync_all()
        };
        result.map_err(|_| VfsError::Io)
    }

    fn file_size(&self) -> VfsResult<i64> {
        let len = self.file.metadata().map_err(map_io)?.len();
        i64::try_from(len).map_err(|_| VfsError::Io)
    }

    fn lock(&mut self, level: LockLevel) -> VfsResult<()> {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        table.acquire(&mut self.level, level)
    }

    fn unlock(&mut self, level: LockLevel) -> VfsResult<()> {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        table.release(&mut self.level, level)
    }

    fn check_reserved_lock(&self) -> VfsResult<bool> {
        let table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(table.is_reserved())
    }

    fn file_control(&mut self, op: i32, arg: &mut i64) -> VfsResult<()> {
        match op {
            fcntl::LOCKSTATE => {
                *arg = i64::from(self.level.as_i32());
                Ok(())
            }
            fcntl::SIZE_HINT => {
                let hint = u64::try_from(*arg).map_err(|_| VfsError::Io)?;
                let len = self.file.metadata().map_err(map_io)?.len();
                if hint > len && !self.read_only {
                    self.file.set_len(hint).map_err(map_io)?;
                }
                Ok(())
            }
            fcntl::CHUNK_SIZE => {
                self.chunk_size = u64::try_from(*arg).unwrap_or(0);
                Ok(())
            }
            _ => Err(VfsError::NotFound),
        }
    }

    fn sector_size(&self) -> i32 {
        DEFAULT_SECTOR_SIZE
    }

    fn device_characteristics(&self) -> DeviceCharacteristics {
        DeviceCharacteristics::empty()
    }
}

impl Drop for OsFile {
    fn drop(&mut self) {
        {
            let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = table.release(&mut self.level, LockLevel::None);
        }
        if self.delete_on_close {
            if let Err(e) = fs::remove_file(&self.path) {
                debug!(path = %self.path.display(), error = %e, "delete-on-close failed");
            }
        }
    }
}
