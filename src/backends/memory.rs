//! In-process backend
//!
//! Files live in a shared map of byte vectors. Deleting a file only removes
//! its name: handles that already have it open keep reading and writing the
//! same bytes until they close, as on a POSIX filesystem.

use super::lock::LockTable;
use crate::vfs::{
    fcntl, julian_day_from_unix_millis, AccessMode, DeviceCharacteristics, LockLevel, OpenFlags,
    SyncFlags, Vfs, VfsError, VfsFile, VfsResult, DEFAULT_SECTOR_SIZE,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryNode {
    data: RwLock<Vec<u8>>,
    locks: Mutex<LockTable>,
}

type FileMap = Arc<Mutex<HashMap<String, Arc<MemoryNode>>>>;

/// Backend keeping every file in memory
#[derive(Debug)]
pub struct MemoryVfs {
    name: String,
    files: FileMap,
    rng: Mutex<StdRng>,
    sector_size: i32,
}

impl MemoryVfs {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_rng(name, StdRng::from_entropy())
    }

    /// Deterministic randomness and temporary names
    pub fn with_seed(name: impl Into<String>, seed: u64) -> Self {
        Self::from_rng(name, StdRng::seed_from_u64(seed))
    }

    fn from_rng(name: impl Into<String>, rng: StdRng) -> Self {
        Self {
            name: name.into(),
            files: Arc::default(),
            rng: Mutex::new(rng),
            sector_size: DEFAULT_SECTOR_SIZE,
        }
    }

    pub fn with_sector_size(mut self, sector_size: i32) -> Self {
        self.sector_size = sector_size;
        self
    }

    /// Names of every file currently present, sorted
    pub fn file_names(&self) -> Vec<String> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = files.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of a file's contents
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files
            .get(path)
            .map(|node| node.data.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn next_random(&self) -> u64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_u64()
    }
}

impl Vfs for MemoryVfs {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, path: Option<&str>, flags: OpenFlags) -> VfsResult<(Box<dyn VfsFile>, OpenFlags)> {
        let (path, flags) = match path {
            Some(path) => (path.to_string(), flags),
            None => (
                self.temp_name()?,
                flags | OpenFlags::CREATE | OpenFlags::DELETEONCLOSE,
            ),
        };

        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let node = match files.get(&path).cloned() {
            Some(_) if flags.contains(OpenFlags::EXCLUSIVE | OpenFlags::CREATE) => {
                return Err(VfsError::CantOpen);
            }
            Some(node) => node,
            None if flags.contains(OpenFlags::CREATE) => {
                let node = Arc::new(MemoryNode::default());
                files.insert(path.clone(), Arc::clone(&node));
                node
            }
            None => return Err(VfsError::CantOpen),
        };
        drop(files);

        debug!(vfs = %self.name, path = %path, flags = flags.bits(), "memory open");
        let file = MemoryFile {
            node,
            files: Arc::clone(&self.files),
            path,
            level: LockLevel::None,
            read_only: flags.contains(OpenFlags::READONLY),
            delete_on_close: flags.contains(OpenFlags::DELETEONCLOSE),
            chunk_size: 0,
            sector_size: self.sector_size,
        };
        Ok((Box::new(file), flags))
    }

    fn delete(&self, path: &str, _sync_dir: bool) -> VfsResult<()> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.remove(path).map(|_| ()).ok_or(VfsError::NotFound)
    }

    fn access(&self, path: &str, _mode: AccessMode) -> VfsResult<bool> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(files.contains_key(path))
    }

    fn temp_name(&self) -> VfsResult<String> {
        Ok(format!("/tmp/etilqs_{:016x}", self.next_random()))
    }

    fn full_pathname(&self, path: &str) -> VfsResult<String> {
        let full = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        if full.len() > self.max_pathname() {
            return Err(VfsError::CantOpen);
        }
        Ok(full)
    }

    fn randomness(&self, buf: &mut [u8]) -> usize {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(buf);
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
struct MemoryFile {
    node: Arc<MemoryNode>,
    files: FileMap,
    path: String,
    level: LockLevel,
    read_only: bool,
    delete_on_close: bool,
    chunk_size: i64,
    sector_size: i32,
}

impl MemoryFile {
    fn offset(offset: i64) -> VfsResult<usize> {
        usize::try_from(offset).map_err(|_| VfsError::Io)
    }

    fn writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::Perm)
        } else {
            Ok(())
        }
    }
}

impl VfsFile for MemoryFile {
    fn close(self: Box<Self>) -> VfsResult<()> {
        // Lock release and delete-on-close happen in Drop
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], offset: i64) -> VfsResult<()> {
        let start = Self::offset(offset)?;
        let data = self.node.data.read().unwrap_or_else(PoisonError::into_inner);
        let available = data.len().saturating_sub(start).min(buf.len());
        if available > 0 {
            buf[..available].copy_from_slice(&data[start..start + available]);
        }
        if available < buf.len() {
            buf[available..].fill(0);
            return Err(VfsError::ShortRead);
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8], offset: i64) -> VfsResult<()> {
        self.writable()?;
        let start = Self::offset(offset)?;
        let end = start.checked_add(buf.len()).ok_or(VfsError::Full)?;
        let mut data = self.node.data.write().unwrap_or_else(PoisonError::into_inner);
        if data.len() < end {
            let grow = end - data.len();
            data.try_reserve(grow).map_err(|_| VfsError::NoMem)?;
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn truncate(&mut self, size: i64) -> VfsResult<()> {
        self.writable()?;
        let mut size = Self::offset(size)?;
        if let Ok(chunk) = usize::try_from(self.chunk_size) {
            if chunk > 0 {
                size = size.div_ceil(chunk).checked_mul(chunk).ok_or(VfsError::Full)?;
            }
        }
        let mut data = self.node.data.write().unwrap_or_else(PoisonError::into_inner);
        if data.len() < size {
            let grow = size - data.len();
            data.try_reserve(grow).map_err(|_| VfsError::NoMem)?;
        }
        data.resize(size, 0);
        Ok(())
    }

    fn sync(&mut self, _flags: SyncFlags) -> VfsResult<()> {
        Ok(())
    }

    fn file_size(&self) -> VfsResult<i64> {
        let data = self.node.data.read().unwrap_or_else(PoisonError::into_inner);
        i64::try_from(data.len()).map_err(|_| VfsError::Io)
    }

    fn lock(&mut self, level: LockLevel) -> VfsResult<()> {
        let mut table = self.node.locks.lock().unwrap_or_else(PoisonError::into_inner);
        table.acquire(&mut self.level, level)
    }

    fn unlock(&mut self, level: LockLevel) -> VfsResult<()> {
        let mut table = self.node.locks.lock().unwrap_or_else(PoisonError::into_inner);
        table.release(&mut self.level, level)
    }

    fn check_reserved_lock(&self) -> VfsResult<bool> {
        let table = self.node.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(table.is_reserved())
    }

    fn file_control(&mut self, op: i32, arg: &mut i64) -> VfsResult<()> {
        match op {
            fcntl::LOCKSTATE => {
                *arg = i64::from(self.level.as_i32());
                Ok(())
            }
            fcntl::SIZE_HINT => {
                let hint = Self::offset(*arg)?;
                let mut data = self.node.data.write().unwrap_or_else(PoisonError::into_inner);
                let extra = hint.saturating_sub(data.len());
                data.try_reserve(extra).map_err(|_| VfsError::NoMem)
            }
            fcntl::CHUNK_SIZE => {
                self.chunk_size = (*arg).max(0);
                Ok(())
            }
            _ => Err(VfsError::NotFound),
        }
    }

    fn sector_size(&self) -> i32 {
        self.sector_size
    }

    fn device_characteristics(&self) -> DeviceCharacteristics {
        DeviceCharacteristics::SAFE_APPEND | DeviceCharacteristics::SEQUENTIAL
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        {
            let mut table = self.node.locks.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = table.release(&mut self.level, LockLevel::None);
        }
        if self.delete_on_close {
            let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
            if files
                .get(&self.path)
                .is_some_and(|node| Arc::ptr_eq(node, &self.node))
            {
                files.remove(&self.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw_create() -> OpenFlags {
        OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_DB
    }

    #[test]
    fn test_write_then_read() {
        let vfs = MemoryVfs::new("mem");
        let (mut file, _) = vfs.open(Some("a.db"), rw_create()).unwrap();
        file.write(b"hello", 10).unwrap();

        let mut buf = [0xffu8; 5];
        file.read(&mut buf, 10).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(file.file_size().unwrap(), 15);
        file.close().unwrap();
        assert_eq!(vfs.contents("a.db").unwrap()[10..], *b"hello");
    }

    #[test]
    fn test_short_read_zero_fills() {
        let vfs = MemoryVfs::new("mem");
        let (mut file, _) = vfs.open(Some("a.db"), rw_create()).unwrap();
        file.write(b"abc", 0).unwrap();

        let mut buf = [0xffu8; 6];
        assert_eq!(file.read(&mut buf, 1), Err(VfsError::ShortRead));
        assert_eq!(buf, [b'b', b'c', 0, 0, 0, 0]);
    }

    #[test]
    fn test_open_missing_without_create() {
        let vfs = MemoryVfs::new("mem");
        assert_eq!(
            vfs.open(Some("nope"), OpenFlags::READWRITE).unwrap_err(),
            VfsError::CantOpen
        );
    }

    #[test]
    fn test_exclusive_create_fails_when_present() {
        let vfs = MemoryVfs::new("mem");
        vfs.open(Some("a"), rw_create()).unwrap().0.close().unwrap();
        let flags = rw_create() | OpenFlags::EXCLUSIVE;
        assert_eq!(vfs.open(Some("a"), flags).unwrap_err(), VfsError::CantOpen);
    }

    #[test]
    fn test_delete_on_close_and_temp_files() {
        let vfs = MemoryVfs::with_seed("mem", 7);
        let (file, granted) = vfs.open(None, OpenFlags::READWRITE).unwrap();
        assert!(granted.contains(OpenFlags::DELETEONCLOSE));
        assert_eq!(vfs.file_names().len(), 1);
        file.close().unwrap();
        assert!(vfs.file_names().is_empty());
    }

    #[test]
    fn test_delete_and_access() {
        let vfs = MemoryVfs::new("mem");
        vfs.open(Some("a"), rw_create()).unwrap().0.close().unwrap();
        assert!(vfs.access("a", AccessMode::Exists).unwrap());
        vfs.delete("a", false).unwrap();
        assert!(!vfs.access("a", AccessMode::Exists).unwrap());
        assert_eq!(vfs.delete("a", false), Err(VfsError::NotFound));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let vfs = MemoryVfs::new("mem");
        vfs.open(Some("a"), rw_create()).unwrap().0.close().unwrap();
        let (mut file, _) = vfs.open(Some("a"), OpenFlags::READONLY).unwrap();
        assert_eq!(file.write(b"x", 0), Err(VfsError::Perm));
        assert_eq!(file.truncate(0), Err(VfsError::Perm));
    }

    #[test]
    fn test_truncate_rounds_to_chunk_size() {
        let vfs = MemoryVfs::new("mem");
        let (mut file, _) = vfs.open(Some("a"), rw_create()).unwrap();
        let mut chunk = 1024;
        file.file_control(fcntl::CHUNK_SIZE, &mut chunk).unwrap();
        file.truncate(1500).unwrap();
        assert_eq!(file.file_size().unwrap(), 2048);
    }

    #[test]
    fn test_huge_truncate_fails_cleanly() {
        let vfs = MemoryVfs::new("mem");
        let (mut file, _) = vfs.open(Some("a"), rw_create()).unwrap();
        assert_eq!(file.truncate(i64::MAX), Err(VfsError::NoMem));

        let mut chunk = 1i64 << 62;
        file.file_control(fcntl::CHUNK_SIZE, &mut chunk).unwrap();
        assert_eq!(file.truncate(i64::MAX), Err(VfsError::NoMem));
        assert_eq!(file.file_size().unwrap(), 0);
    }

    #[test]
    fn test_locks_are_shared_between_handles() {
        let vfs = MemoryVfs::new("mem");
        let (mut a, _) = vfs.open(Some("db"), rw_create()).unwrap();
        let (mut b, _) = vfs.open(Some("db"), rw_create()).unwrap();

        a.lock(LockLevel::Shared).unwrap();
        a.lock(LockLevel::Reserved).unwrap();
        assert!(b.check_reserved_lock().unwrap());

        b.lock(LockLevel::Shared).unwrap();
        assert_eq!(b.lock(LockLevel::Reserved), Err(VfsError::Busy));

        let mut state = 0;
        a.file_control(fcntl::LOCKSTATE, &mut state).unwrap();
        assert_eq!(state, LockLevel::Reserved.as_i32() as i64);

        // Dropping a handle releases its locks
        drop(a);
        assert!(!b.check_reserved_lock().unwrap());
        b.lock(LockLevel::Reserved).unwrap();
    }

    #[test]
    fn test_unknown_file_control() {
        let vfs = MemoryVfs::new("mem");
        let (mut file, _) = vfs.open(Some("a"), rw_create()).unwrap();
        let mut arg = 0;
        assert_eq!(file.file_control(999, &mut arg), Err(VfsError::NotFound));
    }

    #[test]
    fn test_seeded_randomness_is_reproducible() {
        let a = MemoryVfs::with_seed("a", 42);
        let b = MemoryVfs::with_seed("b", 42);
        let (mut x, mut y) = ([0u8; 16], [0u8; 16]);
        assert_eq!(a.randomness(&mut x), 16);
        b.randomness(&mut y);
        assert_eq!(x, y);
        assert_eq!(a.temp_name().unwrap(), b.temp_name().unwrap());
    }

    #[test]
    fn test_full_pathname() {
        let vfs = MemoryVfs::new("mem");
        assert_eq!(vfs.full_pathname("x.db").unwrap(), "/x.db");
        assert_eq!(vfs.full_pathname("/y.db").unwrap(), "/y.db");
        let long = "a".repeat(1000);
        assert_eq!(vfs.full_pathname(&long), Err(VfsError::CantOpen));
    }

    #[test]
    fn test_current_time_is_after_2020() {
        let vfs = MemoryVfs::new("mem");
        // 2020-01-01 is Julian day 2458849.5
        assert!(vfs.current_time().unwrap() > 2_458_849.5);
    }
}
