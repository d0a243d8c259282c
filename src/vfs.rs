//! Storage-engine file-access interface
//!
//! Two roles make up the surface the engine talks to:
//!
//! - [`Vfs`]: filesystem-level operations (open, delete, access, path
//!   resolution, randomness, sleep, clock, dynamic-library loading)
//! - [`VfsFile`]: per-handle operations (read, write, truncate, sync, size,
//!   locking, file control, sector size, device characteristics)
//!
//! Backends implement both; instrumentation wrappers implement both again on
//! top of a delegate of the same shape.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Maximum pathname length assumed when a backend does not say otherwise
pub const DEFAULT_MAX_PATHNAME: usize = 512;

/// Default sector size reported by reference backends
pub const DEFAULT_SECTOR_SIZE: i32 = 512;

/// File-control opcodes understood by the reference backends
pub mod fcntl {
    /// Report the handle's current lock level in `arg`
    pub const LOCKSTATE: i32 = 1;
    /// Hint that the file will grow to `arg` bytes
    pub const SIZE_HINT: i32 = 5;
    /// Set the allocation chunk size to `arg` bytes
    pub const CHUNK_SIZE: i32 = 6;
}

/// Errors returned by backends. These pass through instrumentation untouched.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VfsError {
    #[error("disk I/O error")]
    Io,

    #[error("short read")]
    ShortRead,

    #[error("file is locked")]
    Busy,

    #[error("unable to open file")]
    CantOpen,

    #[error("not found")]
    NotFound,

    #[error("disk is full")]
    Full,

    #[error("access permission denied")]
    Perm,

    #[error("out of memory")]
    NoMem,

    #[error("interface used out of sequence")]
    Misuse,
}

impl VfsError {
    /// Numeric result code as the storage engine spells it
    pub fn code(self) -> i32 {
        match self {
            VfsError::Io => 10,
            VfsError::ShortRead => 10 | (2 << 8),
            VfsError::Busy => 5,
            VfsError::CantOpen => 14,
            VfsError::NotFound => 12,
            VfsError::Full => 13,
            VfsError::Perm => 3,
            VfsError::NoMem => 7,
            VfsError::Misuse => 21,
        }
    }
}

/// Result alias for backend operations
pub type VfsResult<T> = Result<T, VfsError>;

bitflags! {
    /// Flags passed to [`Vfs::open`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READONLY = 0x0000_0001;
        const READWRITE = 0x0000_0002;
        const CREATE = 0x0000_0004;
        const DELETEONCLOSE = 0x0000_0008;
        const EXCLUSIVE = 0x0000_0010;
        const MAIN_DB = 0x0000_0100;
        const TEMP_DB = 0x0000_0200;
        const TRANSIENT_DB = 0x0000_0400;
        const MAIN_JOURNAL = 0x0000_0800;
        const TEMP_JOURNAL = 0x0000_1000;
        const SUBJOURNAL = 0x0000_2000;
        const MASTER_JOURNAL = 0x0000_4000;
    }
}

bitflags! {
    /// Flags passed to [`VfsFile::sync`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncFlags: u32 {
        const NORMAL = 0x0000_0002;
        const FULL = 0x0000_0003;
        const DATAONLY = 0x0000_0010;
    }
}

bitflags! {
    /// Capabilities reported by [`VfsFile::device_characteristics`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceCharacteristics: u32 {
        const ATOMIC = 0x0000_0001;
        const ATOMIC512 = 0x0000_0002;
        const ATOMIC1K = 0x0000_0004;
        const ATOMIC2K = 0x0000_0008;
        const ATOMIC4K = 0x0000_0010;
        const ATOMIC8K = 0x0000_0020;
        const ATOMIC16K = 0x0000_0040;
        const ATOMIC32K = 0x0000_0080;
        const ATOMIC64K = 0x0000_0100;
        const SAFE_APPEND = 0x0000_0200;
        const SEQUENTIAL = 0x0000_0400;
    }
}

/// File lock levels, ordered from weakest to strongest
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum LockLevel {
    #[default]
    None = 0,
    Shared = 1,
    Reserved = 2,
    Pending = 3,
    Exclusive = 4,
}

impl LockLevel {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(LockLevel::None),
            1 => Some(LockLevel::Shared),
            2 => Some(LockLevel::Reserved),
            3 => Some(LockLevel::Pending),
            4 => Some(LockLevel::Exclusive),
            _ => None,
        }
    }
}

/// Question asked by [`Vfs::access`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum AccessMode {
    Exists = 0,
    ReadWrite = 1,
    Read = 2,
}

impl AccessMode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Opaque handle to a loaded dynamic library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DlHandle(pub usize);

/// Opaque address of a symbol resolved from a dynamic library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DlSymbol(pub usize);

/// Type-erasure hooks so a registered backend can be recognised by its
/// concrete type. Blanket-implemented for every eligible type.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Filesystem role
pub trait Vfs: AsAny {
    /// Registry name of this backend
    fn name(&self) -> &str;

    /// Longest pathname this backend accepts
    fn max_pathname(&self) -> usize {
        DEFAULT_MAX_PATHNAME
    }

    /// Open `path` (or an anonymous temporary file when `None`).
    /// Returns the handle and the flags actually granted.
    fn open(&self, path: Option<&str>, flags: OpenFlags) -> VfsResult<(Box<dyn VfsFile>, OpenFlags)>;

    /// Remove a file, optionally syncing its directory
    fn delete(&self, path: &str, sync_dir: bool) -> VfsResult<()>;

    /// Test for existence or permissions
    fn access(&self, path: &str, mode: AccessMode) -> VfsResult<bool>;

    /// Produce a name suitable for a temporary file
    fn temp_name(&self) -> VfsResult<String>;

    /// Canonicalise a pathname
    fn full_pathname(&self, path: &str) -> VfsResult<String>;

    fn dl_open(&self, _path: &str) -> Option<DlHandle> {
        None
    }

    fn dl_error(&self) -> String {
        String::from("dynamic loading not supported")
    }

    fn dl_sym(&self, _handle: DlHandle, _symbol: &str) -> Option<DlSymbol> {
        None
    }

    fn dl_close(&self, _handle: DlHandle) {}

    /// Fill `buf` with random bytes; returns how many were written
    fn randomness(&self, buf: &mut [u8]) -> usize;

    /// Sleep for roughly `micros` microseconds; returns the time actually slept
    fn sleep(&self, micros: i32) -> i32;

    /// Current time as a Julian day number
    fn current_time(&self) -> VfsResult<f64>;
}

/// File-handle role
pub trait VfsFile: Send {
    /// Release the handle and everything it holds
    fn close(self: Box<Self>) -> VfsResult<()>;

    /// Fill `buf` from `offset`. A read past end of file zero-fills the
    /// remainder and returns [`VfsError::ShortRead`].
    fn read(&mut self, buf: &mut [u8], offset: i64) -> VfsResult<()>;

    fn write(&mut self, buf: &[u8], offset: i64) -> VfsResult<()>;

    fn truncate(&mut self, size: i64) -> VfsResult<()>;

    fn sync(&mut self, flags: SyncFlags) -> VfsResult<()>;

    fn file_size(&self) -> VfsResult<i64>;

    fn lock(&mut self, level: LockLevel) -> VfsResult<()>;

    fn unlock(&mut self, level: LockLevel) -> VfsResult<()>;

    /// Whether any handle holds a RESERVED or stronger lock on the file
    fn check_reserved_lock(&self) -> VfsResult<bool>;

    /// Backend-specific control; unknown opcodes return [`VfsError::NotFound`]
    fn file_control(&mut self, op: i32, arg: &mut i64) -> VfsResult<()>;

    fn sector_size(&self) -> i32;

    fn device_characteristics(&self) -> DeviceCharacteristics;
}

impl fmt::Debug for dyn Vfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vfs").field("name", &self.name()).finish()
    }
}

impl fmt::Debug for dyn VfsFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VfsFile").finish_non_exhaustive()
    }
}

/// Convert a Unix timestamp in milliseconds to a Julian day number
pub fn julian_day_from_unix_millis(millis: i64) -> f64 {
    2_440_587.5 + millis as f64 / 86_400_000.0
}
