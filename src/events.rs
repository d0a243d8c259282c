//! Operation catalog for instrumented VFS calls
//!
//! Every intercepted method has a fixed numeric id (1..=N) and a display name
//! (`"xRead"`, `"xOpen"`, ...). Ids follow the wrapped engine's numbering:
//! file-handle methods first, filesystem methods after. Reporting walks the ids
//! upward from 1 and stops at the first id without a name, so the table must
//! stay dense.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One kind of intercepted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationKind {
    Close = 1,
    Read = 2,
    Write = 3,
    Truncate = 4,
    Sync = 5,
    FileSize = 6,
    Lock = 7,
    Unlock = 8,
    CheckReservedLock = 9,
    FileControl = 10,
    SectorSize = 11,
    DeviceCharacteristics = 12,
    Open = 13,
    Delete = 14,
    Access = 15,
    GetTempName = 16,
    FullPathname = 17,
    Randomness = 18,
    Sleep = 19,
    CurrentTime = 20,
}

impl OperationKind {
    /// Number of operation kinds in the catalog
    pub const COUNT: usize = 20;

    /// All kinds in ascending id order
    pub const ALL: [OperationKind; Self::COUNT] = [
        OperationKind::Close,
        OperationKind::Read,
        OperationKind::Write,
        OperationKind::Truncate,
        OperationKind::Sync,
        OperationKind::FileSize,
        OperationKind::Lock,
        OperationKind::Unlock,
        OperationKind::CheckReservedLock,
        OperationKind::FileControl,
        OperationKind::SectorSize,
        OperationKind::DeviceCharacteristics,
        OperationKind::Open,
        OperationKind::Delete,
        OperationKind::Access,
        OperationKind::GetTempName,
        OperationKind::FullPathname,
        OperationKind::Randomness,
        OperationKind::Sleep,
        OperationKind::CurrentTime,
    ];

    /// Resolve a numeric id; `None` outside 1..=COUNT
    pub fn from_id(id: i32) -> Option<Self> {
        if id < 1 {
            return None;
        }
        Self::ALL.get(id as usize - 1).copied()
    }

    /// Numeric id (1-based)
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Zero-based slot used by counter arrays
    pub(crate) fn index(self) -> usize {
        self as usize - 1
    }

    /// Display name used in reports and event records
    pub fn name(self) -> &'static str {
        match self {
            OperationKind::Close => "xClose",
            OperationKind::Read => "xRead",
            OperationKind::Write => "xWrite",
            OperationKind::Truncate => "xTruncate",
            OperationKind::Sync => "xSync",
            OperationKind::FileSize => "xFilesize",
            OperationKind::Lock => "xLock",
            OperationKind::Unlock => "xUnlock",
            OperationKind::CheckReservedLock => "xCheckReservedLock",
            OperationKind::FileControl => "xFileControl",
            OperationKind::SectorSize => "xSectorSize",
            OperationKind::DeviceCharacteristics => "xDeviceCharacteristics",
            OperationKind::Open => "xOpen",
            OperationKind::Delete => "xDelete",
            OperationKind::Access => "xAccess",
            OperationKind::GetTempName => "xGetTempName",
            OperationKind::FullPathname => "xFullPathname",
            OperationKind::Randomness => "xRandomness",
            OperationKind::Sleep => "xSleep",
            OperationKind::CurrentTime => "xCurrentTime",
        }
    }

    /// Reverse lookup by display name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// True for methods of the file-handle role
    pub fn is_file_operation(self) -> bool {
        self.id() <= OperationKind::DeviceCharacteristics.id()
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name for a numeric id, or `None` when the id is outside the catalog
pub fn operation_name(id: i32) -> Option<&'static str> {
    OperationKind::from_id(id).map(OperationKind::name)
}

/// Walk the catalog from id 1 upward, stopping at the first unnamed id
pub fn catalog() -> impl Iterator<Item = OperationKind> {
    (1..).map_while(OperationKind::from_id)
}
