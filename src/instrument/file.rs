use super::instance::{InstVfs, Outcome};
use crate::events::OperationKind;
use crate::vfs::{DeviceCharacteristics, LockLevel, SyncFlags, VfsError, VfsFile, VfsResult};
use std::fmt;
use std::sync::Arc;

/// A file opened through an [`InstVfs`]
///
/// Owns the delegate's handle and keeps its wrapper alive; the wrapper refuses
/// `destroy` until every `InstFile` is closed or dropped.
pub struct InstFile {
    owner: Arc<InstVfs>,
    name: Option<String>,
    real: Option<Box<dyn VfsFile>>,
}

impl InstFile {
    pub(crate) fn new(owner: Arc<InstVfs>, name: Option<String>, real: Box<dyn VfsFile>) -> Self {
        Self {
            owner,
            name,
            real: Some(real),
        }
    }

    /// Name the file was opened with, `None` for anonymous temporaries
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn owner(&self) -> &Arc<InstVfs> {
        &self.owner
    }

    fn timed<R: Outcome>(
        &mut self,
        kind: OperationKind,
        int_arg: i32,
        int64_arg: i64,
        call: impl FnOnce(&mut dyn VfsFile) -> R,
    ) -> R {
        let Some(real) = self.real.as_deref_mut() else {
            return R::misuse();
        };
        self.owner
            .intercept(kind, self.name.as_deref(), int_arg, int64_arg, || call(real))
    }

    fn timed_ref<R: Outcome>(&self, kind: OperationKind, call: impl FnOnce(&dyn VfsFile) -> R) -> R {
        let Some(real) = self.real.as_deref() else {
            return R::misuse();
        };
        self.owner
            .intercept(kind, self.name.as_deref(), 0, 0, || call(real))
    }
}

fn buf_len(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

impl VfsFile for InstFile {
    fn close(mut self: Box<Self>) -> VfsResult<()> {
        let Some(real) = self.real.take() else {
            return Err(VfsError::Misuse);
        };
        self.owner
            .intercept(OperationKind::Close, self.name.as_deref(), 0, 0, || real.close())
    }

    fn read(&mut self, buf: &mut [u8], offset: i64) -> VfsResult<()> {
        let len = buf_len(buf.len());
        self.timed(OperationKind::Read, len, offset, |real| real.read(buf, offset))
    }

    fn write(&mut self, buf: &[u8], offset: i64) -> VfsResult<()> {
        let len = buf_len(buf.len());
        self.timed(OperationKind::Write, len, offset, |real| real.write(buf, offset))
    }

    fn truncate(&mut self, size: i64) -> VfsResult<()> {
        self.timed(OperationKind::Truncate, 0, size, |real| real.truncate(size))
    }

    fn sync(&mut self, flags: SyncFlags) -> VfsResult<()> {
        self.timed(OperationKind::Sync, flags.bits() as i32, 0, |real| {
            real.sync(flags)
        })
    }

    fn file_size(&self) -> VfsResult<i64> {
        self.timed_ref(OperationKind::FileSize, |real| real.file_size())
    }

    fn lock(&mut self, level: LockLevel) -> VfsResult<()> {
        self.timed(OperationKind::Lock, level.as_i32(), 0, |real| real.lock(level))
    }

    fn unlock(&mut self, level: LockLevel) -> VfsResult<()> {
        self.timed(OperationKind::Unlock, level.as_i32(), 0, |real| {
            real.unlock(level)
        })
    }

    fn check_reserved_lock(&self) -> VfsResult<bool> {
        self.timed_ref(OperationKind::CheckReservedLock, |real| {
            real.check_reserved_lock()
        })
    }

    fn file_control(&mut self, op: i32, arg: &mut i64) -> VfsResult<()> {
        self.timed(OperationKind::FileControl, 0, 0, |real| {
            real.file_control(op, arg)
        })
    }

    fn sector_size(&self) -> i32 {
        self.timed_ref(OperationKind::SectorSize, |real| real.sector_size())
    }

    fn device_characteristics(&self) -> DeviceCharacteristics {
        self.timed_ref(OperationKind::DeviceCharacteristics, |real| {
            real.device_characteristics()
        })
    }
}

impl Drop for InstFile {
    fn drop(&mut self) {
        self.owner.release_handle();
    }
}

impl fmt::Debug for InstFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstFile")
            .field("vfs", &self.owner.name_str())
            .field("name", &self.name)
            .field("open", &self.real.is_some())
            .finish()
    }
}
