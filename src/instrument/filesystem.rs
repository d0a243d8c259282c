use super::file::InstFile;
use super::instance::InstVfs;
use crate::events::OperationKind;
use crate::vfs::{AccessMode, DlHandle, DlSymbol, OpenFlags, Vfs, VfsError, VfsFile, VfsResult};

impl Vfs for InstVfs {
    fn name(&self) -> &str {
        self.name_str()
    }

    fn max_pathname(&self) -> usize {
        self.parent().max_pathname()
    }

    fn open(&self, path: Option<&str>, flags: OpenFlags) -> VfsResult<(Box<dyn VfsFile>, OpenFlags)> {
        let owner = self.upgrade().ok_or(VfsError::Misuse)?;
        let (real, granted) = self.intercept_then(
            OperationKind::Open,
            path,
            flags.bits() as i32,
            0,
            || self.parent().open(path, flags),
            |outcome| {
                if outcome.is_ok() {
                    self.acquire_handle();
                }
            },
        )?;
        let file = InstFile::new(owner, path.map(str::to_string), real);
        Ok((Box::new(file), granted))
    }

    fn delete(&self, path: &str, sync_dir: bool) -> VfsResult<()> {
        self.intercept(
            OperationKind::Delete,
            Some(path),
            i32::from(sync_dir),
            0,
            || self.parent().delete(path, sync_dir),
        )
    }

    fn access(&self, path: &str, mode: AccessMode) -> VfsResult<bool> {
        self.intercept(OperationKind::Access, Some(path), mode.as_i32(), 0, || {
            self.parent().access(path, mode)
        })
    }

    fn temp_name(&self) -> VfsResult<String> {
        self.intercept(OperationKind::GetTempName, None, 0, 0, || {
            self.parent().temp_name()
        })
    }

    fn full_pathname(&self, path: &str) -> VfsResult<String> {
        self.intercept(OperationKind::FullPathname, Some(path), 0, 0, || {
            self.parent().full_pathname(path)
        })
    }

    // Dynamic-library calls go straight through: not timed, not counted.

    fn dl_open(&self, path: &str) -> Option<DlHandle> {
        self.parent().dl_open(path)
    }

    fn dl_error(&self) -> String {
        self.parent().dl_error()
    }

    fn dl_sym(&self, handle: DlHandle, symbol: &str) -> Option<DlSymbol> {
        self.parent().dl_sym(handle, symbol)
    }

    fn dl_close(&self, handle: DlHandle) {
        self.parent().dl_close(handle)
    }

    fn randomness(&self, buf: &mut [u8]) -> usize {
        let len = i32::try_from(buf.len()).unwrap_or(i32::MAX);
        self.intercept(OperationKind::Randomness, None, len, 0, || {
            self.parent().randomness(buf)
        })
    }

    fn sleep(&self, micros: i32) -> i32 {
        self.intercept(OperationKind::Sleep, None, micros, 0, || {
            self.parent().sleep(micros)
        })
    }

    fn current_time(&self) -> VfsResult<f64> {
        self.intercept(OperationKind::CurrentTime, None, 0, 0, || {
            self.parent().current_time()
        })
    }
}
