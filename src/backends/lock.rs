//! Shared lock bookkeeping for one file
//!
//! Follows the storage engine's five-level protocol: any number of SHARED
//! holders, at most one RESERVED, and EXCLUSIVE only once every other SHARED
//! holder is gone. A handle at RESERVED or above owns the reserved slot; a
//! handle at PENDING or above owns the pending slot.

use crate::vfs::{LockLevel, VfsError, VfsResult};

#[derive(Debug, Default)]
pub(crate) struct LockTable {
    shared: usize,
    reserved: bool,
    pending: bool,
    exclusive: bool,
}

impl LockTable {
    /// Raise `held` towards `wanted`. On `Busy` the handle may be left at an
    /// intermediate level (PENDING while readers drain).
    pub(crate) fn acquire(&mut self, held: &mut LockLevel, wanted: LockLevel) -> VfsResult<()> {
        if *held >= wanted {
            return Ok(());
        }
        match wanted {
            LockLevel::None => Ok(()),
            LockLevel::Shared => {
                if self.pending || self.exclusive {
                    return Err(VfsError::Busy);
                }
                self.shared += 1;
                *held = LockLevel::Shared;
                Ok(())
            }
            LockLevel::Reserved => {
                if *held != LockLevel::Shared {
                    return Err(VfsError::Misuse);
                }
                if self.reserved {
                    return Err(VfsError::Busy);
                }
                self.reserved = true;
                *held = LockLevel::Reserved;
                Ok(())
            }
            LockLevel::Pending => Err(VfsError::Misuse),
            LockLevel::Exclusive => {
                if *held == LockLevel::None {
                    return Err(VfsError::Misuse);
                }
                if *held == LockLevel::Shared {
                    if self.reserved || self.pending {
                        return Err(VfsError::Busy);
                    }
                    self.reserved = true;
                    *held = LockLevel::Reserved;
                }
                if *held == LockLevel::Reserved {
                    if self.pending {
                        return Err(VfsError::Busy);
                    }
                    self.pending = true;
                    *held = LockLevel::Pending;
                }
                if self.shared > 1 {
                    return Err(VfsError::Busy);
                }
                self.exclusive = true;
                *held = LockLevel::Exclusive;
                Ok(())
            }
        }
    }

    /// Drop `held` down to `to`, which must be SHARED or NONE
    pub(crate) fn release(&mut self, held: &mut LockLevel, to: LockLevel) -> VfsResult<()> {
        if to > LockLevel::Shared {
            return Err(VfsError::Misuse);
        }
        if *held <= to {
            return Ok(());
        }
        if *held == LockLevel::Exclusive {
            self.exclusive = false;
        }
        if *held >= LockLevel::Pending {
            self.pending = false;
        }
        if *held >= LockLevel::Reserved {
            self.reserved = false;
        }
        if to == LockLevel::None {
            self.shared = self.shared.saturating_sub(1);
        }
        *held = to;
        Ok(())
    }

    /// Whether some handle holds RESERVED or stronger
    pub(crate) fn is_reserved(&self) -> bool {
        self.reserved
    }
}
