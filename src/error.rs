//! Errors raised by the instrumentation layer itself
//!
//! Backend failures are [`crate::vfs::VfsError`] and never show up here: they
//! travel back to the caller of the intercepted operation unchanged.

use thiserror::Error;

/// Broad class of an [`InstError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad names: unknown parent, duplicate registration, empty name
    Configuration,
    /// Storage for the wrapper could not be reserved
    Allocation,
    /// The handle is not a live wrapper produced by this crate
    Misuse,
}

/// Errors for wrapper lifecycle and registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstError {
    #[error("no such vfs: {0}")]
    UnknownVfs(String),

    #[error("no default vfs is registered")]
    NoDefaultVfs,

    #[error("vfs name already registered: {0}")]
    DuplicateName(String),

    #[error("vfs name must not be empty")]
    EmptyName,

    #[error("failed to allocate wrapper storage for {0}")]
    AllocationFailure(String),

    #[error("no such vfs: {0}")]
    NotInstrumented(String),

    #[error("instrumented vfs {0} has been destroyed")]
    Destroyed(String),

    #[error("cannot destroy {name}: {live_handles} file handle(s) still open")]
    HandlesOpen { name: String, live_handles: usize },
}

impl InstError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            InstError::UnknownVfs(_)
            | InstError::NoDefaultVfs
            | InstError::DuplicateName(_)
            | InstError::EmptyName => ErrorCategory::Configuration,
            InstError::AllocationFailure(_) => ErrorCategory::Allocation,
            InstError::NotInstrumented(_)
            | InstError::Destroyed(_)
            | InstError::HandlesOpen { .. } => ErrorCategory::Misuse,
        }
    }

    pub fn is_misuse(&self) -> bool {
        self.category() == ErrorCategory::Misuse
    }
}

pub type Result<T> = std::result::Result<T, InstError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            InstError::UnknownVfs("x".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            InstError::DuplicateName("x".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            InstError::AllocationFailure("x".into()).category(),
            ErrorCategory::Allocation
        );
        assert!(InstError::Destroyed("x".into()).is_misuse());
        assert!(InstError::NotInstrumented("x".into()).is_misuse());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            InstError::UnknownVfs("nope".into()).to_string(),
            "no such vfs: nope"
        );
        let err = InstError::HandlesOpen {
            name: "inst".into(),
            live_handles: 2,
        };
        assert_eq!(
            err.to_string(),
            "cannot destroy inst: 2 file handle(s) still open"
        );
    }
}
