//! Instrumenting VFS wrapper
//!
//! [`InstVfs`] sits between a storage engine and a registered backend. Every
//! filesystem call and every call on a file it opened is timed, counted per
//! [`crate::events::OperationKind`] and reported to an optional
//! [`crate::callback::EventHandler`]. Results from the backend are returned
//! unchanged.
//!
//! Lifecycle mirrors the driver commands: `create`, `configure`, `reset`,
//! `report`, `destroy`.
//!
//! Counters are updated under the instance's state lock; the handler is
//! called after that lock is released, so a handler may call `report`,
//! `reset` or `configure` on the instance that invoked it. A handler that does
//! I/O through that same instance is notified of its own calls and must stop
//! the recursion itself.

mod file;
mod filesystem;
mod instance;

pub use file::InstFile;
pub use instance::{InstConfig, InstVfs};
