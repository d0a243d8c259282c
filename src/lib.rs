//! instvfs - instrumenting wrapper for a storage engine's file-access layer
//!
//! An [`instrument::InstVfs`] wraps any registered [`vfs::Vfs`] backend,
//! times and counts every filesystem and file-handle call per operation kind,
//! and hands each call to an optional [`callback::EventHandler`] before
//! returning the backend's result unchanged.

pub mod backends;
pub mod callback;
pub mod cli;
pub mod clock;
pub mod csv_output;
pub mod error;
pub mod events;
pub mod instrument;
pub mod json_output;
pub mod registry;
pub mod script;
pub mod stats;
pub mod vfs;

pub use callback::{ClientCallback, EventHandler, EventRecord};
pub use error::{InstError, Result};
pub use events::OperationKind;
pub use instrument::{InstConfig, InstFile, InstVfs};
pub use registry::VfsRegistry;
pub use vfs::{Vfs, VfsError, VfsFile};
