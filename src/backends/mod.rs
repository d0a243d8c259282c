//! Reference backends that can be registered and wrapped

mod lock;
mod memory;
mod os;

pub use memory::MemoryVfs;
pub use os::OsVfs;
