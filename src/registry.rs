//! Named registry of VFS backends
//!
//! Backends and instrumentation wrappers share one namespace, which is what
//! lets a wrapper sit on top of another wrapper. The registry is an ordinary
//! value: build one, pass it to whoever needs to resolve names.
//!
//! Ordering follows the storage engine's convention: the first entry is the
//! default backend. Registering with `make_default` moves the new entry to the
//! front; otherwise it is appended.

use crate::error::{InstError, Result};
use crate::vfs::Vfs;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Shared name → backend table
#[derive(Debug, Default)]
pub struct VfsRegistry {
    entries: RwLock<Vec<Arc<dyn Vfs>>>,
}

impl VfsRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own name. Fails without side effects when
    /// the name is empty or already taken.
    pub fn register(&self, vfs: Arc<dyn Vfs>, make_default: bool) -> Result<()> {
        let name = vfs.name().to_string();
        if name.is_empty() {
            return Err(InstError::EmptyName);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|entry| entry.name() == name) {
            return Err(InstError::DuplicateName(name));
        }
        if make_default {
            entries.insert(0, vfs);
        } else {
            entries.push(vfs);
        }
        debug!(vfs = %name, make_default, total = entries.len(), "registered vfs");
        Ok(())
    }

    /// Look up a backend by name, or the default backend when `name` is `None`
    pub fn find(&self, name: Option<&str>) -> Option<Arc<dyn Vfs>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match name {
            Some(name) => entries.iter().find(|entry| entry.name() == name).cloned(),
            None => entries.first().cloned(),
        }
    }

    /// Resolve a parent for a new wrapper, mapping absence to a configuration error
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn Vfs>> {
        self.find(name).ok_or_else(|| match name {
            Some(name) => InstError::UnknownVfs(name.to_string()),
            None => InstError::NoDefaultVfs,
        })
    }

    /// The current default backend
    pub fn default_vfs(&self) -> Option<Arc<dyn Vfs>> {
        self.find(None)
    }

    /// Move an already-registered backend to the default slot
    pub fn set_default(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let position = entries
            .iter()
            .position(|entry| entry.name() == name)
            .ok_or_else(|| InstError::UnknownVfs(name.to_string()))?;
        let entry = entries.remove(position);
        entries.insert(0, entry);
        debug!(vfs = %name, "default vfs changed");
        Ok(())
    }

    /// Remove a backend by name, returning it if it was present
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Vfs>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let position = entries.iter().position(|entry| entry.name() == name)?;
        let removed = entries.remove(position);
        debug!(vfs = %name, remaining = entries.len(), "unregistered vfs");
        Some(removed)
    }

    /// Remove `vfs` only if that exact object is what is registered under its name
    pub fn unregister_exact(&self, vfs: &Arc<dyn Vfs>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(position) = entries.iter().position(|entry| Arc::ptr_eq(entry, vfs)) else {
            return false;
        };
        entries.remove(position);
        debug!(vfs = %vfs.name(), remaining = entries.len(), "unregistered vfs");
        true
    }

    /// Registered names, default first
    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|entry| entry.name().to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(Some(name)).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
