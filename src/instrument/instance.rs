use crate::callback::{CallbackFault, EventHandler, EventRecord};
use crate::clock::ClockSource;
use crate::error::{InstError, Result};
use crate::events::{self, OperationKind};
use crate::registry::VfsRegistry;
use crate::stats::{OperationCounters, OperationStat, Report};
use crate::vfs::{AsAny, DeviceCharacteristics, Vfs, VfsError, VfsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{debug, trace, warn};

/// Options for [`InstVfs::create_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstConfig {
    pub clock: ClockSource,
    /// Make the new wrapper the registry's default backend
    pub make_default: bool,
}

struct InstState {
    handler: Option<Arc<dyn EventHandler>>,
    destroyed: bool,
}

/// A named, registered instrumentation wrapper around one parent backend
pub struct InstVfs {
    name: String,
    parent: Arc<dyn Vfs>,
    clock: ClockSource,
    counters: OperationCounters,
    state: RwLock<InstState>,
    live_handles: AtomicUsize,
    callback_faults: AtomicU64,
    last_fault: Mutex<Option<CallbackFault>>,
    this: Weak<InstVfs>,
}

/// Result shapes an intercepted call can produce
pub(crate) trait Outcome: Sized {
    fn failed(&self) -> bool;

    /// What a destroyed wrapper hands back instead of calling the delegate
    fn misuse() -> Self;
}

impl<T> Outcome for VfsResult<T> {
    fn failed(&self) -> bool {
        self.is_err()
    }

    fn misuse() -> Self {
        Err(VfsError::Misuse)
    }
}

impl Outcome for i32 {
    fn failed(&self) -> bool {
        false
    }

    fn misuse() -> Self {
        0
    }
}

impl Outcome for usize {
    fn failed(&self) -> bool {
        false
    }

    fn misuse() -> Self {
        0
    }
}

impl Outcome for DeviceCharacteristics {
    fn failed(&self) -> bool {
        false
    }

    fn misuse() -> Self {
        DeviceCharacteristics::empty()
    }
}

impl InstVfs {
    /// Wrap `parent` (or the registry default) and register the wrapper as `name`
    pub fn create(registry: &VfsRegistry, name: &str, parent: Option<&str>) -> Result<Arc<Self>> {
        Self::create_with(registry, name, parent, InstConfig::default())
    }

    pub fn create_with(
        registry: &VfsRegistry,
        name: &str,
        parent: Option<&str>,
        config: InstConfig,
    ) -> Result<Arc<Self>> {
        if name.is_empty() {
            return Err(InstError::EmptyName);
        }
        let parent = registry.resolve(parent)?;
        if registry.contains(name) {
            return Err(InstError::DuplicateName(name.to_string()));
        }

        let mut owned_name = String::new();
        owned_name
            .try_reserve_exact(name.len())
            .map_err(|_| InstError::AllocationFailure(name.to_string()))?;
        owned_name.push_str(name);

        let inst = Arc::new_cyclic(|this| InstVfs {
            name: owned_name,
            parent,
            clock: config.clock,
            counters: OperationCounters::new(),
            state: RwLock::new(InstState {
                handler: None,
                destroyed: false,
            }),
            live_handles: AtomicUsize::new(0),
            callback_faults: AtomicU64::new(0),
            last_fault: Mutex::new(None),
            this: this.clone(),
        });

        registry.register(Arc::clone(&inst) as Arc<dyn Vfs>, config.make_default)?;
        debug!(
            vfs = %inst.name,
            parent = %inst.parent.name(),
            clock = inst.clock.as_str(),
            make_default = config.make_default,
            "created instrumented vfs"
        );
        Ok(inst)
    }

    /// Look up a registered wrapper by name. Names that are missing, or that
    /// belong to a plain backend, are reported as misuse.
    pub fn find(registry: &VfsRegistry, name: &str) -> Result<Arc<Self>> {
        let vfs = registry
            .find(Some(name))
            .ok_or_else(|| InstError::NotInstrumented(name.to_string()))?;
        AsAny::into_any(vfs)
            .downcast::<InstVfs>()
            .map_err(|_| InstError::NotInstrumented(name.to_string()))
    }

    /// Replace the event handler. The previous handler is released first; its
    /// client destructor runs once no in-flight call still holds it. `None`
    /// stops notification while timing and counting continue.
    pub fn configure(&self, handler: Option<Box<dyn EventHandler>>) -> Result<()> {
        let mut state = self.write_state();
        self.ensure_live(&state)?;
        let enabled = handler.is_some();
        drop(state.handler.take());
        state.handler = handler.map(Arc::from);
        debug!(vfs = %self.name, enabled, "configured event handler");
        Ok(())
    }

    /// Zero every counter in one step
    pub fn reset(&self) -> Result<()> {
        let state = self.write_state();
        self.ensure_live(&state)?;
        self.counters.reset();
        debug!(vfs = %self.name, "reset counters");
        Ok(())
    }

    /// Unregister the wrapper and release its handler. Refused while any file
    /// opened through it is still open.
    pub fn destroy(self: &Arc<Self>, registry: &VfsRegistry) -> Result<()> {
        let mut state = self.write_state();
        self.ensure_live(&state)?;

        let live_handles = self.live_handles.load(Ordering::Acquire);
        if live_handles > 0 {
            return Err(InstError::HandlesOpen {
                name: self.name.clone(),
                live_handles,
            });
        }

        let as_vfs: Arc<dyn Vfs> = Arc::clone(self) as Arc<dyn Vfs>;
        if !registry.unregister_exact(&as_vfs) {
            warn!(vfs = %self.name, "instrumented vfs was not registered at destroy");
        }
        drop(state.handler.take());
        state.destroyed = true;
        debug!(vfs = %self.name, "destroyed instrumented vfs");
        Ok(())
    }

    /// Counters for one operation id, `None` outside the catalog
    pub fn get(&self, id: i32) -> Result<Option<OperationStat>> {
        let state = self.read_state();
        self.ensure_live(&state)?;
        Ok(OperationKind::from_id(id).map(|kind| self.counters.get(kind)))
    }

    /// Counters for every kind, ids ascending from 1 with no gaps
    pub fn report(&self) -> Result<Report> {
        let state = self.read_state();
        self.ensure_live(&state)?;
        let entries = events::catalog()
            .map(|kind| self.counters.get(kind))
            .collect();
        Ok(Report {
            vfs: self.name.clone(),
            clock: self.clock,
            entries,
        })
    }

    pub fn parent_name(&self) -> &str {
        self.parent.name()
    }

    pub fn clock(&self) -> ClockSource {
        self.clock
    }

    pub fn is_destroyed(&self) -> bool {
        self.read_state().destroyed
    }

    /// Files opened through this wrapper that are not yet closed
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::Acquire)
    }

    /// Number of handler errors and panics caught so far
    pub fn callback_faults(&self) -> u64 {
        self.callback_faults.load(Ordering::Relaxed)
    }

    /// Take the most recent handler fault, if any
    pub fn take_callback_fault(&self) -> Option<CallbackFault> {
        self.last_fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn name_str(&self) -> &str {
        &self.name
    }

    pub(crate) fn parent(&self) -> &Arc<dyn Vfs> {
        &self.parent
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<InstVfs>> {
        self.this.upgrade()
    }

    pub(crate) fn acquire_handle(&self) {
        self.live_handles.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_handle(&self) {
        self.live_handles.fetch_sub(1, Ordering::AcqRel);
    }

    /// Time `call`, record it under `kind`, notify the handler and hand back
    /// the delegate's result untouched
    pub(crate) fn intercept<R: Outcome>(
        &self,
        kind: OperationKind,
        subject: Option<&str>,
        int_arg: i32,
        int64_arg: i64,
        call: impl FnOnce() -> R,
    ) -> R {
        self.intercept_then(kind, subject, int_arg, int64_arg, call, |_| {})
    }

    /// Like [`Self::intercept`], running `settle` on the result after the
    /// closing tick while the state lock is still held. The handler itself
    /// runs after the lock is released.
    pub(crate) fn intercept_then<R: Outcome>(
        &self,
        kind: OperationKind,
        subject: Option<&str>,
        int_arg: i32,
        int64_arg: i64,
        call: impl FnOnce() -> R,
        settle: impl FnOnce(&R),
    ) -> R {
        let state = self.read_state();
        if state.destroyed {
            warn!(vfs = %self.name, operation = %kind, "call on destroyed instrumented vfs");
            return R::misuse();
        }

        let start = self.clock.now();
        let outcome = call();
        let elapsed_ticks = ClockSource::elapsed(start, self.clock.now());
        settle(&outcome);

        self.counters.record(kind, elapsed_ticks, outcome.failed());
        trace!(
            vfs = %self.name,
            operation = %kind,
            ticks = elapsed_ticks,
            subject = subject.unwrap_or(""),
            int_arg,
            int64_arg,
            failed = outcome.failed(),
            "intercepted"
        );

        let handler = state.handler.clone();
        drop(state);

        if let Some(handler) = handler.as_deref() {
            self.notify(
                handler,
                &EventRecord {
                    kind,
                    elapsed_ticks,
                    subject,
                    int_arg,
                    int64_arg,
                },
            );
        }
        outcome
    }

    fn notify(&self, handler: &dyn EventHandler, event: &EventRecord<'_>) {
        let fault = match panic::catch_unwind(AssertUnwindSafe(|| handler.on_event(event))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => CallbackFault::from_error(event.kind, &e),
            Err(payload) => CallbackFault::from_panic(event.kind, &*payload),
        };
        warn!(vfs = %self.name, panicked = fault.panicked, "{fault}");
        self.callback_faults.fetch_add(1, Ordering::Relaxed);
        *self.last_fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(fault);
    }

    fn ensure_live(&self, state: &InstState) -> Result<()> {
        if state.destroyed {
            Err(InstError::Destroyed(self.name.clone()))
        } else {
            Ok(())
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, InstState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, InstState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for InstVfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstVfs")
            .field("name", &self.name)
            .field("parent", &self.parent.name())
            .field("clock", &self.clock)
            .field("live_handles", &self.live_handles())
            .finish_non_exhaustive()
    }
}
