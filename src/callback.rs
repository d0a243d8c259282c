//! Event delivery for intercepted calls
//!
//! After every timed operation the wrapper hands an [`EventRecord`] to the
//! configured [`EventHandler`], synchronously, before the operation returns to
//! its own caller. A handler can be any closure, or a [`ClientCallback`] that
//! mirrors the classic callback / client-context / destructor triple.
//!
//! Handler failures (returned errors or panics) never change the result of the
//! intercepted operation. They are captured as [`CallbackFault`]s on the
//! wrapper instance instead.

use crate::events::OperationKind;
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// One intercepted call, as seen by a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord<'a> {
    pub kind: OperationKind,
    pub elapsed_ticks: u64,
    /// File name for handle operations, path argument for filesystem ones
    pub subject: Option<&'a str>,
    pub int_arg: i32,
    pub int64_arg: i64,
}

impl EventRecord<'_> {
    /// Display name of the operation, e.g. `"xRead"`
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Copy into an owned record that can outlive the call
    pub fn to_owned_event(&self) -> OwnedEvent {
        OwnedEvent {
            kind: self.kind,
            elapsed_ticks: self.elapsed_ticks,
            subject: self.subject.map(str::to_string),
            int_arg: self.int_arg,
            int64_arg: self.int64_arg,
        }
    }
}

/// An [`EventRecord`] detached from the call that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedEvent {
    pub kind: OperationKind,
    pub elapsed_ticks: u64,
    pub subject: Option<String>,
    pub int_arg: i32,
    pub int64_arg: i64,
}

impl fmt::Display for OwnedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(\"{}\", {}, {}) <{} ticks>",
            self.kind.name(),
            self.subject.as_deref().unwrap_or(""),
            self.int_arg,
            self.int64_arg,
            self.elapsed_ticks
        )
    }
}

/// Receiver of event records
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &EventRecord<'_>) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&EventRecord<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &EventRecord<'_>) -> anyhow::Result<()> {
        self(event)
    }
}

type Destructor<C> = Box<dyn FnOnce(C) + Send + Sync>;

/// Callback function plus an owned client context, with an optional
/// destructor that receives the context when the callback is replaced or the
/// wrapper is destroyed.
pub struct ClientCallback<C: Send + Sync + 'static> {
    context: Option<C>,
    call: fn(&C, &EventRecord<'_>) -> anyhow::Result<()>,
    destructor: Option<Destructor<C>>,
}

impl<C: Send + Sync + 'static> ClientCallback<C> {
    pub fn new(context: C, call: fn(&C, &EventRecord<'_>) -> anyhow::Result<()>) -> Self {
        Self {
            context: Some(context),
            call,
            destructor: None,
        }
    }

    /// Run `destructor` on the context when this callback is released
    pub fn with_destructor(mut self, destructor: impl FnOnce(C) + Send + Sync + 'static) -> Self {
        self.destructor = Some(Box::new(destructor));
        self
    }

    pub fn context(&self) -> Option<&C> {
        self.context.as_ref()
    }
}

impl<C: Send + Sync + 'static> EventHandler for ClientCallback<C> {
    fn on_event(&self, event: &EventRecord<'_>) -> anyhow::Result<()> {
        match &self.context {
            Some(context) => (self.call)(context, event),
            None => Ok(()),
        }
    }
}

impl<C: Send + Sync + 'static> Drop for ClientCallback<C> {
    fn drop(&mut self) {
        if let (Some(context), Some(destructor)) = (self.context.take(), self.destructor.take()) {
            destructor(context);
        }
    }
}

impl<C: Send + Sync + 'static> fmt::Debug for ClientCallback<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCallback")
            .field("has_context", &self.context.is_some())
            .field("has_destructor", &self.destructor.is_some())
            .finish()
    }
}

/// A handler failed while processing an event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} callback failed: {message}")]
pub struct CallbackFault {
    pub operation: OperationKind,
    pub message: String,
    pub panicked: bool,
}

impl CallbackFault {
    pub fn from_error(operation: OperationKind, error: &anyhow::Error) -> Self {
        Self {
            operation,
            message: format!("{error:#}"),
            panicked: false,
        }
    }

    pub fn from_panic(operation: OperationKind, payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| String::from("handler panicked"));
        Self {
            operation,
            message,
            panicked: true,
        }
    }
}
