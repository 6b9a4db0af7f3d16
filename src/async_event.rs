//! [`AsyncEvent`]: the data side of an async cycle (§3), kept deliberately
//! separate from [`crate::state_machine::StateMachine`]'s lock so that
//! invoking a listener never happens while the state tuple's mutex is
//! held (§5).
//!
//! Lifetime: created by `Channel::start_async`, populated by
//! `dispatch`/`complete`/timeout, and dropped once `Channel` finishes
//! `onComplete` — "Lifetime = from startAsync until onComplete" per §3.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::BoxError;
use crate::timeout::TimeoutHandle;

/// Listener callbacks fired at the four points in an async cycle's life:
/// start, a scheduled dispatch, a timeout, completion, or an error.
/// Registered at `startAsync` time; "the listener list captured at
/// startAsync is the one called on the subsequent timeout/complete/error
/// transitions for that async cycle" (§4.3).
pub trait AsyncListener: Send + Sync {
    fn on_start_async(&self, _event: &AsyncEvent) {}
    fn on_timeout(&self, _event: &AsyncEvent) {}
    fn on_complete(&self, _event: &AsyncEvent) {}
    fn on_error(&self, _event: &AsyncEvent, _cause: &BoxError) {}
}

struct Inner {
    dispatch_target: Option<(String, String)>,
    cause: Option<BoxError>,
    timeout_handle: Option<TimeoutHandle>,
    listeners: Vec<Arc<dyn AsyncListener>>,
}

/// The mutable data attached to a state machine while `Async ≠ NOT_ASYNC`
/// (invariant 2 of §3).
pub struct AsyncEvent {
    inner: Mutex<Inner>,
}

impl AsyncEvent {
    /// Create a new event, capturing the listener list in effect at
    /// `startAsync` time.
    #[must_use]
    pub fn new(listeners: Vec<Arc<dyn AsyncListener>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                dispatch_target: None,
                cause: None,
                timeout_handle: None,
                listeners,
            }),
        }
    }

    #[must_use]
    pub fn listeners(&self) -> Vec<Arc<dyn AsyncListener>> {
        self.inner.lock().listeners.clone()
    }

    /// Re-arm the listener list for the *next* async cycle. Per §4.3: "
    /// subsequent re-arming of listeners applies to the next cycle" — this
    /// event is the current cycle, so this is only ever called just before
    /// a fresh `AsyncEvent` replaces it.
    pub fn set_listeners(&self, listeners: Vec<Arc<dyn AsyncListener>>) {
        self.inner.lock().listeners = listeners;
    }

    /// Register an additional listener on the current cycle, e.g. from a
    /// handler that ran after `startAsync` already captured the initial
    /// list.
    pub fn add_listener(&self, listener: Arc<dyn AsyncListener>) {
        self.inner.lock().listeners.push(listener);
    }

    pub fn set_dispatch_target(&self, context: impl Into<String>, path: impl Into<String>) {
        self.inner.lock().dispatch_target = Some((context.into(), path.into()));
    }

    #[must_use]
    pub fn dispatch_target(&self) -> Option<(String, String)> {
        self.inner.lock().dispatch_target.clone()
    }

    /// Attach a cause (accumulated throwable). Only the first cause wins:
    /// a later `asyncError` during the same cycle does not overwrite an
    /// earlier failure's cause, matching how a Handler chain accumulates
    /// at most one reported error per dispatch.
    pub fn set_cause(&self, cause: BoxError) {
        let mut inner = self.inner.lock();
        if inner.cause.is_none() {
            inner.cause = Some(cause);
        }
    }

    #[must_use]
    pub fn has_cause(&self) -> bool {
        self.inner.lock().cause.is_some()
    }

    /// A non-destructive peek at the cause's `Display` rendering, for error
    /// pages that need to show it without consuming it (§4.7).
    #[must_use]
    pub fn cause_message(&self) -> Option<String> {
        self.inner.lock().cause.as_ref().map(ToString::to_string)
    }

    pub fn take_cause(&self) -> Option<BoxError> {
        self.inner.lock().cause.take()
    }

    pub fn set_timeout_handle(&self, handle: TimeoutHandle) {
        self.inner.lock().timeout_handle = Some(handle);
    }

    pub fn take_timeout_handle(&self) -> Option<TimeoutHandle> {
        self.inner.lock().timeout_handle.take()
    }
}

impl std::fmt::Debug for AsyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("AsyncEvent")
            .field("dispatch_target", &inner.dispatch_target)
            .field("has_cause", &inner.cause.is_some())
            .field("listener_count", &inner.listeners.len())
            .finish()
    }
}
