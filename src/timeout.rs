//! Timeout scheduler & cancellation (§4.6).
//!
//! Built on `tokio::time::{sleep_until, Instant}`, the same primitives
//! `rama-http-core::proto::h1::conn::Conn` uses for its own header-read
//! timeout (`h1_header_read_timeout_fut: Option<Pin<Box<Sleep>>>`), rather
//! than a hand-rolled timer wheel — this crate has no need for the extra
//! precision a wheel buys, and §4.6 explicitly only promises "coarse;
//! milliseconds" precision.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A scheduled, cancellable timeout. `cancel()` is a *request*, not a veto
/// (§4.6): the task may already have started running on another thread by
/// the time `cancel()` is observed. The race is resolved by whatever
/// callback this handle wraps checking its own preconditions after
/// acquiring its lock — see `Channel::fire_timeout`.
pub struct TimeoutHandle {
    join: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

impl TimeoutHandle {
    /// Idempotent; a cancel observed after the task has already fired is a
    /// no-op from the scheduler's point of view (the callback itself
    /// decides whether the fire still matters).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.join.abort();
    }
}

impl Drop for TimeoutHandle {
    fn drop(&mut self) {
        // Dropping an un-cancelled handle should not silently leak a
        // still-running timer past the Channel that owns it.
        if !self.cancelled.load(Ordering::Acquire) {
            self.join.abort();
        }
    }
}

/// Schedules a `callback` to run once, `delay` from now, unless cancelled
/// first. The scheduler never holds any of the caller's locks while
/// firing: `callback` runs on a freshly spawned task.
pub fn schedule<F>(delay: Duration, callback: F) -> TimeoutHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let join = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        callback.await;
    });
    TimeoutHandle { join, cancelled }
}
