//! Runtime utilities: a spawn abstraction shared by the acceptor and the
//! per-connection read loops.

use tokio_graceful::ShutdownGuard;

/// Future executor that utilises `tokio` tasks.
///
/// When built with [`Executor::graceful`], every task spawned through it is
/// tracked by the associated [`ShutdownGuard`], so a server's `stop()` can
/// wait for in-flight connections to finish rather than severing them.
#[derive(Default, Debug, Clone)]
pub struct Executor {
    guard: Option<ShutdownGuard>,
}

impl Executor {
    /// Create a new [`Executor`] with no shutdown tracking.
    #[must_use]
    pub const fn new() -> Self {
        Self { guard: None }
    }

    /// Create a new [`Executor`] whose spawned tasks are tracked by `guard`.
    #[must_use]
    pub fn graceful(guard: ShutdownGuard) -> Self {
        Self { guard: Some(guard) }
    }

    /// Spawn a future on this executor.
    pub fn spawn_task<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future<Output: Send + 'static> + Send + 'static,
    {
        match &self.guard {
            Some(guard) => guard.spawn_task(future),
            None => tokio::spawn(future),
        }
    }

    /// Get a reference to the shutdown guard, if this executor was created
    /// with [`Executor::graceful`].
    #[must_use]
    pub fn guard(&self) -> Option<&ShutdownGuard> {
        self.guard.as_ref()
    }
}
