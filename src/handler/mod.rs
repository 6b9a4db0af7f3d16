//! Handler composition & scoping (§4.5).
//!
//! The async-trait shape here is grounded directly in
//! `rama-core::service::Service`/`rama-core::layer::Layer`: a handler's
//! `handle` method takes its arguments *by value* and only borrows
//! `&self`, so the returned `impl Future<..> + Send + '_` has one simple
//! elided lifetime instead of needing to juggle several independently
//! borrowed `&mut` parameters across an `.await`. Dynamic dispatch is
//! provided the same way `rama-core::service::svc::BoxService` does it: an
//! internal `DynHandler` trait boxes the future behind `Pin<Box<dyn
//! Future<..> + Send + '_>>`, letting `Arc<dyn DynHandler>` stand in for
//! `Arc<dyn Handler>` in `Wrapper`/`Collection`/`Scoped` children.

mod collection;
mod scoped;
mod wrapper;

pub use collection::{Collection, MultiError};
pub use scoped::{Link, ScopedChain, ScopedHandler};
pub use wrapper::Wrapper;

use std::pin::Pin;
use std::sync::Arc;

use crate::channel::Channel;
use crate::error::BoxError;

/// A node in the handler DAG of §4.5. `target` is the (possibly
/// forward/include-rewritten) request path; `channel` gives access to the
/// request/response attributes owned by the [`Channel`].
///
/// Returning `Ok(true)` marks the request handled in the outermost sense
/// (§6's external handler contract); `Ok(false)` means "pass through, I
/// did nothing"; `Err` is a runtime failure that the caller routes to
/// error dispatch.
pub trait Handler: Send + Sync + 'static {
    fn handle(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_;

    /// Box this handler for dynamic dispatch inside a [`Wrapper`] or
    /// [`Collection`].
    fn boxed(self) -> BoxHandler
    where
        Self: Sized,
    {
        BoxHandler::new(self)
    }
}

trait DynHandler: Send + Sync {
    fn handle_dyn(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> Pin<Box<dyn Future<Output = Result<bool, BoxError>> + Send + '_>>;
}

impl<T: Handler> DynHandler for T {
    fn handle_dyn(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> Pin<Box<dyn Future<Output = Result<bool, BoxError>> + Send + '_>> {
        Box::pin(self.handle(target, channel))
    }
}

/// A type-erased [`Handler`], for storing heterogeneous children in a
/// [`Wrapper`] or [`Collection`].
#[derive(Clone)]
pub struct BoxHandler {
    inner: Arc<dyn DynHandler>,
}

impl BoxHandler {
    #[must_use]
    pub fn new<T: Handler>(handler: T) -> Self {
        Self {
            inner: Arc::new(handler),
        }
    }
}

impl std::fmt::Debug for BoxHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxHandler").finish()
    }
}

impl Handler for BoxHandler {
    fn handle(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
        self.inner.handle_dyn(target, channel)
    }
}

/// Build a [`Handler`] from a plain async function, the leaf case of
/// §4.5's variant set. Mirrors `rama_core::service::handler::service_fn`
/// in spirit, simplified to this crate's single-arity `Handler::handle`.
pub fn handler_fn<F, Fut>(f: F) -> impl Handler
where
    F: Fn(String, Arc<Channel>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    struct FnHandler<F>(F);

    impl<F, Fut> Handler for FnHandler<F>
    where
        F: Fn(String, Arc<Channel>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        fn handle(
            &self,
            target: String,
            channel: Arc<Channel>,
        ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
            (self.0)(target, channel)
        }
    }

    FnHandler(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::test_channel;

    #[tokio::test]
    async fn handler_fn_invokes_closure() {
        let h = handler_fn(|_target, _channel| async move { Ok(true) });
        let channel = test_channel();
        assert!(h.handle("/x".into(), channel).await.unwrap());
    }

    #[tokio::test]
    async fn boxed_handler_dispatches_dynamically() {
        let h: BoxHandler = handler_fn(|_t, _c| async move { Ok(false) }).boxed();
        let channel = test_channel();
        assert!(!h.handle("/x".into(), channel).await.unwrap());
    }
}
