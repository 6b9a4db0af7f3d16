//! The `Wrapper` handler variant of §4.5: exactly one child, invoked
//! before/after/instead-of its own work.

use std::sync::Arc;

use crate::channel::Channel;
use crate::error::BoxError;
use crate::handler::{BoxHandler, Handler};

/// Wraps a single child handler. The default behaviour simply forwards;
/// real wrappers are built with [`Wrapper::before`]/[`Wrapper::after`] or
/// by implementing [`Handler`] directly and calling `child.handle(..)`
/// from within it for full control (short-circuiting, rewriting the
/// response, etc).
pub struct Wrapper<Before, After> {
    child: BoxHandler,
    before: Before,
    after: After,
}

impl Wrapper<(), ()> {
    #[must_use]
    pub fn new(child: impl Handler) -> Wrapper<(), ()> {
        Wrapper {
            child: BoxHandler::new(child),
            before: (),
            after: (),
        }
    }
}

impl<After> Wrapper<(), After> {
    /// Run `before` prior to the child; a `before` returning `Err` skips
    /// the child entirely and propagates the error to error dispatch.
    pub fn before<B, Fut>(self, before: B) -> Wrapper<B, After>
    where
        B: Fn(String, Arc<Channel>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Wrapper {
            child: self.child,
            before,
            after: self.after,
        }
    }
}

impl<Before> Wrapper<Before, ()> {
    /// Run `after` once the child returns, regardless of whether it
    /// reported itself handled.
    pub fn after<A, Fut>(self, after: A) -> Wrapper<Before, A>
    where
        A: Fn(String, Arc<Channel>, bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Wrapper {
            child: self.child,
            before: self.before,
            after,
        }
    }
}

impl Handler for Wrapper<(), ()> {
    fn handle(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
        self.child.handle(target, channel)
    }
}

impl<B, Fut> Handler for Wrapper<B, ()>
where
    B: Fn(String, Arc<Channel>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn handle(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
        async move {
            (self.before)(target.clone(), channel.clone()).await?;
            self.child.handle(target, channel).await
        }
    }
}

impl<A, Fut> Handler for Wrapper<(), A>
where
    A: Fn(String, Arc<Channel>, bool) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn handle(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
        async move {
            let handled = self.child.handle(target.clone(), channel.clone()).await?;
            (self.after)(target, channel, handled).await?;
            Ok(handled)
        }
    }
}

impl<B, A, FutB, FutA> Handler for Wrapper<B, A>
where
    B: Fn(String, Arc<Channel>) -> FutB + Send + Sync + 'static,
    FutB: Future<Output = Result<(), BoxError>> + Send + 'static,
    A: Fn(String, Arc<Channel>, bool) -> FutA + Send + Sync + 'static,
    FutA: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn handle(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
        async move {
            (self.before)(target.clone(), channel.clone()).await?;
            let handled = self.child.handle(target.clone(), channel.clone()).await?;
            (self.after)(target, channel, handled).await?;
            Ok(handled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::test_channel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn plain_wrapper_forwards_to_child() {
        let w = Wrapper::new(crate::handler::handler_fn(|_t, _c| async move { Ok(true) }));
        assert!(w.handle("/x".into(), test_channel()).await.unwrap());
    }

    #[tokio::test]
    async fn before_runs_prior_to_child() {
        let order = Arc::new(AtomicUsize::new(0));
        let before_order = order.clone();
        let child_order = order.clone();
        let w = Wrapper::new(crate::handler::handler_fn(move |_t, _c| {
            let order = child_order.clone();
            async move {
                assert_eq!(order.fetch_add(1, Ordering::SeqCst), 1);
                Ok(true)
            }
        }))
        .before(move |_t, _c| {
            let order = before_order.clone();
            async move {
                assert_eq!(order.fetch_add(1, Ordering::SeqCst), 0);
                Ok(())
            }
        });
        assert!(w.handle("/x".into(), test_channel()).await.unwrap());
        assert_eq!(order.load(Ordering::SeqCst), 2);
    }
}
