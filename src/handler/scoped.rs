//! The `Scoped` handler variant of §4.5 and its two-pass linking.
//!
//! Grounded on the spec's own "Implementation strategy" note: rather than
//! a per-request thread-local recording "the current outermost scope" (the
//! approach the distilled spec describes as the historical implementation
//! technique), the link between consecutive `Scoped` nodes is computed
//! once, up front, as an explicit topology pass over the flat child chain
//! — `ScopedChain::new` is that pass. No thread-local exists anywhere in
//! this crate.
//!
//! A `doScope`/`doHandle` pair only fires its `doScope` half when it is
//! the first `Scoped` node after a break in the chain (the chain's start,
//! or a non-`Scoped` handler). Consecutive `Scoped` nodes share one scope:
//! all of their `doScope`s run before any of their `doHandle`s, matching
//! §8 invariant 4's sequence `A.doScope, B.doScope, A.doHandle,
//! B.doHandle` for a chain of two adjacent `Scoped` handlers, and the
//! "non-scoped handlers interleaved between scopes must not themselves
//! open a scope" rule for a chain like `A(scoped) -> B(scoped) -> X(plain)
//! -> C(scoped)`, where `C`'s scope opens only once control reaches it via
//! `X`.

use std::sync::Arc;

use crate::channel::Channel;
use crate::error::BoxError;
use crate::handler::{BoxHandler, Handler};

/// A `Scoped` node: both halves of §4.5's `Scoped` variant. `do_scope` is
/// a plain setup call, not a wrap-with-teardown: §8's observable ordering
/// lists only scope-entry and handle invocations, never a paired exit.
pub trait ScopedHandler: Send + Sync + 'static {
    fn do_scope(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<(), BoxError>> + Send + '_;

    fn do_handle(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_;
}

trait DynScoped: Send + Sync {
    fn do_scope_dyn(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + '_>>;

    fn do_handle_dyn(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<bool, BoxError>> + Send + '_>>;
}

impl<T: ScopedHandler> DynScoped for T {
    fn do_scope_dyn(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + '_>> {
        Box::pin(self.do_scope(target, channel))
    }

    fn do_handle_dyn(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<bool, BoxError>> + Send + '_>> {
        Box::pin(self.do_handle(target, channel))
    }
}

/// One node of a flat handler chain built for `ScopedChain`.
pub enum Link {
    Scoped(Arc<dyn DynScoped>),
    Plain(BoxHandler),
}

impl Link {
    pub fn scoped<T: ScopedHandler>(handler: T) -> Self {
        Link::Scoped(Arc::new(handler))
    }

    pub fn plain<T: Handler>(handler: T) -> Self {
        Link::Plain(BoxHandler::new(handler))
    }
}

/// A flat chain of `Scoped` and plain handler nodes, with the scope-run
/// boundaries precomputed at construction time (the "two-pass topology
/// walk" of the spec's implementation note).
pub struct ScopedChain {
    links: Vec<Link>,
    /// `run_len[i]` is `Some(len)` iff `links[i]` is a `Scoped` node that
    /// opens a new scope run of `len` consecutive `Scoped` nodes starting
    /// at `i`; `None` for plain nodes and for `Scoped` nodes already
    /// covered by an earlier run's `doScope`.
    run_len: Vec<Option<usize>>,
}

impl ScopedChain {
    #[must_use]
    pub fn new(links: Vec<Link>) -> Self {
        let mut run_len = vec![None; links.len()];
        let mut i = 0;
        while i < links.len() {
            if matches!(links[i], Link::Scoped(_)) {
                let mut j = i;
                while j < links.len() && matches!(links[j], Link::Scoped(_)) {
                    j += 1;
                }
                run_len[i] = Some(j - i);
                i = j;
            } else {
                i += 1;
            }
        }
        Self { links, run_len }
    }

    /// Runs the whole chain: every `Scoped` run's `doScope`s, then that
    /// run's `doHandle`s, then continues to whatever follows; plain nodes
    /// run their `handle` in place. Does not short-circuit on the first
    /// `true`, since §8's invariant is about invocation *order*, not
    /// early exit — a later node seeing `target` already rewritten by an
    /// earlier `forward` is exactly the observable effect being tested.
    pub async fn run(&self, target: &str, channel: Arc<Channel>) -> Result<bool, BoxError> {
        let mut handled = false;
        let mut i = 0;
        while i < self.links.len() {
            match &self.links[i] {
                Link::Plain(h) => {
                    handled |= h.handle(target.to_string(), channel.clone()).await?;
                    i += 1;
                }
                Link::Scoped(_) => {
                    let Some(len) = self.run_len[i] else {
                        unreachable!("scoped link without a computed run length")
                    };
                    for node in &self.links[i..i + len] {
                        let Link::Scoped(s) = node else {
                            unreachable!("run length crossed a plain link")
                        };
                        s.do_scope_dyn(target.to_string(), channel.clone())
                            .await?;
                    }
                    for node in &self.links[i..i + len] {
                        let Link::Scoped(s) = node else {
                            unreachable!("run length crossed a plain link")
                        };
                        handled |= s.do_handle_dyn(target.to_string(), channel.clone()).await?;
                    }
                    i += len;
                }
            }
        }
        Ok(handled)
    }
}
