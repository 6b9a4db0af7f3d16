//! [`BaseRequest`]: the request half of a [`Channel`](crate::channel::Channel).

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Weak;
use std::task::{Context as TaskContext, Poll};

use http::{HeaderMap, Method, Uri, Version};
use tokio::io::{AsyncRead, ReadBuf};

use crate::attributes::{Attributes, DispatcherType};
use crate::channel::Channel;
use crate::interceptor::InputChain;

/// A lazily-read request content stream, wrapping whatever the wire adapter
/// handed the channel and running every read through the request-side
/// [`InputChain`] (§4.7 size limiting).
pub struct RequestBody {
    inner: Pin<Box<dyn AsyncRead + Send>>,
    limiter: Arc<InputChain>,
}

impl RequestBody {
    pub fn new(inner: Pin<Box<dyn AsyncRead + Send>>, limiter: Arc<InputChain>) -> Self {
        Self { inner, limiter }
    }

    /// An already-exhausted body, for requests with no content.
    pub fn empty() -> Self {
        Self::new(Box::pin(tokio::io::empty()), Arc::new(InputChain::new()))
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody").finish_non_exhaustive()
    }
}

impl AsyncRead for RequestBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = self.inner.as_mut().poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let consumed = buf.filled().len() - before;
            if consumed > 0
                && let Err(e) = self.limiter.read(consumed)
            {
                return Poll::Ready(Err(std::io::Error::other(e)));
            }
        }
        poll
    }
}

/// Target path history entry left behind by a `forward`/`include` (§4.4).
#[derive(Debug, Clone)]
struct DispatchFrame {
    target: String,
    dispatcher_type: DispatcherType,
}

/// Owns the request half of one HTTP exchange: target, headers,
/// content-length, the lazy content stream, the dispatcher type,
/// attributes, and a back-reference to the owning [`Channel`].
pub struct BaseRequest {
    pub method: Method,
    target: String,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub attributes: Attributes,
    dispatcher_type: DispatcherType,
    channel: Weak<Channel>,
    body: Option<RequestBody>,
    dispatch_stack: Vec<DispatchFrame>,
}

impl BaseRequest {
    pub fn new(
        method: Method,
        target: String,
        uri: Uri,
        version: Version,
        headers: HeaderMap,
        content_length: Option<u64>,
        body: RequestBody,
        channel: Weak<Channel>,
    ) -> Self {
        Self {
            method,
            target,
            uri,
            version,
            headers,
            content_length,
            attributes: Attributes::new(),
            dispatcher_type: DispatcherType::Request,
            channel,
            body: Some(body),
            dispatch_stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn dispatcher_type(&self) -> DispatcherType {
        self.dispatcher_type
    }

    /// The owning channel, if it hasn't already been recycled.
    #[must_use]
    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.upgrade()
    }

    /// Take the content stream. Callers that need it must take it once;
    /// a second call returns `None`, matching the single-consumer contract
    /// of a lazily-read body.
    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }

    /// Re-dispatch this request to `target` within the same handler chain,
    /// per §4.4's forward mutation operation. The previous target is
    /// pushed onto a stack so a nested `forward` can be unwound by the
    /// caller if it wants to report the original target in diagnostics.
    pub fn forward(&mut self, target: impl Into<String>) {
        self.dispatch_stack.push(DispatchFrame {
            target: self.target.clone(),
            dispatcher_type: self.dispatcher_type,
        });
        self.target = target.into();
        self.dispatcher_type = DispatcherType::Forward;
    }

    /// Include another target's output without replacing this request's
    /// own target once the include returns (§4.4).
    pub fn include(&mut self, target: impl Into<String>) {
        self.dispatch_stack.push(DispatchFrame {
            target: self.target.clone(),
            dispatcher_type: self.dispatcher_type,
        });
        self.target = target.into();
        self.dispatcher_type = DispatcherType::Include;
    }

    /// Restore the target/dispatcher-type in effect before the most recent
    /// `forward`/`include`, if any.
    pub fn pop_dispatch(&mut self) {
        if let Some(frame) = self.dispatch_stack.pop() {
            self.target = frame.target;
            self.dispatcher_type = frame.dispatcher_type;
        }
    }

    /// Mark this request as entering the handler chain via an async
    /// re-dispatch or an error dispatch (§4.3/§4.5); used by the state
    /// machine, not by application handlers.
    pub(crate) fn set_dispatcher_type(&mut self, dispatcher_type: DispatcherType) {
        self.dispatcher_type = dispatcher_type;
    }
}

impl fmt::Debug for BaseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseRequest")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("version", &self.version)
            .field("dispatcher_type", &self.dispatcher_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> BaseRequest {
        BaseRequest::new(
            Method::GET,
            "/ok".to_string(),
            Uri::from_static("/ok"),
            Version::HTTP_11,
            HeaderMap::new(),
            None,
            RequestBody::empty(),
            Weak::new(),
        )
    }

    #[test]
    fn forward_then_pop_restores_original_target() {
        let mut req = sample_request();
        assert_eq!(req.target(), "/ok");
        req.forward("/other");
        assert_eq!(req.target(), "/other");
        assert_eq!(req.dispatcher_type(), DispatcherType::Forward);
        req.pop_dispatch();
        assert_eq!(req.target(), "/ok");
        assert_eq!(req.dispatcher_type(), DispatcherType::Request);
    }

    #[test]
    fn take_body_is_single_consumer() {
        let mut req = sample_request();
        assert!(req.take_body().is_some());
        assert!(req.take_body().is_none());
    }
}
