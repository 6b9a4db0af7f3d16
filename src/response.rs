//! [`Response`]: the response half of a [`Channel`](crate::channel::Channel).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::{HeaderMap, HeaderValue, StatusCode};

use crate::error::CoreError;
use crate::interceptor::OutputChain;

/// Owns the response half of one HTTP exchange: status, headers, an
/// output buffer guarded by the output interceptor chain, and the
/// monotonic "committed" flag of §4.4 ("`committed` is monotonic").
pub struct Response {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    content_length: Option<u64>,
    buffer: Vec<u8>,
    output: Arc<OutputChain>,
    committed: AtomicBool,
    closed: AtomicBool,
}

impl Response {
    #[must_use]
    pub fn new(output: Arc<OutputChain>) -> Self {
        Self {
            status: StatusCode::OK,
            reason: None,
            headers: HeaderMap::new(),
            content_length: None,
            buffer: Vec::new(),
            output,
            committed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// A status line reason phrase overriding the canonical one for
    /// `status` (the spec's "reason" field), e.g. for custom error pages.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_content_type(&mut self, value: impl Into<HeaderValue>) {
        self.headers.insert(http::header::CONTENT_TYPE, value.into());
    }

    pub fn set_content_length(&mut self, len: u64) {
        self.content_length = Some(len);
        if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
            self.headers.insert(http::header::CONTENT_LENGTH, value);
        }
    }

    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    /// Append bytes to the response body, running the write through the
    /// output interceptor chain first. The first successful write commits
    /// the response (§4.4: "`committed` is monotonic" — once true, it
    /// never goes back to false, even across `reset`).
    ///
    /// Rejected once [`Channel::complete`](crate::channel::Channel::complete)
    /// has closed this response (§8 scenario 6: "write-after-complete ...
    /// write is rejected with IllegalState").
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), CoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::ResponseClosed);
        }
        self.output.write(chunk.len())?;
        self.buffer.extend_from_slice(chunk);
        self.committed.store(true, Ordering::Release);
        Ok(())
    }

    /// Close this response to further writes. Called by `Channel` once the
    /// exchange completes; idempotent.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.buffer
    }

    /// Reset status, headers, reason, and the buffered body back to their
    /// defaults, for the `forward` use case (§4.4: "reset for forward").
    /// Only legal before the response has committed; per the monotonic
    /// invariant, a committed response can never be reset.
    pub fn reset(&mut self) -> Result<(), CoreError> {
        if self.is_committed() {
            return Err(CoreError::HandlerRuntime(
                "cannot reset an already-committed response".into(),
            ));
        }
        self.status = StatusCode::OK;
        self.reason = None;
        self.headers.clear();
        self.content_length = None;
        self.buffer.clear();
        Ok(())
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("committed", &self.is_committed())
            .field("body_len", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Response {
        Response::new(Arc::new(OutputChain::new()))
    }

    #[test]
    fn write_commits_response() {
        let mut resp = sample();
        assert!(!resp.is_committed());
        resp.write(b"hello world\n").unwrap();
        assert!(resp.is_committed());
        assert_eq!(resp.body(), b"hello world\n");
    }

    #[test]
    fn reset_before_commit_clears_state() {
        let mut resp = sample();
        resp.set_status(StatusCode::NOT_FOUND);
        resp.set_content_type("text/plain");
        resp.reset().unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().is_empty());
    }

    #[test]
    fn reset_after_commit_is_rejected() {
        let mut resp = sample();
        resp.write(b"x").unwrap();
        assert!(resp.reset().is_err());
    }

    #[test]
    fn write_after_close_is_rejected() {
        let mut resp = sample();
        resp.close();
        let err = resp.write(b"too late").unwrap_err();
        assert!(matches!(err, CoreError::ResponseClosed));
        assert!(resp.body().is_empty());
    }

    #[test]
    fn set_content_length_sets_header() {
        let mut resp = sample();
        resp.set_content_length(12);
        assert_eq!(resp.content_length(), Some(12));
        assert_eq!(
            resp.headers().get(http::header::CONTENT_LENGTH).unwrap(),
            "12"
        );
    }
}
