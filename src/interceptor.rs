//! Input/output interceptor chains (§4.7).
//!
//! An interceptor chain sits in front of the raw body stream; each link
//! must either forward the callback or fail it, exactly once per
//! read/write. This core only ever needs interceptors that *observe*
//! byte counts (for the size-limit pipeline) rather than transform bytes
//! (gzip, chunked re-framing, etc. are the wire adapter's job and out of
//! scope per §1), so the chain is modeled as an ordered list of "does this
//! read/write stay within budget" checks rather than a generic
//! stream-transform pipeline. The "forward or fail exactly once" contract
//! is enforced by latching the chain once any link fails: every write
//! after a failure short-circuits to the same error instead of re-running
//! already-failed interceptors.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use http::StatusCode;

use crate::error::CoreError;

/// One link in an output interceptor chain (§4.7 response size limiting
/// and friends).
pub trait OutputInterceptor: Send + Sync + fmt::Debug {
    /// Observe (and possibly reject) a write of `len` bytes about to be
    /// flushed to the endpoint.
    fn on_write(&self, len: usize) -> Result<(), CoreError>;
}

/// One link in an input interceptor chain (§4.7 request size limiting).
pub trait InputInterceptor: Send + Sync + fmt::Debug {
    /// Observe (and possibly reject) a read of `len` bytes just consumed
    /// from the request body.
    fn on_read(&self, len: usize) -> Result<(), CoreError>;
}

/// An ordered chain of [`OutputInterceptor`]s guarding one response.
#[derive(Debug, Default)]
pub struct OutputChain {
    interceptors: Vec<Box<dyn OutputInterceptor>>,
    failed: AtomicBool,
}

impl OutputChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
            failed: AtomicBool::new(false),
        }
    }

    pub fn push(&mut self, interceptor: Box<dyn OutputInterceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Run `len` through every interceptor in order. Once any interceptor
    /// fails, the chain is latched shut: all subsequent writes on this
    /// response fail immediately without re-entering already-failed
    /// interceptors.
    pub fn write(&self, len: usize) -> Result<(), CoreError> {
        if self.failed.load(Ordering::Acquire) {
            return Err(CoreError::SizeLimitExceeded {
                status: StatusCode::INTERNAL_SERVER_ERROR,
            });
        }
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.on_write(len) {
                self.failed.store(true, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// An ordered chain of [`InputInterceptor`]s guarding one request body.
#[derive(Debug, Default)]
pub struct InputChain {
    interceptors: Vec<Box<dyn InputInterceptor>>,
    failed: AtomicBool,
}

impl InputChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
            failed: AtomicBool::new(false),
        }
    }

    pub fn push(&mut self, interceptor: Box<dyn InputInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn read(&self, len: usize) -> Result<(), CoreError> {
        if self.failed.load(Ordering::Acquire) {
            return Err(CoreError::SizeLimitExceeded {
                status: StatusCode::PAYLOAD_TOO_LARGE,
            });
        }
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.on_read(len) {
                self.failed.store(true, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Fails once the cumulative response body exceeds `limit` bytes, per the
/// independent response-side size limit of §4.7 ("exceeding the limit
/// fails the current write callback and raises a status 500 bad-message
/// error").
#[derive(Debug)]
pub struct ResponseLimitInterceptor {
    limit: u64,
    written: AtomicU64,
}

impl ResponseLimitInterceptor {
    /// `limit == u64::MAX` is treated as unlimited (the spec's `-1`).
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            written: AtomicU64::new(0),
        }
    }
}

impl OutputInterceptor for ResponseLimitInterceptor {
    fn on_write(&self, len: usize) -> Result<(), CoreError> {
        if self.limit == u64::MAX {
            return Ok(());
        }
        let total = self.written.fetch_add(len as u64, Ordering::AcqRel) + len as u64;
        if total > self.limit {
            return Err(CoreError::SizeLimitExceeded {
                status: StatusCode::INTERNAL_SERVER_ERROR,
            });
        }
        Ok(())
    }
}

/// Fails once the cumulative request body exceeds `limit` bytes, for the
/// chunked/unknown-length case where Content-Length can't be checked
/// eagerly (§4.7: "for chunked or unknown lengths, install an input
/// interceptor that counts bytes read and rejects when exceeded").
#[derive(Debug)]
pub struct RequestLimitInterceptor {
    limit: u64,
    read: AtomicU64,
}

impl RequestLimitInterceptor {
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            read: AtomicU64::new(0),
        }
    }
}

impl InputInterceptor for RequestLimitInterceptor {
    fn on_read(&self, len: usize) -> Result<(), CoreError> {
        if self.limit == u64::MAX {
            return Ok(());
        }
        let total = self.read.fetch_add(len as u64, Ordering::AcqRel) + len as u64;
        if total > self.limit {
            return Err(CoreError::SizeLimitExceeded {
                status: StatusCode::PAYLOAD_TOO_LARGE,
            });
        }
        Ok(())
    }
}

/// Eagerly check a declared `Content-Length` against `limit`, per §4.7's
/// "inspect Content-Length eagerly (reject at 413 if greater)". Returns
/// `Ok(())` when there's no limit, no declared length, or the length fits.
pub fn check_declared_length(limit: u64, declared: Option<u64>) -> Result<(), CoreError> {
    if limit == u64::MAX {
        return Ok(());
    }
    if let Some(len) = declared
        && len > limit
    {
        return Err(CoreError::SizeLimitExceeded {
            status: StatusCode::PAYLOAD_TOO_LARGE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_limit_rejects_once_exceeded() {
        let interceptor = ResponseLimitInterceptor::new(10);
        assert!(interceptor.on_write(6).is_ok());
        assert!(interceptor.on_write(4).is_ok());
        let err = interceptor.on_write(1).unwrap_err();
        matches!(err, CoreError::SizeLimitExceeded { status } if status == StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn output_chain_latches_after_first_failure() {
        let mut chain = OutputChain::new();
        chain.push(Box::new(ResponseLimitInterceptor::new(4)));
        assert!(chain.write(3).is_ok());
        assert!(chain.write(3).is_err());
        // latched: a subsequent small write still fails immediately.
        assert!(chain.write(0).is_err());
    }

    #[test]
    fn unlimited_response_never_rejects() {
        let interceptor = ResponseLimitInterceptor::new(u64::MAX);
        for _ in 0..1000 {
            assert!(interceptor.on_write(1 << 20).is_ok());
        }
    }

    #[test]
    fn declared_length_over_limit_is_413() {
        let err = check_declared_length(10, Some(20)).unwrap_err();
        matches!(err, CoreError::SizeLimitExceeded { status } if status == StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn request_limit_rejects_unknown_length_once_exceeded() {
        let interceptor = RequestLimitInterceptor::new(5);
        assert!(interceptor.on_read(5).is_ok());
        assert!(interceptor.on_read(1).is_err());
    }
}
