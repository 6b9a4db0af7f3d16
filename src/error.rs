//! Error types shared across the runtime core.
//!
//! Following the teacher crate's doctrine: if something is an error, it
//! behaves like one (`std::error::Error`), and concrete error types are
//! hand-written rather than generated, so that downstream code can match on
//! a taxonomy without downcasting. [`BoxError`] and [`OpaqueError`] are the
//! common currency at module boundaries where the concrete type isn't
//! interesting.

use std::fmt;

/// A type-erased error, boxed at the point it crosses a module boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A type-erased error that can still be downcast to its origin.
///
/// Not intended to carry protocol meaning; use [`CoreError`] for that.
#[repr(transparent)]
pub struct OpaqueError(BoxError);

impl OpaqueError {
    pub fn from_std(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(error))
    }

    pub fn from_display(msg: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::from_std(MessageError(msg))
    }

    pub fn from_boxed(inner: BoxError) -> Self {
        Self(inner)
    }

    pub fn into_boxed(self) -> BoxError {
        self.0
    }

    pub fn downcast_ref<T: std::error::Error + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for OpaqueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<BoxError> for OpaqueError {
    fn from(error: BoxError) -> Self {
        Self(error)
    }
}

#[repr(transparent)]
struct MessageError<M>(M);

impl<M: fmt::Display + fmt::Debug> fmt::Debug for MessageError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<M: fmt::Display + fmt::Debug> fmt::Display for MessageError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<M: fmt::Display + fmt::Debug + 'static> std::error::Error for MessageError<M> {}

/// Attach ad hoc context to a `Result`/`Option` at the call site.
pub trait ErrorContext<T> {
    fn context(self, msg: &'static str) -> Result<T, OpaqueError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T, OpaqueError> {
        self.map_err(|e| OpaqueError::from_std(ContextError {
            msg,
            source: Box::new(e),
        }))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, msg: &'static str) -> Result<T, OpaqueError> {
        self.ok_or_else(|| OpaqueError::from_display(msg))
    }
}

#[derive(Debug)]
struct ContextError {
    msg: &'static str,
    source: BoxError,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.msg, self.source)
    }
}

impl std::error::Error for ContextError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// The error taxonomy of §7: kinds a caller can match on without
/// downcasting a [`BoxError`].
#[derive(Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// The transport closed, discovered while accepting or reading.
    TransportClosed,
    /// Malformed request framing; carries the status that should be sent
    /// back and a short human-readable reason.
    BadMessage {
        status: http::StatusCode,
        reason: &'static str,
    },
    /// An async cycle's deadline elapsed without `complete()`/`dispatch()`.
    Timeout,
    /// A handler raised synchronously or asynchronously.
    HandlerRuntime(BoxError),
    /// A configuration value was invalid; only ever raised at `start()`.
    ConfigurationInvalid(String),
    /// No configured `ConnectionFactory`/`Detector` recognized the
    /// connection's opening bytes.
    DetectionFailed,
    /// A `Connection` was asked to upgrade to a protocol with no factory.
    UpgradeUnsupported,
    /// A request or response body exceeded its configured size limit.
    SizeLimitExceeded { status: http::StatusCode },
    /// A handler attempted to write to a response after `complete()` had
    /// already closed it (§8 scenario 6).
    ResponseClosed,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportClosed => write!(f, "transport closed"),
            Self::BadMessage { status, reason } => {
                write!(f, "bad message ({status}): {reason}")
            }
            Self::Timeout => write!(f, "async cycle timed out"),
            Self::HandlerRuntime(e) => write!(f, "handler runtime error: {e}"),
            Self::ConfigurationInvalid(msg) => write!(f, "invalid configuration: {msg}"),
            Self::DetectionFailed => write!(f, "no connection factory recognized the connection"),
            Self::UpgradeUnsupported => write!(f, "upgrade to unsupported protocol requested"),
            Self::SizeLimitExceeded { status } => write!(f, "size limit exceeded ({status})"),
            Self::ResponseClosed => write!(f, "write is illegal once the response is completed"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::HandlerRuntime(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
