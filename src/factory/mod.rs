//! Connection factory & protocol detection (§4.2).
//!
//! Structure grounded in `rama-http-core::server::conn::auto`'s
//! `Builder`/version-sniff flow for choosing h1 vs. h2 on the same
//! listener, generalized to an open set of named protocols rather than
//! that module's fixed two.

mod detect;

pub use detect::{tls_heuristic, DetectResult, Detecting, Detector, DetectorOutcome};

use crate::connection::Connection;
use crate::endpoint::Endpoint;

/// A stateless factory, keyed by protocol name, that builds a
/// [`Connection`] around a freshly accepted (or handed-off) endpoint.
pub trait ConnectionFactory: Send + Sync {
    /// The protocol token this factory announces (§4.2).
    fn protocol(&self) -> &'static str;

    /// Build the `Connection` that will drive `endpoint`. A factory used
    /// purely for its `Detecting::detect` verdict (e.g. a TLS sniff stub
    /// with no real handshake implementation available in this core, per
    /// §1's non-goal) is never asked to actually build a connection in
    /// that configuration and can implement this with `unreachable!()`.
    fn new_connection(&self, endpoint: Box<dyn Endpoint>) -> Connection;
}
