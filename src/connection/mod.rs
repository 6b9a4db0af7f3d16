//! [`Connection`] (§3): the unit of "one accepted endpoint, driven by one
//! protocol handler until it closes or hands off".
//!
//! §3 describes this entity as polymorphic over
//! `{DetectorConnection, HttpConnection, SslConnection, NextProtocolConnection}`.
//! This core implements the two variants that drive bytes end-to-end;
//! `SslConnection`/`NextProtocolConnection` have no dedicated type here —
//! a real TLS/ALPN handshake is an external collaborator per §1's
//! Non-goals, so any [`crate::factory::ConnectionFactory`] that performs
//! one internally and then constructs a further [`Connection`] (typically
//! [`Connection::Http`]) satisfies those roles without this crate needing
//! to model the handshake itself (see DESIGN.md).

mod http;

pub use http::HttpConnection;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;

use crate::endpoint::Endpoint;
use crate::error::{BoxError, CoreError};
use crate::factory::{Detector, DetectorOutcome};

/// §9's redesign note — "replace exception-for-control-flow upgrade with an
/// explicit return value" — lands here: a [`Connection`] hands itself off
/// by returning, not by unwinding. `run` consuming `self` and fully owning
/// the [`Endpoint`] is what makes that handoff safe: there is never a
/// moment where two `Connection`s share one endpoint.
pub enum Connection {
    Http(HttpConnection),
    Detector(DetectorConnection),
}

impl Connection {
    /// Drive this connection to completion, returning the number of HTTP
    /// requests served once it closes. `prefix` carries bytes a prior
    /// owner of the endpoint already consumed but didn't act on (detector
    /// hand-off); most callers pass `Bytes::new()`.
    pub async fn run(self, prefix: Bytes) -> Result<u64, BoxError> {
        match self {
            Self::Http(conn) => conn.run(prefix).await,
            Self::Detector(conn) => conn.run(prefix).await,
        }
    }
}

/// Peeks an endpoint's first bytes through a [`Detector`] to choose a
/// sub-[`crate::factory::ConnectionFactory`] (§4.2), then hands the
/// endpoint off to the `Connection` that factory builds, forwarding
/// whatever bytes were already read but not consumed.
pub struct DetectorConnection {
    endpoint: Box<dyn Endpoint>,
    detector: Arc<Detector>,
}

impl DetectorConnection {
    #[must_use]
    pub fn new(endpoint: Box<dyn Endpoint>, detector: Arc<Detector>) -> Self {
        Self { endpoint, detector }
    }

    pub async fn run(mut self, prefix: Bytes) -> Result<u64, BoxError> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&prefix);
        let mut live = vec![true; self.detector.len()];

        loop {
            match self.detector.poll(&buf, &mut live) {
                DetectorOutcome::Recognized(i) => {
                    let factory = self.detector.factory(i);
                    let leftover = buf.freeze();
                    let conn = factory.new_connection(self.endpoint);
                    return conn.run(leftover).await;
                }
                DetectorOutcome::NeedMoreBytes => {
                    let mut chunk = [0u8; 4096];
                    let n = self
                        .endpoint
                        .read(&mut chunk)
                        .await
                        .map_err(|e| Box::new(e) as BoxError)?;
                    if n == 0 {
                        return Err(Box::new(CoreError::DetectionFailed));
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                DetectorOutcome::Exhausted => {
                    return match self.detector.fallback() {
                        Some(fallback) => {
                            let leftover = buf.freeze();
                            let conn = fallback.new_connection(self.endpoint);
                            conn.run(leftover).await
                        }
                        None => Err(Box::new(CoreError::DetectionFailed)),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::test_support::DuplexEndpoint;
    use crate::factory::{tls_heuristic, DetectResult, Detecting};
    use crate::factory::ConnectionFactory;
    use crate::handler::Handler;
    use std::future::Future;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    struct OkHandler;

    impl Handler for OkHandler {
        fn handle(
            &self,
            _target: String,
            channel: Arc<crate::channel::Channel>,
        ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
            async move {
                channel.with_exchange(|_req, resp| resp.write(b"ok").unwrap());
                Ok(true)
            }
        }
    }

    struct TlsSniff;

    impl ConnectionFactory for TlsSniff {
        fn protocol(&self) -> &'static str {
            "tls"
        }

        fn new_connection(&self, _endpoint: Box<dyn Endpoint>) -> Connection {
            unreachable!("test only recognizes plaintext HTTP")
        }
    }

    impl Detecting for TlsSniff {
        fn detect(&self, buf: &[u8]) -> DetectResult {
            tls_heuristic(buf)
        }
    }

    struct Http1Fallback;

    impl ConnectionFactory for Http1Fallback {
        fn protocol(&self) -> &'static str {
            "http/1.1"
        }

        fn new_connection(&self, endpoint: Box<dyn Endpoint>) -> Connection {
            Connection::Http(HttpConnection::new(
                endpoint,
                Arc::new(OkHandler),
                crate::rt::Executor::new(),
                Duration::from_secs(5),
                u64::MAX,
                u64::MAX,
            ))
        }
    }

    #[tokio::test]
    async fn falls_back_to_http_when_no_detector_recognizes_plaintext() {
        let (mut client, server) = tokio::io::duplex(4096);
        let detector = Arc::new(
            Detector::new(vec![Arc::new(TlsSniff)], 64).with_fallback(Arc::new(Http1Fallback)),
        );
        let conn = DetectorConnection::new(Box::new(DuplexEndpoint(server)), detector);
        let task = tokio::spawn(conn.run(Bytes::new()));

        client
            .write_all(b"GET /ok HTTP/1.0\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        task.await.unwrap().unwrap();

        assert!(String::from_utf8(response).unwrap().ends_with("ok"));
    }
}
