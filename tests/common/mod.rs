//! Shared test doubles for the integration scenario tests, since each
//! `tests/*.rs` file is its own crate and can't reach the library's
//! `#[cfg(test)]`-only `test_support` modules.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use sluice::channel::Channel;
use sluice::endpoint::Endpoint;
use sluice::error::BoxError;
use sluice::handler::Handler;

/// An in-memory duplex endpoint, mirroring the crate's own internal
/// `endpoint::test_support::DuplexEndpoint`.
pub struct DuplexEndpoint(pub tokio::io::DuplexStream);

impl AsyncRead for DuplexEndpoint {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for DuplexEndpoint {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

impl Endpoint for DuplexEndpoint {
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn set_nodelay(&self, _enabled: bool) -> std::io::Result<()> {
        Ok(())
    }
}

/// Writes a fixed byte string and reports itself handled.
pub struct FixedBodyHandler(pub &'static [u8]);

impl Handler for FixedBodyHandler {
    fn handle(
        &self,
        _target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
        async move {
            channel.with_exchange(|_req, resp| resp.write(self.0).unwrap());
            Ok(true)
        }
    }
}

/// Records every invocation, for asserting a handler was never (or was
/// exactly once) reached.
pub struct CountingHandler {
    pub calls: Arc<std::sync::atomic::AtomicUsize>,
    pub handled: bool,
}

impl Handler for CountingHandler {
    fn handle(
        &self,
        _target: String,
        _channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
        async move {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.handled)
        }
    }
}
