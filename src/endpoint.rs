//! [`Endpoint`]: an owned bidirectional byte stream bound to one remote peer.
//!
//! Grounded in `rama-http-core::proto::h1::conn::Conn<I, B, T>`'s generic
//! bound `I: AsyncRead + AsyncWrite + Unpin`: a [`Connection`] is generic
//! over any such stream rather than hard-coding `TcpStream`, so TLS (or any
//! other byte-stream adapter) slots in without the core knowing about it.
//!
//! [`Connection`]: crate::connection::Connection

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Marker bound satisfied by any owned, bidirectional byte stream that can
/// back a [`Connection`](crate::connection::Connection).
///
/// Exactly one `Connection` owns an `Endpoint` at a time (§3); ownership
/// transfers atomically on upgrade, never by sharing.
pub trait Endpoint: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// The address of the remote peer, if known.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Apply `TCP_NODELAY`. A no-op for streams that aren't backed by TCP.
    fn set_nodelay(&self, enabled: bool) -> std::io::Result<()>;
}

impl Endpoint for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn set_nodelay(&self, enabled: bool) -> std::io::Result<()> {
        TcpStream::set_nodelay(self, enabled)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// An in-memory duplex endpoint for tests, wrapping [`tokio::io::DuplexStream`].
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

        fn poll_flush(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.0).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
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
}
