//! [`Server`] (§4.8, added): compose §4.1–§4.7 into a single embeddable
//! entry point.
//!
//! Shaped after `rama_http_core::server::conn::{http1,auto}::Builder`: a
//! small builder carrying fixed connection options, exposing both a
//! `serve_connection` method for a caller-driven accept loop (the
//! `Builder::serve_connection` shape) and a `listen` path that owns a full
//! [`Acceptor`] for the common case.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::acceptor::{Acceptor, AcceptorConfig};
use crate::connection::{Connection, HttpConnection};
use crate::endpoint::Endpoint;
use crate::error::BoxError;
use crate::factory::ConnectionFactory;
use crate::handler::Handler;
use crate::rt::Executor;

/// Fixed per-connection options a [`Server`] hands every [`Connection`] it
/// builds: §4.6's default async-cycle timeout and §4.7's independent
/// request/response size limits, plus the [`AcceptorConfig`] `listen` uses.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub default_timeout: Duration,
    pub response_limit: u64,
    pub request_limit: u64,
    pub acceptor: AcceptorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            response_limit: u64::MAX,
            request_limit: u64::MAX,
            acceptor: AcceptorConfig::default(),
        }
    }
}

/// The embeddable entry point: a fixed [`Handler`] chain plus
/// [`ServerConfig`], able to either drive one caller-supplied [`Endpoint`]
/// directly or bind and run a full [`Acceptor`].
#[derive(Clone)]
pub struct Server {
    handler: Arc<dyn Handler>,
    config: ServerConfig,
    executor: Executor,
}

impl Server {
    #[must_use]
    pub fn new(handler: Arc<dyn Handler>, config: ServerConfig) -> Self {
        Self {
            handler,
            config,
            executor: Executor::new(),
        }
    }

    /// Use `executor` (typically built with [`Executor::graceful`]) for
    /// every connection this server drives, instead of a plain untracked
    /// one.
    #[must_use]
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    /// Drive a single already-accepted endpoint through one HTTP/1.1
    /// connection lifecycle, analogous to
    /// `rama_http_core::server::conn::http1::Builder::serve_connection`:
    /// the caller owns accepting `endpoint`, this method owns everything
    /// from there on.
    pub async fn serve_connection<IO: Endpoint>(&self, endpoint: IO) -> Result<(), BoxError> {
        let conn = HttpConnection::new(
            Box::new(endpoint),
            self.handler.clone(),
            self.executor.clone(),
            self.config.default_timeout,
            self.config.response_limit,
            self.config.request_limit,
        );
        conn.run(Bytes::new()).await.map(|_served| ())
    }

    /// Bind `addr` and run a full [`Acceptor`] (§4.1) built from this
    /// server's handler and config. The returned `Acceptor` is the handle
    /// a caller uses for statistics and graceful `stop()`.
    pub async fn listen(&self, addr: SocketAddr) -> Result<Acceptor, BoxError> {
        let factory: Arc<dyn ConnectionFactory> = Arc::new(HttpFactory {
            handler: self.handler.clone(),
            executor: self.executor.clone(),
            default_timeout: self.config.default_timeout,
            response_limit: self.config.response_limit,
            request_limit: self.config.request_limit,
        });
        let acceptor = Acceptor::new(self.config.acceptor.clone(), factory);
        acceptor.start(addr).await?;
        Ok(acceptor)
    }
}

struct HttpFactory {
    handler: Arc<dyn Handler>,
    executor: Executor,
    default_timeout: Duration,
    response_limit: u64,
    request_limit: u64,
}

impl ConnectionFactory for HttpFactory {
    fn protocol(&self) -> &'static str {
        "http/1.1"
    }

    fn new_connection(&self, endpoint: Box<dyn Endpoint>) -> Connection {
        Connection::Http(HttpConnection::new(
            endpoint,
            self.handler.clone(),
            self.executor.clone(),
            self.default_timeout,
            self.response_limit,
            self.request_limit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::test_support::DuplexEndpoint;
    use crate::error::BoxError;
    use std::future::Future;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct HelloHandler;

    impl Handler for HelloHandler {
        fn handle(
            &self,
            _target: String,
            channel: Arc<crate::channel::Channel>,
        ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
            async move {
                channel.with_exchange(|_req, resp| resp.write(b"hello").unwrap());
                Ok(true)
            }
        }
    }

    #[tokio::test]
    async fn serve_connection_drives_a_caller_owned_endpoint() {
        let server = Server::new(Arc::new(HelloHandler), ServerConfig::default());
        let (mut client, server_half) = tokio::io::duplex(4096);

        let task = tokio::spawn(async move {
            server.serve_connection(DuplexEndpoint(server_half)).await
        });

        client
            .write_all(b"GET /hi HTTP/1.0\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        task.await.unwrap().unwrap();

        assert!(String::from_utf8(response).unwrap().ends_with("hello"));
    }

    #[tokio::test]
    async fn listen_binds_and_serves_over_real_tcp() {
        let server = Server::new(Arc::new(HelloHandler), ServerConfig::default());
        let acceptor = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_eq!(acceptor.stats().total_connections(), 0);
        acceptor.stop().await.unwrap();
    }
}
