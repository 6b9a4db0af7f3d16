//! [`Acceptor`] (§4.1): owns a listener, runs `N` accept-loop workers, and
//! tracks per-connector statistics with graceful shutdown.
//!
//! Worker/connection lifecycle is grounded in `tokio-graceful`'s guard
//! model the way `rama-core::graceful` re-exports and uses it (see e.g.
//! `tokio_tcp_echo_server.rs`'s `Shutdown::spawn_task_fn`/`ShutdownGuard`
//! pairing): each worker task is spawned with its own guard so `stop()`
//! can wait for every in-flight accept loop *and* every connection it
//! handed off, rather than severing either.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio_graceful::{Shutdown, ShutdownGuard};
use tracing::{debug, info, warn};

use crate::error::BoxError;
use crate::factory::ConnectionFactory;
use crate::stats::ConnectorStats;

/// Acceptor tuning (§4.1: "allocate N acceptor workers (N ≤ 2·cpu,
/// configurable)").
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    pub workers: usize,
    pub nodelay: bool,
    pub stop_timeout: Duration,
}

impl AcceptorConfig {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            ..Self::default()
        }
    }
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            workers: (2 * cpus).max(1),
            nodelay: true,
            stop_timeout: Duration::from_secs(30),
        }
    }
}

/// Binds a listener and drives §4.1's accept loop across `config.workers`
/// tasks, handing each accepted endpoint to `factory`.
pub struct Acceptor {
    config: AcceptorConfig,
    factory: Arc<dyn ConnectionFactory>,
    stats: Arc<ConnectorStats>,
    shutdown: Shutdown,
}

impl Acceptor {
    #[must_use]
    pub fn new(config: AcceptorConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            config,
            factory,
            stats: Arc::new(ConnectorStats::new()),
            shutdown: Shutdown::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<ConnectorStats> {
        self.stats.clone()
    }

    /// Bind `addr` and spawn `config.workers` accept-loop tasks (§4.1's
    /// `start()`). Fails fast if the listener cannot be bound.
    pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr, BoxError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Box::new(e) as BoxError)?;
        let local_addr = listener.local_addr().map_err(|e| Box::new(e) as BoxError)?;
        info!(addr = %local_addr, workers = self.config.workers, "acceptor starting");
        let listener = Arc::new(listener);

        for worker in 0..self.config.workers {
            let listener = listener.clone();
            let factory = self.factory.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            self.shutdown.spawn_task_fn(move |guard| async move {
                Self::accept_loop(worker, listener, factory, stats, config, guard).await;
            });
        }
        Ok(local_addr)
    }

    async fn accept_loop(
        worker: usize,
        listener: Arc<TcpListener>,
        factory: Arc<dyn ConnectionFactory>,
        stats: Arc<ConnectorStats>,
        config: AcceptorConfig,
        guard: ShutdownGuard,
    ) {
        loop {
            let accepted = tokio::select! {
                biased;
                () = guard.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, _peer)) => {
                    if config.nodelay {
                        let _ = stream.set_nodelay(true);
                    }
                    stats.connection_opened();
                    let conn = factory.new_connection(Box::new(stream));
                    let stats = stats.clone();
                    let started = Instant::now();
                    guard.spawn_task(async move {
                        let served = match conn.run(bytes::Bytes::new()).await {
                            Ok(served) => served,
                            Err(e) => {
                                warn!(error = %e, "connection ended with error");
                                0
                            }
                        };
                        stats.connection_closed(started.elapsed(), served);
                    });
                }
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "transient accept error");
                }
                Err(e) => {
                    warn!(error = %e, worker, "unrecoverable accept error, worker exiting");
                    break;
                }
            }
        }
        debug!(worker, "acceptor worker exited");
    }

    /// Signal shutdown and wait for every accept-loop worker and in-flight
    /// connection, up to `config.stop_timeout` (§4.1's `stop()`).
    pub async fn stop(self) -> Result<(), BoxError> {
        let timeout = self.config.stop_timeout;
        self.shutdown
            .shutdown_with_limit(timeout)
            .await
            .map_err(|e| Box::new(e) as BoxError)
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, HttpConnection};
    use crate::endpoint::Endpoint;
    use crate::handler::Handler;
    use crate::rt::Executor;
    use std::future::Future;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct OkHandler;

    impl Handler for OkHandler {
        fn handle(
            &self,
            _target: String,
            channel: Arc<crate::channel::Channel>,
        ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
            async move {
                channel.with_exchange(|_req, resp| resp.write(b"pong").unwrap());
                Ok(true)
            }
        }
    }

    struct TestFactory;

    impl ConnectionFactory for TestFactory {
        fn protocol(&self) -> &'static str {
            "http/1.1"
        }

        fn new_connection(&self, endpoint: Box<dyn Endpoint>) -> Connection {
            Connection::Http(HttpConnection::new(
                endpoint,
                Arc::new(OkHandler),
                Executor::new(),
                Duration::from_secs(5),
                u64::MAX,
                u64::MAX,
            ))
        }
    }

    #[tokio::test]
    async fn accepts_a_connection_and_tracks_stats() {
        let acceptor = Acceptor::new(
            AcceptorConfig::new(1),
            Arc::new(TestFactory),
        );
        let addr = acceptor
            .start("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert!(String::from_utf8(response).unwrap().ends_with("pong"));

        // give the spawned connection task a tick to record closure.
        tokio::task::yield_now().await;
        assert!(acceptor.stats().total_connections() >= 1);

        acceptor.stop().await.unwrap();
    }
}
