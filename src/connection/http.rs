//! [`HttpConnection`]: the per-connection HTTP/1.1 read/dispatch/write loop.
//!
//! Grounded on `rama-http-core::proto::h1::conn::Conn::poll`'s three-phase
//! shape (fill the read buffer, parse what's there, hand complete messages
//! off) and `auto.rs`'s `serve_connection_with_upgrades` for the
//! keep-alive-until-told-otherwise outer loop. Chunked transfer-coding is
//! left to the wire adapter this core treats as an external collaborator
//! (§1); only `Content-Length`-declared and absent bodies are handled here,
//! which is why the request body is materialized eagerly (bounded by the
//! request size limit) rather than streamed lazily across keep-alive
//! boundaries — see DESIGN.md.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};

use crate::channel::Channel;
use crate::endpoint::Endpoint;
use crate::error::{BoxError, CoreError};
use crate::handler::Handler;
use crate::interceptor::{check_declared_length, InputChain};
use crate::request::RequestBody;
use crate::rt::Executor;
use crate::wire;

const READ_CHUNK: usize = 8 * 1024;

/// Drives one accepted HTTP/1.1 [`Endpoint`] through its full request
/// sequence: parse a head, dispatch it through a [`Channel`], write the
/// response, repeat while keep-alive holds.
pub struct HttpConnection {
    endpoint: Box<dyn Endpoint>,
    handler: Arc<dyn Handler>,
    executor: Executor,
    default_timeout: Duration,
    response_limit: u64,
    request_limit: u64,
}

impl HttpConnection {
    #[must_use]
    pub fn new(
        endpoint: Box<dyn Endpoint>,
        handler: Arc<dyn Handler>,
        executor: Executor,
        default_timeout: Duration,
        response_limit: u64,
        request_limit: u64,
    ) -> Self {
        Self {
            endpoint,
            handler,
            executor,
            default_timeout,
            response_limit,
            request_limit,
        }
    }

    /// Run the request loop, returning the number of requests served once
    /// the connection closes (§4.1's per-connection request count, fed back
    /// into [`crate::stats::ConnectorStats::connection_closed`]). `prefix`
    /// carries any bytes already peeled off the endpoint by a
    /// [`crate::connection::DetectorConnection`] (§4.2: "any bytes beyond
    /// the second [are] forwarded to it in order").
    pub async fn run(mut self, prefix: Bytes) -> Result<u64, BoxError> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&prefix);
        let mut served: u64 = 0;

        loop {
            let head = match self.read_head(&mut buf).await {
                Ok(Some(head)) => head,
                Ok(None) => return Ok(served),
                Err(e) => {
                    if let Some(CoreError::BadMessage { status, reason }) =
                        e.downcast_ref::<CoreError>()
                    {
                        let _ = self
                            .write_minimal_response(Version::HTTP_11, *status, reason.as_bytes())
                            .await;
                    }
                    return Err(e);
                }
            };
            buf.advance(head.body_offset);

            let keep_alive = is_keep_alive(head.version, &head.headers);
            served += 1;

            if let Err(CoreError::SizeLimitExceeded { status }) =
                check_declared_length(self.request_limit, head.content_length)
            {
                self.write_minimal_response(head.version, status, b"request body too large")
                    .await?;
                if !keep_alive {
                    return Ok(served);
                }
                continue;
            }

            let body_len = head.content_length.unwrap_or(0) as usize;
            let body_bytes = self.take_body_bytes(&mut buf, body_len).await?;
            let body = RequestBody::new(
                Box::pin(BytesReader::new(body_bytes)),
                Arc::new(InputChain::new()),
            );

            let channel = Channel::new(
                head.method,
                head.target,
                head.uri,
                head.version,
                head.headers,
                head.content_length,
                body,
                self.handler.clone(),
                self.executor.clone(),
                self.default_timeout,
                self.response_limit,
            );
            channel.run().await?;
            channel.wait_completed().await;

            let (status, reason, headers, response_body) = channel.with_exchange(|_req, resp| {
                (
                    resp.status(),
                    resp.reason().map(str::to_string),
                    resp.headers().clone(),
                    resp.body().to_vec(),
                )
            });
            let head_bytes = wire::encode_response_head(
                head.version,
                status,
                reason.as_deref(),
                &headers,
                Some(response_body.len() as u64),
            );
            self.endpoint.write_all(&head_bytes).await.map_err(box_io)?;
            self.endpoint
                .write_all(&response_body)
                .await
                .map_err(box_io)?;
            self.endpoint.flush().await.map_err(box_io)?;

            if !keep_alive {
                return Ok(served);
            }
        }
    }

    async fn read_head(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<wire::ParsedHead>, BoxError> {
        loop {
            match wire::parse_request_head(buf) {
                Ok(Some(head)) => return Ok(Some(head)),
                Ok(None) => {}
                Err(e) => return Err(Box::new(e)),
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.endpoint.read(&mut chunk).await.map_err(box_io)?;
            if n == 0 {
                if buf.is_empty() {
                    return Ok(None);
                }
                return Err(Box::new(CoreError::TransportClosed));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn take_body_bytes(&mut self, buf: &mut BytesMut, len: usize) -> Result<Bytes, BoxError> {
        while buf.len() < len {
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.endpoint.read(&mut chunk).await.map_err(box_io)?;
            if n == 0 {
                return Err(Box::new(CoreError::TransportClosed));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Ok(buf.split_to(len).freeze())
    }

    async fn write_minimal_response(
        &mut self,
        version: Version,
        status: StatusCode,
        body: &[u8],
    ) -> Result<(), BoxError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain"),
        );
        let head_bytes =
            wire::encode_response_head(version, status, None, &headers, Some(body.len() as u64));
        self.endpoint.write_all(&head_bytes).await.map_err(box_io)?;
        self.endpoint.write_all(body).await.map_err(box_io)?;
        self.endpoint.flush().await.map_err(box_io)
    }
}

fn box_io(e: std::io::Error) -> BoxError {
    Box::new(e)
}

/// HTTP/1.0 defaults to close; HTTP/1.1 defaults to keep-alive. Either can
/// be overridden by an explicit `Connection` header.
fn is_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    match headers
        .get(http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
    {
        Some(v) if v.eq_ignore_ascii_case("close") => false,
        Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
        _ => version != Version::HTTP_10,
    }
}

/// Adapts an already fully-read [`Bytes`] body into an [`AsyncRead`], since
/// the request body is materialized up front rather than streamed (see
/// module docs).
struct BytesReader(Bytes);

impl BytesReader {
    fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl AsyncRead for BytesReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let len = std::cmp::min(this.0.len(), buf.remaining());
        if len > 0 {
            let chunk = this.0.split_to(len);
            buf.put_slice(&chunk);
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::test_support::DuplexEndpoint;
    use crate::handler::Handler;
    use std::future::Future;

    struct EchoHandler;

    impl Handler for EchoHandler {
        fn handle(
            &self,
            _target: String,
            channel: Arc<Channel>,
        ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
            async move {
                channel.with_exchange(|_req, resp| {
                    resp.write(b"hi").unwrap();
                });
                Ok(true)
            }
        }
    }

    #[tokio::test]
    async fn serves_a_simple_get_and_closes_on_http_10() {
        let (client, server) = tokio::io::duplex(4096);
        let conn = HttpConnection::new(
            Box::new(DuplexEndpoint(server)),
            Arc::new(EchoHandler),
            Executor::new(),
            Duration::from_secs(5),
            u64::MAX,
            u64::MAX,
        );
        let task = tokio::spawn(conn.run(Bytes::new()));

        let mut client = client;
        client
            .write_all(b"GET /ok HTTP/1.0\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        task.await.unwrap().unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n") || text.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[tokio::test]
    async fn rejects_oversized_declared_length_with_413() {
        let (mut client, server) = tokio::io::duplex(4096);
        let conn = HttpConnection::new(
            Box::new(DuplexEndpoint(server)),
            Arc::new(EchoHandler),
            Executor::new(),
            Duration::from_secs(5),
            u64::MAX,
            10,
        );
        let task = tokio::spawn(conn.run(Bytes::new()));

        client
            .write_all(b"POST /x HTTP/1.0\r\nContent-Length: 999\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        task.await.unwrap().unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 413"));
    }
}
