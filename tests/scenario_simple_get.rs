//! §8 scenario 1: a leaf handler with no async cycle, 12 bytes of body.

mod common;

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use sluice::server::{Server, ServerConfig};

use common::DuplexEndpoint;

#[tokio::test]
async fn simple_get_writes_body_with_no_async_cycle() {
    let server = Server::new(
        Arc::new(common::FixedBodyHandler(b"hello world\n")),
        ServerConfig::default(),
    );
    let (mut client, server_half) = tokio::io::duplex(4096);

    let task =
        tokio::spawn(async move { server.serve_connection(DuplexEndpoint(server_half)).await });

    client.write_all(b"GET /ok HTTP/1.0\r\n\r\n").await.unwrap();
    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    task.await.unwrap().unwrap();

    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"), "{response}");
    assert!(response.contains("content-length: 12\r\n"), "{response}");
    assert!(response.ends_with("hello world\n"));
}
