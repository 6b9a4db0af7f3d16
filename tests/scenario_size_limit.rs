//! §8 scenario 3: a declared body larger than the configured request limit
//! is rejected with 413 before the handler ever runs.

mod common;

use std::sync::{atomic::AtomicUsize, Arc};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use sluice::server::{Server, ServerConfig};

use common::{CountingHandler, DuplexEndpoint};

#[tokio::test]
async fn oversized_declared_length_never_reaches_the_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = CountingHandler {
        calls: calls.clone(),
        handled: true,
    };
    let config = ServerConfig {
        request_limit: 10,
        ..Default::default()
    };
    let server = Server::new(Arc::new(handler), config);
    let (mut client, server_half) = tokio::io::duplex(4096);

    let task =
        tokio::spawn(async move { server.serve_connection(DuplexEndpoint(server_half)).await });

    client
        .write_all(b"POST /upload HTTP/1.0\r\nContent-Length: 20\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    task.await.unwrap().unwrap();

    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.0 413"), "{response}");
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}
