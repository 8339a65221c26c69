//! Status check, request recognition, and drain behaviour over TCP.

use std::time::Duration;

use super::helpers::TestServer;

/// Request head limit of the test server: `buffer_size * max_buffer_fills`.
const HEAD_LIMIT: usize = 2048;

#[tokio::test]
async fn test_status_check() {
    let server = TestServer::start().await;

    let response = server.raw(b"GET /status HTTP/1.1\r\nHost: rt\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("Connection: close\r\n"));
    assert!(response.ends_with("\r\n\r\nok\n"));

    let response = server.raw(b"HEAD /status HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("\r\n\r\n"), "HEAD must not carry a body");

    server.shutdown().await;
}

#[tokio::test]
async fn test_unroutable_requests_are_refused() {
    let server = TestServer::start().await;

    let response = server.raw(b"POST /status HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 405 "), "{response}");
    assert!(response.contains("Allow: GET, HEAD\r\n"));

    let response = server.raw(b"GET /elsewhere HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 "), "{response}");

    let response = server.raw(b"GET /status HTTP/1.0\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 "), "{response}");

    let response = server
        .raw(
            b"GET /socket HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Version: 8\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await;
    assert!(response.starts_with("HTTP/1.1 426 "), "{response}");
    assert!(response.contains("Sec-WebSocket-Version: 13\r\n"));

    let response = server
        .raw(
            b"GET /socket HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Protocol: v8.real-time.texhub.test\r\n\r\n",
        )
        .await;
    assert!(response.starts_with("HTTP/1.1 400 "), "missing bootstrap: {response}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_heads() {
    let server = TestServer::start().await;

    let mut long_line = b"GET /".to_vec();
    long_line.resize(HEAD_LIMIT, b'a');
    let response = server.raw(&long_line).await;
    assert!(response.starts_with("HTTP/1.1 414 "), "{response}");

    let mut many_headers = b"GET /status HTTP/1.1\r\n".to_vec();
    while many_headers.len() + 16 <= HEAD_LIMIT {
        many_headers.extend_from_slice(b"X-Pad: 12345\r\n");
    }
    many_headers.resize(HEAD_LIMIT, b'x');
    let response = server.raw(&many_headers).await;
    assert!(response.starts_with("HTTP/1.1 431 "), "{response}");

    assert_eq!(server.engine.metrics.snapshot().requests_rejected, 2);
    server.shutdown().await;
}

#[tokio::test]
async fn test_status_turns_503_while_draining() {
    let server = TestServer::start_with(|config| {
        config.server.readiness_grace_ms = 500;
    })
    .await;

    let engine = std::sync::Arc::clone(&server.engine);
    let draining = tokio::spawn(async move { engine.shutdown().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = server.raw(b"GET /status HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 503 "), "{response}");
    assert!(response.ends_with("shutting down\n"));

    let response = server
        .raw(
            b"GET /socket HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await;
    assert!(response.starts_with("HTTP/1.1 503 "), "upgrades refused while draining: {response}");

    draining.await.unwrap();
    server.shutdown().await;
}
