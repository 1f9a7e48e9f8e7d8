//! Integration tests for the HTTP front end.
//!
//! The server is started on an ephemeral port and spoken to over a raw
//! socket, so no HTTP client runtime is involved.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;

use projupdate::engine::Engine;
use projupdate::server::UpdateServer;
use projupdate::test_utils::{Fixture, ScriptedTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn roundtrip(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

async fn start(fixture: &Fixture) -> UpdateServer {
    let engine = Arc::new(Engine::new(fixture.root(), Arc::new(ScriptedTransport::new())));
    UpdateServer::start(engine, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap()
}

// ============================================================================
// Request handling
// ============================================================================

#[tokio::test]
async fn test_get_missing_apikey() {
    let fixture = Fixture::new().unwrap();
    let server = start(&fixture).await;

    let response = roundtrip(
        server.addr(),
        "GET /?action=basic_check&slug=foo HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("text/plain; charset=utf-8"));
    assert!(!response.contains(r#"s:7:"missing";"#));
    assert!(response.contains(r#"s:9:"errorCode";i:8;"#));
}

#[tokio::test]
async fn test_post_form_body() {
    let fixture = Fixture::new().unwrap();
    let server = start(&fixture).await;
    let body = "action=plugin_information&slug=foo&apikey=k";

    let response = roundtrip(
        server.addr(),
        &format!(
            "POST / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
             Content-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ),
    )
    .await;

    // No globalSettings.json below the fixture root.
    assert!(response.contains(r#"s:9:"errorCode";i:11;"#));
    assert!(response.contains(r#"s:4:"slug";s:3:"foo";"#));
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let fixture = Fixture::new().unwrap();
    let mut server = start(&fixture).await;
    let addr = server.addr();
    assert_eq!(server.url(), format!("http://{}/", addr));

    server.shutdown();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert!(TcpStream::connect(addr).await.is_err());
}
