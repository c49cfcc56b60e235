//! Proxy integration tests over the public API: policy denial and peek
//! failures never reach a backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tokio::time;

use spoof_router::config::Config;
use spoof_router::proxy::ProxyServer;
use spoof_router::rules::SuffixMatcher;

/// Bind a proxy from a `Config` with ephemeral listener ports and a
/// resolver pointed at a mute socket (any resolution attempt would stall
/// visibly).
async fn spawn_proxy() -> (std::net::SocketAddr, std::net::SocketAddr, UdpSocket) {
    let dead_resolver = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut config = Config::default();
    config.listen.http_tcp = "127.0.0.1:0".parse().unwrap();
    config.listen.https_tcp = "127.0.0.1:0".parse().unwrap();
    config.resolver_dns = dead_resolver.local_addr().unwrap();
    config.timeouts.peek_secs = 1;
    config.timeouts.dial_secs = 1;

    let matcher = Arc::new(SuffixMatcher::new(config.spoof_suffixes.clone()));
    let proxy = ProxyServer::bind(&config, matcher).await.unwrap();

    let http_addr = proxy.http_local_addr().unwrap();
    let https_addr = proxy.https_local_addr().unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(async move { proxy.run(&shutdown_tx).await });
    time::sleep(Duration::from_millis(20)).await;

    (http_addr, https_addr, dead_resolver)
}

#[tokio::test]
async fn disallowed_host_closed_without_response() {
    let (http_addr, _https_addr, _resolver) = spawn_proxy().await;

    let started = std::time::Instant::now();
    let mut client = TcpStream::connect(http_addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: evil.example.com\r\n\r\n")
        .await
        .unwrap();

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).await.unwrap();

    // Closed with no response body, fast: the denial happens before any
    // resolver traffic, so the mute resolver's timeout never comes into
    // play.
    assert!(buf.is_empty());
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn missing_host_header_closed_without_response() {
    let (http_addr, _https_addr, _resolver) = spawn_proxy().await;

    let mut client = TcpStream::connect(http_addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n")
        .await
        .unwrap();

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).await.unwrap();
    assert!(buf.is_empty());
}

#[tokio::test]
async fn non_tls_bytes_on_https_port_closed() {
    let (_http_addr, https_addr, _resolver) = spawn_proxy().await;

    let mut client = TcpStream::connect(https_addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: api.openai.com\r\n\r\n")
        .await
        .unwrap();

    // The peek consumes only the record header before giving up, so the
    // close may surface as a reset instead of a clean EOF.
    let mut buf = Vec::new();
    match client.read_to_end(&mut buf).await {
        Ok(n) => assert_eq!(n, 0),
        Err(err) => assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset),
    }
}

#[tokio::test]
async fn peek_timeout_closes_silent_client() {
    let (http_addr, _https_addr, _resolver) = spawn_proxy().await;

    // Connect and send nothing: the peek deadline (1s here) must close
    // the socket.
    let mut client = TcpStream::connect(http_addr).await.unwrap();

    let mut buf = Vec::new();
    let n = time::timeout(Duration::from_secs(3), client.read_to_end(&mut buf))
        .await
        .expect("peek timeout must close the connection")
        .unwrap();
    assert_eq!(n, 0);
}
