//! UDP sink integration tests: datagrams are absorbed and counted, never
//! answered over UDP.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time;

use spoof_router::sink::UdpSink;

#[tokio::test]
async fn quic_probe_is_absorbed_and_counted() {
    let sink = UdpSink::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = sink.local_addr().unwrap();
    let stats = sink.stats();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(sink.run(shutdown_rx));

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // A QUIC-Initial-sized probe.
    let probe = vec![0xC0u8; 1200];
    client.send_to(&probe, addr).await.unwrap();

    // No UDP response ever comes back.
    let mut buf = [0u8; 64];
    let response = time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
    assert!(response.is_err(), "sink must never answer over UDP");

    assert_eq!(stats.dropped(), 1);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn counters_are_monotonic_across_many_probes() {
    let sink = UdpSink::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = sink.local_addr().unwrap();
    let stats = sink.stats();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(sink.run(shutdown_rx));

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for i in 0..25u8 {
        client.send_to(&[i; 100], addr).await.unwrap();
    }

    // Allow the drop loop to drain the socket.
    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stats.dropped(), 25);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn binds_ipv4_even_for_wildcard_v6_address() {
    let sink = UdpSink::bind("[::]:0".parse().unwrap()).await.unwrap();
    let addr = sink.local_addr().unwrap();
    assert!(addr.is_ipv4());
}
