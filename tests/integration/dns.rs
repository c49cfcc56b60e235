//! DNS responder integration tests: forge, forward, SERVFAIL fallback.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time;

use spoof_router::dns::{DnsResponder, Upstreams};
use spoof_router::rules::SuffixMatcher;

const SPOOF_IP: Ipv4Addr = Ipv4Addr::new(95, 164, 123, 192);

async fn spawn_responder(
    suffixes: &[&str],
    upstreams: Vec<SocketAddr>,
    upstream_timeout: Duration,
) -> (SocketAddr, broadcast::Sender<()>) {
    let matcher = Arc::new(SuffixMatcher::new(suffixes.iter().copied()));
    let upstreams = Arc::new(Upstreams::new(upstreams, upstream_timeout));

    let responder = DnsResponder::bind(
        "127.0.0.1:0".parse().unwrap(),
        IpAddr::V4(SPOOF_IP),
        matcher,
        upstreams,
    )
    .await
    .unwrap();
    let addr = responder.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(responder.run(shutdown_rx));
    time::sleep(Duration::from_millis(10)).await;

    (addr, shutdown_tx)
}

fn build_query(id: u16, name: &str, rtype: RecordType) -> Message {
    let mut query = Message::new();
    query
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    query.add_query(Query::query(Name::from_str(name).unwrap(), rtype));
    query
}

async fn exchange(server: SocketAddr, query: &Message) -> Vec<u8> {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&query.to_vec().unwrap(), server)
        .await
        .unwrap();

    let mut buf = [0u8; 4096];
    let (n, _) = time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("responder must answer")
        .unwrap();
    buf[..n].to_vec()
}

#[tokio::test]
async fn forges_a_record_for_listed_suffix() {
    let (server, _shutdown) =
        spawn_responder(&[".openai.com"], Vec::new(), Duration::from_secs(1)).await;

    let query = build_query(0x1111, "api.openai.com.", RecordType::A);
    let raw = exchange(server, &query).await;
    let response = Message::from_vec(&raw).unwrap();

    assert_eq!(response.id(), 0x1111);
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(!response.authoritative());
    assert_eq!(response.answers().len(), 1);

    let answer = &response.answers()[0];
    assert_eq!(answer.record_type(), RecordType::A);
    assert_eq!(answer.ttl(), 60);
    assert_eq!(answer.data(), Some(&RData::A(A(SPOOF_IP))));
}

#[tokio::test]
async fn forges_regardless_of_case_and_dots() {
    let (server, _shutdown) =
        spawn_responder(&["openai.com"], Vec::new(), Duration::from_secs(1)).await;

    let query = build_query(0x2222, "API.OpenAI.COM.", RecordType::A);
    let response = Message::from_vec(&exchange(server, &query).await).unwrap();

    assert_eq!(response.answers().len(), 1);
    assert_eq!(response.answers()[0].data(), Some(&RData::A(A(SPOOF_IP))));
}

#[tokio::test]
async fn aaaa_for_listed_suffix_is_empty_noerror() {
    let (server, _shutdown) =
        spawn_responder(&[".openai.com"], Vec::new(), Duration::from_secs(1)).await;

    let query = build_query(0x3333, "chat.openai.com.", RecordType::AAAA);
    let response = Message::from_vec(&exchange(server, &query).await).unwrap();

    assert_eq!(response.id(), 0x3333);
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response.answers().is_empty());
    assert_eq!(response.queries().len(), 1);
}

#[tokio::test]
async fn forwards_unlisted_name_verbatim() {
    // A cooperative upstream answering with distinctive flags; the
    // responder must relay its bytes untouched.
    let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let (sent_tx, sent_rx) = tokio::sync::oneshot::channel::<Vec<u8>>();

    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        let (n, peer) = upstream.recv_from(&mut buf).await.unwrap();
        let request = Message::from_vec(&buf[..n]).unwrap();

        let mut response = Message::new();
        response
            .set_id(request.id())
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .set_recursion_available(true)
            .set_authentic_data(true)
            .set_response_code(ResponseCode::NoError);
        for query in request.queries() {
            response.add_query(query.clone());
        }
        response.add_answer(Record::from_rdata(
            request.queries()[0].name().clone(),
            3600,
            RData::A(A(Ipv4Addr::new(93, 184, 216, 34))),
        ));

        let bytes = response.to_vec().unwrap();
        upstream.send_to(&bytes, peer).await.unwrap();
        let _ = sent_tx.send(bytes);
    });

    let (server, _shutdown) = spawn_responder(
        &[".openai.com"],
        vec![upstream_addr],
        Duration::from_secs(1),
    )
    .await;

    let query = build_query(0x4444, "example.org.", RecordType::A);
    let raw = exchange(server, &query).await;

    // Byte-for-byte identical to what the upstream produced: flags, AD
    // bit and all.
    let upstream_bytes = sent_rx.await.unwrap();
    assert_eq!(raw, upstream_bytes);

    let response = Message::from_vec(&raw).unwrap();
    assert!(response.recursion_available());
    assert!(response.authentic_data());
    assert_eq!(
        response.answers()[0].data(),
        Some(&RData::A(A(Ipv4Addr::new(93, 184, 216, 34))))
    );
}

#[tokio::test]
async fn forwards_non_address_types_for_listed_suffix() {
    let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        let (n, peer) = upstream.recv_from(&mut buf).await.unwrap();
        let request = Message::from_vec(&buf[..n]).unwrap();

        let mut response = Message::new();
        response
            .set_id(request.id())
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_response_code(ResponseCode::NoError);
        for query in request.queries() {
            response.add_query(query.clone());
        }
        upstream
            .send_to(&response.to_vec().unwrap(), peer)
            .await
            .unwrap();
    });

    let (server, _shutdown) = spawn_responder(
        &[".openai.com"],
        vec![upstream_addr],
        Duration::from_secs(1),
    )
    .await;

    // MX for a listed name still goes upstream; only A/AAAA are forged.
    let query = build_query(0x5555, "openai.com.", RecordType::MX);
    let response = Message::from_vec(&exchange(server, &query).await).unwrap();
    assert_eq!(response.id(), 0x5555);
    assert!(response.answers().is_empty());
}

#[tokio::test]
async fn servfail_when_all_upstreams_dead() {
    // Bound but mute sockets: every attempt times out.
    let dead1 = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let dead2 = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let upstreams = vec![dead1.local_addr().unwrap(), dead2.local_addr().unwrap()];

    let (server, _shutdown) =
        spawn_responder(&[".openai.com"], upstreams, Duration::from_millis(150)).await;

    let query = build_query(0x6666, "example.org.", RecordType::A);
    let response = Message::from_vec(&exchange(server, &query).await).unwrap();

    assert_eq!(response.id(), 0x6666);
    assert_eq!(response.response_code(), ResponseCode::ServFail);
    assert_eq!(response.queries().len(), 1);
    assert_eq!(
        response.queries()[0].name().to_string(),
        "example.org."
    );

    drop(dead1);
    drop(dead2);
}

#[tokio::test]
async fn concurrent_queries_answered_independently() {
    let (server, _shutdown) =
        spawn_responder(&[".openai.com"], Vec::new(), Duration::from_secs(1)).await;

    let mut tasks = Vec::new();
    for i in 0..16u16 {
        tasks.push(tokio::spawn(async move {
            let query = build_query(0x7000 + i, "api.openai.com.", RecordType::A);
            let response = Message::from_vec(&exchange(server, &query).await).unwrap();
            assert_eq!(response.id(), 0x7000 + i);
            assert_eq!(response.answers().len(), 1);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}
