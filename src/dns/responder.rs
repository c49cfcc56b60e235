//! DNS responder
//!
//! A UDP DNS server that forges A/AAAA answers for allow-listed suffixes
//! and relays everything else to the upstream servers. Stateless: no
//! cache, no coalescing; every received datagram is handled on its own
//! task.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, RData, Record, RecordType};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::upstream::{servfail, Upstreams};
use crate::error::DnsError;
use crate::rules::SuffixMatcher;

/// Maximum DNS message size over UDP (with EDNS0)
const MAX_UDP_MESSAGE_SIZE: usize = 4096;

/// TTL for forged A/AAAA answers
const SPOOF_TTL: u32 = 60;

/// What to do with a parsed request
#[derive(Debug)]
pub(crate) enum ResponsePlan {
    /// Answer locally with the given message
    Forge(Message),
    /// Relay the whole raw message upstream
    Forward,
}

/// DNS responder service
pub struct DnsResponder {
    socket: Arc<UdpSocket>,
    spoof_ip: IpAddr,
    matcher: Arc<SuffixMatcher>,
    upstreams: Arc<Upstreams>,
}

impl DnsResponder {
    /// Bind the responder socket
    ///
    /// # Errors
    ///
    /// Returns `DnsError::Bind` if the address cannot be bound; this is
    /// fatal at startup.
    pub async fn bind(
        addr: SocketAddr,
        spoof_ip: IpAddr,
        matcher: Arc<SuffixMatcher>,
        upstreams: Arc<Upstreams>,
    ) -> Result<Self, DnsError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DnsError::Bind { addr, source })?;

        Ok(Self {
            socket: Arc::new(socket),
            spoof_ip,
            matcher,
            upstreams,
        })
    }

    /// Local address of the responder socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run the responder until the shutdown signal fires.
    ///
    /// Per-query failures are logged and dropped; they never terminate the
    /// server.
    ///
    /// # Errors
    ///
    /// Only returns an error for failures of the socket itself.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DnsError> {
        info!("DNS responder listening on {}", self.local_addr()?);

        let mut buf = [0u8; MAX_UDP_MESSAGE_SIZE];

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("DNS responder shutting down");
                    break;
                }
                recv = self.socket.recv_from(&mut buf) => {
                    let (n, peer) = match recv {
                        Ok(r) => r,
                        Err(err) => {
                            error!("DNS recv error: {}", err);
                            time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                    };

                    let query = QueryContext {
                        socket: Arc::clone(&self.socket),
                        spoof_ip: self.spoof_ip,
                        matcher: Arc::clone(&self.matcher),
                        upstreams: Arc::clone(&self.upstreams),
                    };
                    let raw = buf[..n].to_vec();
                    tokio::spawn(async move { query.handle(raw, peer).await });
                }
            }
        }

        Ok(())
    }
}

/// Everything one in-flight query needs, detached from the accept loop
struct QueryContext {
    socket: Arc<UdpSocket>,
    spoof_ip: IpAddr,
    matcher: Arc<SuffixMatcher>,
    upstreams: Arc<Upstreams>,
}

impl QueryContext {
    async fn handle(self, raw: Vec<u8>, peer: SocketAddr) {
        let request = match Message::from_vec(&raw) {
            Ok(m) => m,
            Err(err) => {
                debug!("malformed DNS message from {}: {}", peer, err);
                return;
            }
        };

        let reply = match plan_response(&request, &self.matcher, self.spoof_ip) {
            ResponsePlan::Forge(response) => match response.to_vec() {
                Ok(bytes) => bytes,
                Err(err) => {
                    error!("DNS response encode error: {}", err);
                    return;
                }
            },
            ResponsePlan::Forward => match self.upstreams.forward(&raw).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("upstream forwarding failed for {}: {}", peer, err);
                    match servfail(&request).to_vec() {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            error!("SERVFAIL encode error: {}", err);
                            return;
                        }
                    }
                }
            },
        };

        // Write failures are dropped; the client will retry.
        if let Err(err) = self.socket.send_to(&reply, peer).await {
            debug!("DNS send error to {}: {}", peer, err);
        }
    }
}

/// Decide between forging a local answer and relaying upstream.
///
/// Questions are walked in order; the first name that misses the
/// allow-list, or the first matched question of a type other than A/AAAA,
/// short-circuits the whole message to upstream forwarding. (Multi-question
/// messages are vanishingly rare; relaying the entire message keeps the
/// upstream's view of it intact.)
pub(crate) fn plan_response(
    request: &Message,
    matcher: &SuffixMatcher,
    spoof_ip: IpAddr,
) -> ResponsePlan {
    let mut answers: Vec<Record> = Vec::new();

    for query in request.queries() {
        let name = query.name().to_string();

        if !matcher.matches(&name) {
            debug!("query {} not in allow-list, forwarding", name);
            return ResponsePlan::Forward;
        }

        match query.query_type() {
            RecordType::A => {
                if let IpAddr::V4(v4) = spoof_ip {
                    debug!("spoofing A {} -> {}", name, v4);
                    let mut record =
                        Record::from_rdata(query.name().clone(), SPOOF_TTL, RData::A(A(v4)));
                    record.set_dns_class(DNSClass::IN);
                    answers.push(record);
                }
            }
            RecordType::AAAA => {
                if let IpAddr::V6(v6) = spoof_ip {
                    debug!("spoofing AAAA {} -> {}", name, v6);
                    let mut record =
                        Record::from_rdata(query.name().clone(), SPOOF_TTL, RData::AAAA(AAAA(v6)));
                    record.set_dns_class(DNSClass::IN);
                    answers.push(record);
                } else {
                    // Empty NOERROR: no AAAA, forcing the IPv4 path.
                    debug!("spoofing AAAA {} -> (empty)", name);
                }
            }
            other => {
                debug!("query {} type {} forwarded upstream", name, other);
                return ResponsePlan::Forward;
            }
        }
    }

    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(false)
        .set_authoritative(false)
        .set_response_code(ResponseCode::NoError);
    for query in request.queries() {
        response.add_query(query.clone());
    }
    for answer in answers {
        response.add_answer(answer);
    }

    ResponsePlan::Forge(response)
}
