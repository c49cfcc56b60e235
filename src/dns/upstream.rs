//! Upstream DNS forwarding
//!
//! Non-spoofed queries are relayed to the configured upstream servers in
//! order, each attempt over a fresh UDP socket with its own timeout. The
//! winning upstream's response bytes are passed back verbatim so every
//! flag, EDNS option and AD bit survives the round trip untouched.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::error::DnsError;

/// Response buffer size: covers EDNS0 payloads well past the classic
/// 512-byte limit.
const UDP_RECV_BUFFER_SIZE: usize = 4096;

/// Ordered upstream DNS servers with a per-attempt timeout
#[derive(Debug)]
pub struct Upstreams {
    servers: Vec<SocketAddr>,
    timeout: Duration,
}

impl Upstreams {
    /// Create a new upstream set
    #[must_use]
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { servers, timeout }
    }

    /// The configured servers, in try order
    #[must_use]
    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// Forward a raw query to the upstreams, first success wins.
    ///
    /// # Errors
    ///
    /// Returns `DnsError::AllUpstreamsFailed` when every server errored or
    /// timed out.
    pub async fn forward(&self, raw_query: &[u8]) -> Result<Vec<u8>, DnsError> {
        for &server in &self.servers {
            match self.exchange(server, raw_query).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    debug!("upstream {} failed: {}", server, err);
                }
            }
        }

        Err(DnsError::AllUpstreamsFailed)
    }

    /// One request/response exchange against a single upstream
    async fn exchange(&self, server: SocketAddr, raw_query: &[u8]) -> Result<Vec<u8>, DnsError> {
        let bind_addr: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(server).await?;
        socket.send(raw_query).await?;

        let mut buf = vec![0u8; UDP_RECV_BUFFER_SIZE];
        let n = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| DnsError::UpstreamTimeout { server })??;
        buf.truncate(n);

        Ok(buf)
    }
}

/// Build a SERVFAIL response carrying the request's transaction ID and
/// question section.
#[must_use]
pub fn servfail(request: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(false)
        .set_authoritative(false)
        .set_response_code(ResponseCode::ServFail);
    for query in request.queries() {
        response.add_query(query.clone());
    }
    response
}
