//! Trusted out-of-band resolver
//!
//! The proxy must never resolve backend hosts through this process's own
//! DNS responder: the system resolver is commonly pointed at it, which
//! would loop every lookup straight back into the spoof path. This
//! resolver issues plain UDP DNS directly to the configured trusted
//! server, bypassing the system resolver entirely.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::ProxyError;

/// Response buffer size, sized for EDNS0 payloads
const UDP_RECV_BUFFER_SIZE: usize = 4096;

/// DNS resolver wired to a single trusted server
#[derive(Debug, Clone)]
pub struct TrustedResolver {
    server: SocketAddr,
    timeout: Duration,
}

impl TrustedResolver {
    /// Create a resolver against `server` with a per-exchange timeout
    #[must_use]
    pub fn new(server: SocketAddr, timeout: Duration) -> Self {
        Self { server, timeout }
    }

    /// The trusted server this resolver queries
    #[must_use]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Resolve `host` to its first address.
    ///
    /// Queries A first; when the A answer set is empty, falls back to AAAA
    /// so IPv6-only backends still resolve.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Resolve` when both lookups fail or return no
    /// addresses.
    pub async fn resolve(&self, host: &str) -> Result<IpAddr, ProxyError> {
        let v4 = self.lookup(host, RecordType::A).await?;
        if let Some(addr) = v4.first() {
            trace!("resolved {} -> {}", host, addr);
            return Ok(*addr);
        }

        debug!("no A records for {}, trying AAAA", host);
        let v6 = self.lookup(host, RecordType::AAAA).await?;
        if let Some(addr) = v6.first() {
            trace!("resolved {} -> {}", host, addr);
            return Ok(*addr);
        }

        Err(ProxyError::resolve(host, "no addresses found"))
    }

    /// One query/response exchange for a single record type
    async fn lookup(&self, host: &str, rtype: RecordType) -> Result<Vec<IpAddr>, ProxyError> {
        let name = Name::from_ascii(host).map_err(|e| ProxyError::resolve(host, e))?;

        let id: u16 = rand::random();
        let mut query = Message::new();
        query
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true);
        query.add_query(Query::query(name, rtype));

        let request = query.to_vec().map_err(|e| ProxyError::resolve(host, e))?;

        let bind_addr: SocketAddr = if self.server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.server).await?;
        socket.send(&request).await?;

        let mut buf = vec![0u8; UDP_RECV_BUFFER_SIZE];
        let n = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ProxyError::resolve(host, "resolver timed out"))??;

        let response = Message::from_vec(&buf[..n]).map_err(|e| ProxyError::resolve(host, e))?;
        if response.id() != id {
            return Err(ProxyError::resolve(host, "transaction ID mismatch"));
        }

        Ok(response
            .answers()
            .iter()
            .filter_map(|record| match record.data() {
                Some(RData::A(a)) => Some(IpAddr::V4(a.0)),
                Some(RData::AAAA(aaaa)) => Some(IpAddr::V6(aaaa.0)),
                _ => None,
            })
            .collect())
    }
}
