//! UDP sink (QUIC suppression)
//!
//! Binds UDP/443 on IPv4 and discards every datagram, so QUIC Initial
//! packets aimed at the spoof IP go nowhere. When a raw ICMP socket is
//! available, each drop is answered with a Destination-Unreachable /
//! Port-Unreachable to push clients onto TCP immediately; otherwise the
//! sink degrades to silent dropping and clients fall back on their own
//! timers.

mod icmp;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::SinkError;

pub use icmp::IcmpSender;

/// Receive buffer: QUIC Initials run ~1200 bytes; the content is
/// discarded either way.
const RECV_BUFFER_SIZE: usize = 2048;

/// Log each of the first N drops
const LOG_FIRST_DROPS: u64 = 10;

/// After that, log every Nth drop
const LOG_DROP_INTERVAL: u64 = 1000;

/// Cap on logged ICMP send errors
const MAX_LOGGED_ICMP_ERRORS: u64 = 5;

/// Monotonic sink counters
#[derive(Debug, Default)]
pub struct SinkStats {
    dropped: AtomicU64,
    icmp_sent: AtomicU64,
    icmp_errors: AtomicU64,
}

impl SinkStats {
    /// Total datagrams received and discarded
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Total ICMP Port-Unreachable messages sent
    #[must_use]
    pub fn icmp_sent(&self) -> u64 {
        self.icmp_sent.load(Ordering::Relaxed)
    }
}

/// UDP black-hole service
pub struct UdpSink {
    socket: UdpSocket,
    icmp: Option<IcmpSender>,
    stats: Arc<SinkStats>,
}

impl UdpSink {
    /// Bind the sink socket, IPv4 only.
    ///
    /// A host-agnostic or IPv6 address is coerced to `0.0.0.0` so the
    /// sink never absorbs legitimate IPv6 QUIC traffic. The raw ICMP
    /// socket is opened best-effort: without `CAP_NET_RAW` the sink runs
    /// in silent-drop mode.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Bind` if the UDP socket cannot be bound; this
    /// is fatal at startup.
    pub async fn bind(addr: SocketAddr) -> Result<Self, SinkError> {
        let host = match addr.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => ip,
            _ => Ipv4Addr::UNSPECIFIED,
        };
        let v4_addr = SocketAddr::V4(SocketAddrV4::new(host, addr.port()));

        let socket = UdpSocket::bind(v4_addr)
            .await
            .map_err(|source| SinkError::Bind {
                addr: v4_addr,
                source,
            })?;

        let icmp = match IcmpSender::open() {
            Ok(sender) => {
                info!("UDP sink: ICMP Port-Unreachable enabled (fast TCP fallback)");
                Some(sender)
            }
            Err(err) => {
                warn!(
                    "UDP sink: cannot open raw ICMP socket ({}), dropping silently \
                     (clients fall back to TCP on their own timers)",
                    err
                );
                None
            }
        };

        Ok(Self {
            socket,
            icmp,
            stats: Arc::new(SinkStats::default()),
        })
    }

    /// Local address of the sink socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Shared counters
    #[must_use]
    pub fn stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.stats)
    }

    /// Run the drop loop until the shutdown signal fires.
    ///
    /// # Errors
    ///
    /// Only returns an error for failures of the socket itself.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), SinkError> {
        let local_addr = self.local_addr()?;
        info!(
            "UDP sink listening on {} (dropping all QUIC/UDP traffic)",
            local_addr
        );

        let local_v4 = match local_addr {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_addr.port()),
        };

        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                recv = self.socket.recv_from(&mut buf) => {
                    let (n, peer) = match recv {
                        Ok(r) => r,
                        Err(err) => {
                            debug!("UDP sink recv error: {}", err);
                            continue;
                        }
                    };

                    self.absorb(&buf[..n], peer, local_v4);
                }
            }
        }

        info!(
            "UDP sink shut down (dropped {} packets, sent {} ICMP Port-Unreachable)",
            self.stats.dropped(),
            self.stats.icmp_sent()
        );

        Ok(())
    }

    /// Account for one received datagram: best-effort ICMP, then count
    /// the drop.
    fn absorb(&self, datagram: &[u8], peer: SocketAddr, local: SocketAddrV4) {
        if let (Some(icmp), SocketAddr::V4(client)) = (&self.icmp, peer) {
            match icmp.send_port_unreachable(client, local, datagram) {
                Ok(()) => {
                    self.stats.icmp_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    let errors = self.stats.icmp_errors.fetch_add(1, Ordering::Relaxed);
                    if errors < MAX_LOGGED_ICMP_ERRORS {
                        warn!("UDP sink ICMP send error: {}", err);
                    }
                }
            }
        }

        let count = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= LOG_FIRST_DROPS || count % LOG_DROP_INTERVAL == 0 {
            info!(
                "UDP sink dropped packet #{} from {} ({} bytes), ICMP sent: {}",
                count,
                peer,
                datagram.len(),
                self.stats.icmp_sent()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time;

    #[tokio::test]
    async fn test_bind_coerces_to_ipv4() {
        let sink = UdpSink::bind("[::]:0".parse().unwrap()).await.unwrap();
        let addr = sink.local_addr().unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[tokio::test]
    async fn test_drop_counter_increments() {
        let sink = UdpSink::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = sink.local_addr().unwrap();
        let stats = sink.stats();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(sink.run(shutdown_rx));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let probe = vec![0u8; 1200];
        for _ in 0..4 {
            client.send_to(&probe, addr).await.unwrap();
        }

        // Datagrams are absorbed, never answered on the UDP socket.
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.dropped(), 4);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_reports_and_exits() {
        let sink = UdpSink::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(sink.run(shutdown_rx));

        shutdown_tx.send(()).unwrap();
        time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sink must exit on shutdown")
            .unwrap()
            .unwrap();
    }
}
