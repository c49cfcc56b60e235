//! Raw ICMP Port-Unreachable emission
//!
//! Synthesises ICMP Destination-Unreachable / Port-Unreachable (Type 3,
//! Code 3) messages per RFC 792 and sends them over a raw IPv4 socket.
//! The error payload embeds the would-be IPv4 and UDP headers of the
//! original datagram plus its first 8 payload bytes, which is what lets
//! the client match the error to its in-flight QUIC probe.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

/// ICMP Destination Unreachable
const ICMP_TYPE_DEST_UNREACHABLE: u8 = 3;

/// Code 3: Port Unreachable
const ICMP_CODE_PORT_UNREACHABLE: u8 = 3;

/// ICMP header: type + code + checksum + 4 unused bytes
const ICMP_HEADER_LEN: usize = 8;

/// Embedded IPv4 header length (no options)
const IP_HEADER_LEN: usize = 20;

/// Embedded UDP header length
const UDP_HEADER_LEN: usize = 8;

/// Original-payload bytes carried in the error, per RFC 792
const EMBEDDED_PAYLOAD_LEN: usize = 8;

/// Raw ICMPv4 sender
///
/// Opening the socket requires `CAP_NET_RAW` (or root); callers treat a
/// failed open as non-fatal and fall back to silent dropping.
#[derive(Debug)]
pub struct IcmpSender {
    socket: Socket,
}

impl IcmpSender {
    /// Open the raw ICMPv4 socket
    ///
    /// # Errors
    ///
    /// Returns the underlying error when the socket cannot be created,
    /// typically `PermissionDenied` without `CAP_NET_RAW`.
    pub fn open() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    /// Send a Port-Unreachable for a datagram received from `client` on
    /// `local`.
    ///
    /// # Errors
    ///
    /// Returns the send error; `WouldBlock` counts as a failure (the
    /// message is best-effort and never retried).
    pub fn send_port_unreachable(
        &self,
        client: SocketAddrV4,
        local: SocketAddrV4,
        datagram: &[u8],
    ) -> io::Result<()> {
        let packet = build_port_unreachable(client, local, datagram);
        let dest = SockAddr::from(SocketAddr::V4(SocketAddrV4::new(*client.ip(), 0)));
        self.socket.send_to(&packet, &dest)?;
        Ok(())
    }
}

/// Build the full ICMP message for a Port-Unreachable.
///
/// Payload layout: the original datagram's would-be IPv4 header (version
/// 4, IHL 5, protocol 17, source = client, dest = local, total length
/// 28 + datagram length), its would-be UDP header (client port → local
/// port, length 8 + datagram length, checksum 0), then up to the first 8
/// bytes of the datagram.
pub(crate) fn build_port_unreachable(
    client: SocketAddrV4,
    local: SocketAddrV4,
    datagram: &[u8],
) -> Vec<u8> {
    let embedded = &datagram[..datagram.len().min(EMBEDDED_PAYLOAD_LEN)];
    let mut packet =
        Vec::with_capacity(ICMP_HEADER_LEN + IP_HEADER_LEN + UDP_HEADER_LEN + embedded.len());

    // ICMP header; checksum filled in below
    packet.push(ICMP_TYPE_DEST_UNREACHABLE);
    packet.push(ICMP_CODE_PORT_UNREACHABLE);
    packet.extend_from_slice(&[0, 0]); // checksum
    packet.extend_from_slice(&[0, 0, 0, 0]); // unused

    // Embedded IPv4 header of the original packet
    let total_len = (IP_HEADER_LEN + UDP_HEADER_LEN + datagram.len()) as u16;
    packet.push(0x45); // version 4, IHL 5
    packet.push(0x00); // TOS
    packet.extend_from_slice(&total_len.to_be_bytes());
    packet.extend_from_slice(&[0, 0]); // identification
    packet.extend_from_slice(&[0, 0]); // flags + fragment offset
    packet.push(64); // TTL
    packet.push(17); // protocol: UDP
    packet.extend_from_slice(&[0, 0]); // header checksum (unset)
    packet.extend_from_slice(&client.ip().octets());
    packet.extend_from_slice(&local.ip().octets());

    // Embedded UDP header of the original packet
    let udp_len = (UDP_HEADER_LEN + datagram.len()) as u16;
    packet.extend_from_slice(&client.port().to_be_bytes());
    packet.extend_from_slice(&local.port().to_be_bytes());
    packet.extend_from_slice(&udp_len.to_be_bytes());
    packet.extend_from_slice(&[0, 0]); // UDP checksum

    packet.extend_from_slice(embedded);

    let checksum = rfc792_checksum(&packet);
    packet[2] = (checksum >> 8) as u8;
    packet[3] = checksum as u8;

    packet
}

/// RFC 792 checksum: ones' complement of the ones'-complement sum of the
/// message as 16-bit big-endian words, zero-padding an odd trailing byte.
pub(crate) fn rfc792_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }

    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}
