//! Network layer protocols implementation
//!
//! This module contains implementations for network layer protocols:
//! - IPv6: Internet Protocol version 6 (parsed, built and answered)
//! - IPv4: Internet Protocol version 4 (recognized only)
//! - ICMPv6: Internet Control Message Protocol for IPv6

pub mod icmpv6;
pub mod ipv4;
pub mod ipv6;

use bytes::Bytes;

use crate::error::PacketError;

// Re-export commonly used items
pub use icmpv6::{
    build_icmp6, echo_reply, parse_icmp6, Icmpv6Message, Icmpv6Type, ICMPV6_ECHO_REPLY,
    ICMPV6_ECHO_REQUEST, IPPROTO_ICMPV6,
};
pub use ipv4::Ipv4Header;
pub use ipv6::{build_ipv6, Ipv6Packet, IPV6_HEADER_LEN};

/// Calculate Internet checksum
///
/// Algorithm: Sum data in 16-bit chunks, add carry bits to the sum,
/// and return the one's complement of the result.
/// This is used for IPv4 headers and, via [`pseudo_header_checksum`],
/// for TCP and ICMPv6.
pub fn checksum(data: &[u8]) -> u16 {
    // A u64 holds the sum of any slice that fits in memory without wrapping.
    let mut sum = 0u64;

    // Process data in 2-byte chunks
    for chunk in data.chunks_exact(2) {
        sum += u64::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }

    // Handle odd-length data by padding with zero
    if data.len() % 2 != 0 {
        if let Some(&last_byte) = data.last() {
            sum += u64::from(last_byte) << 8;
        }
    }

    // Add carry bits
    while (sum >> 16) > 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    // Return one's complement
    !(sum as u16)
}

/// Checksum an upper-layer message behind an IPv6 pseudo-header.
///
/// The pseudo-header is source address (16), destination address (16),
/// upper-layer length as a 32-bit big-endian value and the next-header
/// number as a 32-bit big-endian value. `parts` are concatenated in order
/// after it, so a header and its payload can be passed without joining
/// them first.
pub fn pseudo_header_checksum(
    src_addr: &[u8; 16],
    dst_addr: &[u8; 16],
    next_header: u8,
    parts: &[&[u8]],
) -> u16 {
    let upper_len: usize = parts.iter().map(|p| p.len()).sum();

    let mut pseudo_header = Vec::with_capacity(IPV6_HEADER_LEN + upper_len);
    pseudo_header.extend_from_slice(src_addr);
    pseudo_header.extend_from_slice(dst_addr);
    pseudo_header.extend_from_slice(&(upper_len as u32).to_be_bytes());
    pseudo_header.extend_from_slice(&(next_header as u32).to_be_bytes());
    for part in parts {
        pseudo_header.extend_from_slice(part);
    }

    checksum(&pseudo_header)
}

/// Checksum a received packet's payload as carried, checksum field included.
///
/// Returns 0 when the embedded TCP/ICMPv6 checksum is correct.
pub fn upper_layer_checksum(packet: &Ipv6Packet) -> u16 {
    pseudo_header_checksum(
        &packet.source(),
        &packet.destination(),
        packet.next_header(),
        &[&packet.payload()[..]],
    )
}

/// A decoded IP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpPacket {
    V6(Ipv6Packet),
    /// Recognized but never answered.
    V4(Ipv4Header),
    Unsupported { version: u8 },
    Invalid { reason: PacketError },
}

impl IpPacket {
    pub fn version(&self) -> Option<u8> {
        match self {
            IpPacket::V6(_) => Some(6),
            IpPacket::V4(_) => Some(4),
            IpPacket::Unsupported { version } => Some(*version),
            IpPacket::Invalid { .. } => None,
        }
    }

    /// Next-header / protocol number, for the versions we decode.
    pub fn payload_protocol(&self) -> Option<u8> {
        match self {
            IpPacket::V6(p) => Some(p.next_header()),
            IpPacket::V4(h) => Some(h.protocol),
            _ => None,
        }
    }
}

/// Decode a raw datagram by the version nibble of its first byte.
///
/// Never fails: anything that cannot be trusted comes back as
/// [`IpPacket::Invalid`] or [`IpPacket::Unsupported`].
pub fn parse_ip_packet(bytes: Bytes) -> IpPacket {
    let Some(&first) = bytes.first() else {
        return IpPacket::Invalid {
            reason: PacketError::Empty,
        };
    };

    let result = match first >> 4 {
        ipv6::IPV6_VERSION => Ipv6Packet::parse(bytes).map(IpPacket::V6),
        ipv4::IPV4_VERSION => Ipv4Header::parse(&bytes).map(IpPacket::V4),
        version => Ok(IpPacket::Unsupported { version }),
    };

    result.unwrap_or_else(|reason| IpPacket::Invalid { reason })
}
