//! IPv6 protocol implementation
//!
//! Parsing keeps the received datagram as a shared [`Bytes`] buffer and
//! exposes header fields and the payload as views into it. Building
//! always allocates a fresh buffer with a fixed 40-byte header.

use std::fmt;
use std::net::Ipv6Addr;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::error::PacketError;

pub const IPV6_HEADER_LEN: usize = 40;
pub const IPV6_VERSION: u8 = 6;
pub const DEFAULT_HOP_LIMIT: u8 = 64;

/// A received IPv6 datagram whose payload length has been validated.
///
/// Equality and hashing compare content, not buffer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ipv6Packet {
    buf: Bytes,
    payload_len: usize,
}

impl Ipv6Packet {
    /// Validate the fixed header and the declared payload length.
    ///
    /// Extension headers are not interpreted; bytes past the declared
    /// payload length are ignored.
    pub fn parse(buf: Bytes) -> Result<Self, PacketError> {
        if buf.len() < IPV6_HEADER_LEN {
            return Err(PacketError::Truncated {
                what: "IPv6 header",
                needed: IPV6_HEADER_LEN,
                available: buf.len(),
            });
        }

        let payload_len = BigEndian::read_u16(&buf[4..6]) as usize;
        if payload_len + IPV6_HEADER_LEN > buf.len() {
            return Err(PacketError::PayloadLengthOutOfRange {
                declared: payload_len,
                available: buf.len() - IPV6_HEADER_LEN,
            });
        }

        Ok(Ipv6Packet { buf, payload_len })
    }

    pub fn traffic_class(&self) -> u8 {
        ((BigEndian::read_u32(&self.buf[0..4]) >> 20) & 0xFF) as u8
    }

    pub fn flow_label(&self) -> u32 {
        BigEndian::read_u32(&self.buf[0..4]) & 0x000F_FFFF
    }

    /// Protocol number of the payload (IPv6 "next header").
    pub fn next_header(&self) -> u8 {
        self.buf[6]
    }

    pub fn hop_limit(&self) -> u8 {
        self.buf[7]
    }

    pub fn source(&self) -> [u8; 16] {
        let mut addr = [0u8; 16];
        addr.copy_from_slice(&self.buf[8..24]);
        addr
    }

    pub fn destination(&self) -> [u8; 16] {
        let mut addr = [0u8; 16];
        addr.copy_from_slice(&self.buf[24..40]);
        addr
    }

    pub fn source_addr(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.source())
    }

    pub fn destination_addr(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.destination())
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// The payload as a view into the datagram.
    pub fn payload(&self) -> Bytes {
        self.buf
            .slice(IPV6_HEADER_LEN..IPV6_HEADER_LEN + self.payload_len)
    }

    /// The whole datagram as received (or built).
    pub fn as_bytes(&self) -> &Bytes {
        &self.buf
    }
}

impl fmt::Display for Ipv6Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IPv6 {} -> {} next_header={} hop_limit={} traffic_class={} payload={}B",
            self.source_addr(),
            self.destination_addr(),
            self.next_header(),
            self.hop_limit(),
            self.traffic_class(),
            self.payload_len
        )
    }
}

/// Build an IPv6 datagram around `payload`.
///
/// Traffic class and flow label are zero.
pub fn build_ipv6(
    src_addr: &[u8; 16],
    dst_addr: &[u8; 16],
    next_header: u8,
    hop_limit: u8,
    payload: &[u8],
) -> Result<Bytes, PacketError> {
    build_ipv6_from_parts(src_addr, dst_addr, next_header, hop_limit, &[payload])
}

/// Like [`build_ipv6`], with the payload given as consecutive pieces.
pub(crate) fn build_ipv6_from_parts(
    src_addr: &[u8; 16],
    dst_addr: &[u8; 16],
    next_header: u8,
    hop_limit: u8,
    parts: &[&[u8]],
) -> Result<Bytes, PacketError> {
    let payload_len: usize = parts.iter().map(|p| p.len()).sum();
    if payload_len > u16::MAX as usize {
        return Err(PacketError::PayloadTooLarge(payload_len));
    }

    let mut packet = vec![0u8; IPV6_HEADER_LEN];
    BigEndian::write_u32(&mut packet[0..4], (IPV6_VERSION as u32) << 28);
    BigEndian::write_u16(&mut packet[4..6], payload_len as u16);
    packet[6] = next_header;
    packet[7] = hop_limit;
    packet[8..24].copy_from_slice(src_addr);
    packet[24..40].copy_from_slice(dst_addr);

    packet.reserve(payload_len);
    for part in parts {
        packet.extend_from_slice(part);
    }

    Ok(Bytes::from(packet))
}
