//! IPv4 header recognition
//!
//! IPv4 datagrams are decoded far enough to be told apart from garbage
//! and logged; nothing carried over IPv4 is answered.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::PacketError;
use crate::network::checksum;
use byteorder::{BigEndian, ByteOrder};

pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV4_VERSION: u8 = 4;
const DEFAULT_IHL: u8 = 5; // 5 * 4 = 20 bytes (standard header length)
const DEFAULT_TTL: u8 = 64;

/// IPv4 packet header structure
///
/// Represents the standard 20-byte IPv4 header as defined in RFC 791.
/// Options, when present, are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8, // Internet Header Length
    pub tos: u8, // Type of Service
    pub total_len: u16,
    pub id: u16,
    pub flags_frag_offset: u16, // Flags and Fragment Offset
    pub ttl: u8,                // Time to Live
    pub protocol: u8,           // Next Protocol
    pub checksum: u16,
    pub src_addr: [u8; 4],
    pub dst_addr: [u8; 4],
}

impl Ipv4Header {
    /// Create a header carrying `payload_len` bytes, checksum filled in.
    pub fn new_simple(protocol: u8, src_addr: [u8; 4], dst_addr: [u8; 4], payload_len: u16) -> Self {
        let mut header = Ipv4Header {
            version: IPV4_VERSION,
            ihl: DEFAULT_IHL,
            tos: 0,
            total_len: IPV4_HEADER_LEN as u16 + payload_len,
            id: 0,
            flags_frag_offset: 0,
            ttl: DEFAULT_TTL,
            protocol,
            checksum: 0,
            src_addr,
            dst_addr,
        };
        header.checksum = header.calculate_checksum();
        header
    }

    /// Parse and bounds-check an IPv4 header.
    ///
    /// The header length and total length must both fit in `data`.
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < IPV4_HEADER_LEN {
            return Err(PacketError::Truncated {
                what: "IPv4 header",
                needed: IPV4_HEADER_LEN,
                available: data.len(),
            });
        }

        let version = data[0] >> 4;
        if version != IPV4_VERSION {
            return Err(PacketError::UnsupportedIpVersion(version));
        }

        let mut src_addr = [0u8; 4];
        let mut dst_addr = [0u8; 4];
        src_addr.copy_from_slice(&data[12..16]);
        dst_addr.copy_from_slice(&data[16..20]);

        let header = Ipv4Header {
            version,
            ihl: data[0] & 0x0F,
            tos: data[1],
            total_len: BigEndian::read_u16(&data[2..4]),
            id: BigEndian::read_u16(&data[4..6]),
            flags_frag_offset: BigEndian::read_u16(&data[6..8]),
            ttl: data[8],
            protocol: data[9],
            checksum: BigEndian::read_u16(&data[10..12]),
            src_addr,
            dst_addr,
        };

        let header_len = header.header_len();
        if header_len < IPV4_HEADER_LEN || header_len > data.len() {
            return Err(PacketError::Truncated {
                what: "IPv4 header with options",
                needed: header_len.max(IPV4_HEADER_LEN),
                available: data.len(),
            });
        }

        let total_len = header.total_len as usize;
        if total_len < header_len || total_len > data.len() {
            return Err(PacketError::PayloadLengthOutOfRange {
                declared: total_len.saturating_sub(header_len),
                available: data.len() - header_len,
            });
        }

        Ok(header)
    }

    /// Convert IPv4 header to bytes
    ///
    /// Serializes the header to a 20-byte array; options are not emitted.
    pub fn to_bytes(&self) -> [u8; IPV4_HEADER_LEN] {
        let mut bytes = [0u8; IPV4_HEADER_LEN];
        bytes[0] = (self.version << 4) | self.ihl;
        bytes[1] = self.tos;
        BigEndian::write_u16(&mut bytes[2..4], self.total_len);
        BigEndian::write_u16(&mut bytes[4..6], self.id);
        BigEndian::write_u16(&mut bytes[6..8], self.flags_frag_offset);
        bytes[8] = self.ttl;
        bytes[9] = self.protocol;
        BigEndian::write_u16(&mut bytes[10..12], self.checksum);
        bytes[12..16].copy_from_slice(&self.src_addr);
        bytes[16..20].copy_from_slice(&self.dst_addr);

        bytes
    }

    /// Get the header length in bytes
    pub fn header_len(&self) -> usize {
        (self.ihl as usize) * 4
    }

    /// Get payload length
    pub fn payload_len(&self) -> usize {
        (self.total_len as usize).saturating_sub(self.header_len())
    }

    /// Checksum of the fixed header with the checksum field zeroed.
    pub fn calculate_checksum(&self) -> u16 {
        let mut header_bytes = self.to_bytes();
        header_bytes[10..12].copy_from_slice(&[0, 0]);
        checksum(&header_bytes)
    }

    /// Only meaningful for option-less headers.
    pub fn checksum_valid(&self) -> bool {
        self.calculate_checksum() == self.checksum
    }
}

impl fmt::Display for Ipv4Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IPv4 {} -> {} protocol={} ttl={} total_len={}",
            Ipv4Addr::from(self.src_addr),
            Ipv4Addr::from(self.dst_addr),
            self.protocol,
            self.ttl,
            self.total_len
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(payload: &[u8]) -> Vec<u8> {
        let header = Ipv4Header::new_simple(1, [10, 0, 0, 1], [10, 0, 0, 2], payload.len() as u16);
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_parse_round_trip() {
        let bytes = datagram(b"ping");
        let header = Ipv4Header::parse(&bytes).unwrap();
        assert_eq!(header.protocol, 1);
        assert_eq!(header.src_addr, [10, 0, 0, 1]);
        assert_eq!(header.payload_len(), 4);
        assert!(header.checksum_valid());
    }

    #[test]
    fn test_total_length_beyond_buffer() {
        let mut bytes = datagram(b"ping");
        bytes.truncate(22);
        assert!(matches!(
            Ipv4Header::parse(&bytes),
            Err(PacketError::PayloadLengthOutOfRange { declared: 4, available: 2 })
        ));
    }

    #[test]
    fn test_bad_ihl() {
        let mut bytes = datagram(b"");
        bytes[0] = 0x44; // 16-byte header
        assert!(matches!(
            Ipv4Header::parse(&bytes),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_corrupted_checksum_detected() {
        let mut bytes = datagram(b"");
        bytes[10] ^= 0xFF;
        assert!(!Ipv4Header::parse(&bytes).unwrap().checksum_valid());
    }
}
