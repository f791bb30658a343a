//! TCP (Transmission Control Protocol) segment format
//!
//! This module provides TCP header parsing and serialization, the segment
//! view handed to the session engine, and the builder for outgoing
//! segments wrapped in IPv6.

use std::fmt;

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::error::PacketError;
use crate::iface::ip::{AddressPair, IpAddr};
use crate::network::ipv6::{build_ipv6_from_parts, Ipv6Packet};
use crate::network::{pseudo_header_checksum, upper_layer_checksum};

pub const IPPROTO_TCP: u8 = 6;

/// TCP header length without options.
pub const TCP_HEADER_LEN: usize = 20;

/// Hop limit of segments built by [`build_tcp_segment`].
pub const DEFAULT_TCP_HOP_LIMIT: u8 = 255;

bitflags! {
    /// The 9 flag bits of the TCP header.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TcpFlags: u16 {
        const FIN = 0b_0000_0000_0000_0001;
        const SYN = 0b_0000_0000_0000_0010;
        const RST = 0b_0000_0000_0000_0100;
        const PSH = 0b_0000_0000_0000_1000;
        const ACK = 0b_0000_0000_0001_0000;
        const URG = 0b_0000_0000_0010_0000;
        const ECE = 0b_0000_0000_0100_0000;
        const CWR = 0b_0000_0000_1000_0000;
        const NS = 0b_0000_0001_0000_0000;
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        for (i, (name, _)) in self.iter_names().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

/// TCP packet header structure
///
/// Represents the fixed 20-byte TCP header as defined in RFC 793
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_number: u32,
    pub ack_number: u32,
    /// Header length in 32-bit words.
    pub data_offset: u8,
    pub flags: TcpFlags,
    pub window_size: u16,
    pub checksum: u16,
    pub urgent_ptr: u16,
}

impl TcpHeader {
    /// An option-less header with zero checksum and urgent pointer.
    pub fn new(src_port: u16, dst_port: u16, seq_number: u32, ack_number: u32, flags: TcpFlags, window_size: u16) -> Self {
        TcpHeader {
            src_port,
            dst_port,
            seq_number,
            ack_number,
            data_offset: (TCP_HEADER_LEN / 4) as u8,
            flags,
            window_size,
            checksum: 0,
            urgent_ptr: 0,
        }
    }

    /// Parse TCP header from byte slice
    ///
    /// Returns None if the data is too short to contain a fixed TCP header.
    /// The data offset is reported as found, not validated.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < TCP_HEADER_LEN {
            return None;
        }

        let offset_and_flags = BigEndian::read_u16(&data[12..14]);
        Some(TcpHeader {
            src_port: BigEndian::read_u16(&data[0..2]),
            dst_port: BigEndian::read_u16(&data[2..4]),
            seq_number: BigEndian::read_u32(&data[4..8]),
            ack_number: BigEndian::read_u32(&data[8..12]),
            data_offset: (offset_and_flags >> 12) as u8,
            flags: TcpFlags::from_bits_truncate(offset_and_flags),
            window_size: BigEndian::read_u16(&data[14..16]),
            checksum: BigEndian::read_u16(&data[16..18]),
            urgent_ptr: BigEndian::read_u16(&data[18..20]),
        })
    }

    /// Convert TCP header to bytes
    pub fn to_bytes(&self) -> [u8; TCP_HEADER_LEN] {
        let mut bytes = [0u8; TCP_HEADER_LEN];
        BigEndian::write_u16(&mut bytes[0..2], self.src_port);
        BigEndian::write_u16(&mut bytes[2..4], self.dst_port);
        BigEndian::write_u32(&mut bytes[4..8], self.seq_number);
        BigEndian::write_u32(&mut bytes[8..12], self.ack_number);
        let offset_and_flags = ((self.data_offset as u16 & 0xF) << 12) | self.flags.bits();
        BigEndian::write_u16(&mut bytes[12..14], offset_and_flags);
        BigEndian::write_u16(&mut bytes[14..16], self.window_size);
        BigEndian::write_u16(&mut bytes[16..18], self.checksum);
        BigEndian::write_u16(&mut bytes[18..20], self.urgent_ptr);
        bytes
    }

    /// Get the data offset (header length) in bytes
    pub fn header_len(&self) -> usize {
        (self.data_offset as usize) * 4
    }
}

/// A TCP segment decoded from an IPv6 datagram.
///
/// `options` and `data` are only meaningful when the segment is
/// well-formed; a malformed segment carries a note saying why and empty
/// ranges.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    pub header: TcpHeader,
    options: Bytes,
    data: Bytes,
    note: Option<PacketError>,
    packet: Ipv6Packet,
}

impl TcpSegment {
    pub fn is_well_formed(&self) -> bool {
        self.note.is_none()
    }

    /// Why the segment is malformed, if it is.
    pub fn note(&self) -> Option<&PacketError> {
        self.note.as_ref()
    }

    pub fn src_port(&self) -> u16 {
        self.header.src_port
    }

    pub fn dst_port(&self) -> u16 {
        self.header.dst_port
    }

    pub fn seq_number(&self) -> u32 {
        self.header.seq_number
    }

    pub fn ack_number(&self) -> u32 {
        self.header.ack_number
    }

    pub fn flags(&self) -> TcpFlags {
        self.header.flags
    }

    pub fn window_size(&self) -> u16 {
        self.header.window_size
    }

    pub fn is_syn(&self) -> bool {
        self.header.flags.contains(TcpFlags::SYN)
    }

    pub fn is_ack(&self) -> bool {
        self.header.flags.contains(TcpFlags::ACK)
    }

    pub fn is_fin(&self) -> bool {
        self.header.flags.contains(TcpFlags::FIN)
    }

    pub fn is_rst(&self) -> bool {
        self.header.flags.contains(TcpFlags::RST)
    }

    pub fn options(&self) -> &Bytes {
        &self.options
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    /// Sequence space consumed: data bytes plus one each for SYN and FIN.
    pub fn sequence_delta(&self) -> u32 {
        self.data.len() as u32 + u32::from(self.is_syn()) + u32::from(self.is_fin())
    }

    /// The enclosing datagram.
    pub fn packet(&self) -> &Ipv6Packet {
        &self.packet
    }

    /// Endpoints as seen by the sender of this segment.
    pub fn address_pair(&self) -> AddressPair {
        AddressPair::v6(
            self.packet.source(),
            self.header.src_port,
            self.packet.destination(),
            self.header.dst_port,
        )
    }

    /// True when the carried checksum matches the pseudo-header checksum.
    pub fn verify_checksum(&self) -> bool {
        upper_layer_checksum(&self.packet) == 0
    }
}

impl fmt::Display for TcpSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TCP {} {} seq={} ack={} flags={} window={} checksum=0x{:04x} data={}B",
            if self.is_well_formed() { "(well-formed)" } else { "(malformed)" },
            self.address_pair(),
            self.header.seq_number,
            self.header.ack_number,
            self.header.flags,
            self.header.window_size,
            self.header.checksum,
            self.data.len()
        )
    }
}

/// Decode the TCP segment carried by `packet`.
///
/// Never fails outright: a short payload or a data offset outside
/// `20..=payload length` produces a segment that is not well-formed.
pub fn parse_tcp_segment(packet: &Ipv6Packet) -> TcpSegment {
    let payload = packet.payload();

    let Some(header) = TcpHeader::from_bytes(&payload) else {
        return TcpSegment {
            header: TcpHeader::default(),
            options: Bytes::new(),
            data: Bytes::new(),
            note: Some(PacketError::Truncated {
                what: "TCP header",
                needed: TCP_HEADER_LEN,
                available: payload.len(),
            }),
            packet: packet.clone(),
        };
    };

    let data_offset = header.header_len();
    if data_offset < TCP_HEADER_LEN || data_offset > payload.len() {
        return TcpSegment {
            header,
            options: Bytes::new(),
            data: Bytes::new(),
            note: Some(PacketError::DataOffsetOutOfRange {
                data_offset,
                segment_len: payload.len(),
            }),
            packet: packet.clone(),
        };
    }

    TcpSegment {
        header,
        options: payload.slice(TCP_HEADER_LEN..data_offset),
        data: payload.slice(data_offset..),
        note: None,
        packet: packet.clone(),
    }
}

/// Build an option-less segment from `pair.source` to `pair.destination`,
/// checksummed and wrapped in IPv6.
pub fn build_tcp_segment(
    pair: &AddressPair,
    seq_number: u32,
    ack_number: u32,
    flags: TcpFlags,
    window_size: u16,
    data: &[u8],
) -> Result<Bytes, PacketError> {
    build_tcp_segment_with_hop_limit(pair, seq_number, ack_number, flags, window_size, data, DEFAULT_TCP_HOP_LIMIT)
}

pub fn build_tcp_segment_with_hop_limit(
    pair: &AddressPair,
    seq_number: u32,
    ack_number: u32,
    flags: TcpFlags,
    window_size: u16,
    data: &[u8],
    hop_limit: u8,
) -> Result<Bytes, PacketError> {
    let (src_addr, dst_addr) = match (pair.source(), pair.destination()) {
        (IpAddr::V6(src), IpAddr::V6(dst)) => (src, dst),
        _ => return Err(PacketError::UnsupportedIpVersion(pair.ip_version())),
    };

    let header = TcpHeader::new(
        pair.source_port(),
        pair.destination_port(),
        seq_number,
        ack_number,
        flags,
        window_size,
    );
    let mut header_bytes = header.to_bytes();
    let checksum = pseudo_header_checksum(&src_addr, &dst_addr, IPPROTO_TCP, &[&header_bytes[..], data]);
    BigEndian::write_u16(&mut header_bytes[16..18], checksum);

    build_ipv6_from_parts(&src_addr, &dst_addr, IPPROTO_TCP, hop_limit, &[&header_bytes[..], data])
}
