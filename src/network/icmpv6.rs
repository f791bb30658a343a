//! ICMPv6 (Internet Control Message Protocol for IPv6) implementation
//!
//! This module provides ICMPv6 message parsing, building and the echo
//! responder. Only Echo Request is answered.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use log::error;

use crate::error::PacketError;
use crate::network::ipv6::{build_ipv6_from_parts, Ipv6Packet};
use crate::network::{pseudo_header_checksum, upper_layer_checksum};

/// IPv6 next-header value for ICMPv6.
pub const IPPROTO_ICMPV6: u8 = 58;

/// Type, code and checksum. The rest of the message is type-specific.
pub const ICMPV6_HEADER_LEN: usize = 4;

pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

/// ICMPv6 message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Icmpv6Type {
    /// Destination Unreachable (error).
    DestinationUnreachable = 1,
    /// Packet Too Big (error).
    PacketTooBig = 2,
    /// Time Exceeded (error).
    TimeExceeded = 3,
    /// Parameter Problem (error).
    ParameterProblem = 4,
    /// Echo Request.
    EchoRequest = ICMPV6_ECHO_REQUEST,
    /// Echo Reply.
    EchoReply = ICMPV6_ECHO_REPLY,
}

impl Icmpv6Type {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Icmpv6Type::DestinationUnreachable),
            2 => Some(Icmpv6Type::PacketTooBig),
            3 => Some(Icmpv6Type::TimeExceeded),
            4 => Some(Icmpv6Type::ParameterProblem),
            ICMPV6_ECHO_REQUEST => Some(Icmpv6Type::EchoRequest),
            ICMPV6_ECHO_REPLY => Some(Icmpv6Type::EchoReply),
            _ => None,
        }
    }
}

/// A decoded ICMPv6 message and the datagram that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmpv6Message {
    pub msg_type: u8,
    pub code: u8,
    pub checksum: u16,
    /// Everything after the 4-byte header. For echo messages this starts
    /// with the identifier and sequence number.
    body: Bytes,
    packet: Ipv6Packet,
}

impl Icmpv6Message {
    pub fn kind(&self) -> Option<Icmpv6Type> {
        Icmpv6Type::from_u8(self.msg_type)
    }

    pub fn is_echo_request(&self) -> bool {
        self.msg_type == ICMPV6_ECHO_REQUEST
    }

    pub fn is_echo_reply(&self) -> bool {
        self.msg_type == ICMPV6_ECHO_REPLY
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn packet(&self) -> &Ipv6Packet {
        &self.packet
    }

    /// Echo identifier, if the body is long enough to hold one.
    pub fn identifier(&self) -> Option<u16> {
        self.body.get(0..2).map(BigEndian::read_u16)
    }

    /// Echo sequence number, if the body is long enough to hold one.
    pub fn sequence(&self) -> Option<u16> {
        self.body.get(2..4).map(BigEndian::read_u16)
    }

    /// True when the carried checksum matches the pseudo-header checksum.
    pub fn verify_checksum(&self) -> bool {
        upper_layer_checksum(&self.packet) == 0
    }
}

impl fmt::Display for Icmpv6Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "ICMPv6 {:?}", kind)?,
            None => write!(f, "ICMPv6 type={}", self.msg_type)?,
        }
        write!(
            f,
            " code={} checksum=0x{:04x} body={}B",
            self.code,
            self.checksum,
            self.body.len()
        )
    }
}

/// Decode the ICMPv6 message carried by `packet`.
///
/// A payload shorter than the 4-byte header yields a zero-valued message
/// with an empty body rather than an error.
pub fn parse_icmp6(packet: &Ipv6Packet) -> Icmpv6Message {
    let payload = packet.payload();
    if payload.len() < ICMPV6_HEADER_LEN {
        return Icmpv6Message {
            msg_type: 0,
            code: 0,
            checksum: 0,
            body: Bytes::new(),
            packet: packet.clone(),
        };
    }

    Icmpv6Message {
        msg_type: payload[0],
        code: payload[1],
        checksum: BigEndian::read_u16(&payload[2..4]),
        body: payload.slice(ICMPV6_HEADER_LEN..),
        packet: packet.clone(),
    }
}

/// Build a complete IPv6 datagram carrying an ICMPv6 message.
pub fn build_icmp6(
    src_addr: &[u8; 16],
    dst_addr: &[u8; 16],
    hop_limit: u8,
    msg_type: u8,
    code: u8,
    body: &[u8],
) -> Result<Bytes, PacketError> {
    let mut header = [msg_type, code, 0, 0];
    let checksum = pseudo_header_checksum(src_addr, dst_addr, IPPROTO_ICMPV6, &[&header[..], body]);
    BigEndian::write_u16(&mut header[2..4], checksum);

    build_ipv6_from_parts(src_addr, dst_addr, IPPROTO_ICMPV6, hop_limit, &[&header[..], body])
}

/// Answer an Echo Request.
///
/// The reply swaps source and destination, carries the request body
/// unchanged and gets a freshly computed checksum. Any other message
/// type gets `None`.
pub fn echo_reply(request: &Icmpv6Message, hop_limit: u8) -> Option<Bytes> {
    if !request.is_echo_request() {
        return None;
    }

    let packet = request.packet();
    match build_icmp6(
        &packet.destination(),
        &packet.source(),
        hop_limit,
        ICMPV6_ECHO_REPLY,
        0,
        request.body(),
    ) {
        Ok(reply) => Some(reply),
        Err(e) => {
            error!("Failed to build echo reply: {}", e);
            None
        }
    }
}
