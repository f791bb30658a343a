//! Error types shared across the stack.

use std::io;

use thiserror::Error;

use crate::iface::ip::AddressPair;

/// Why a buffer could not be decoded, or a packet could not be built.
///
/// Parsers never return this as an `Err`: it is carried inside the tagged
/// result (`IpPacket::Invalid`, a malformed `TcpSegment`'s note) so callers
/// can drop the packet and keep going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("{what} needs {needed} bytes, only {available} available")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("declared payload length {declared} exceeds the {available} bytes available")]
    PayloadLengthOutOfRange { declared: usize, available: usize },

    #[error("data offset ({data_offset} bytes) is out of range for a {segment_len} byte segment")]
    DataOffsetOutOfRange {
        data_offset: usize,
        segment_len: usize,
    },

    #[error("unsupported IP version {0}")]
    UnsupportedIpVersion(u8),

    #[error("payload of {0} bytes does not fit in a single packet")]
    PayloadTooLarge(usize),
}

/// Errors from driving a TCP session outside of inbound processing.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session for {0}")]
    NoSession(AddressPair),

    #[error("output buffer already closed")]
    WriteAfterClose,

    #[error("failed to build segment: {0}")]
    Build(#[from] PacketError),
}

/// Errors raised by a packet transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no peer has sent a datagram yet")]
    NoPeer,

    #[error("transport closed")]
    Closed,
}
