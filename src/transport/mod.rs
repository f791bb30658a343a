//! Transport layer protocols implementation
//!
//! This module contains the TCP side of the responder:
//! - tcp: segment decoding and building
//! - session: per-connection state and the session engine

pub mod session;
pub mod tcp;

// Re-export commonly used items
pub use session::{DataHandler, Echo, TcpOutputBuffer, TcpSession, TcpSessionEngine};
pub use tcp::{build_tcp_segment, parse_tcp_segment, TcpFlags, TcpHeader, TcpSegment, IPPROTO_TCP};
