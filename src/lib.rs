//! A user-space IPv6 responder
//!
//! This library answers raw IPv6 datagrams handed to it by a transport:
//! - ICMPv6 echo requests get echo replies
//! - TCP connections are accepted on any address and port, and whatever
//!   the peer sends is echoed back
//! - IPv4 is recognized but never answered

pub mod config;
pub mod error;
pub mod iface;
pub mod network;
pub mod transport;

// Re-export commonly used types
pub use config::{ResponderConfig, ServerConfig, TcpConfig};
pub use error::{PacketError, SessionError, TransportError};
pub use iface::interface::Responder;
pub use iface::ip::{AddressPair, IpAddr};
pub use iface::transport::{AppData, PacketTransport, Server, UdpTransport};
pub use network::icmpv6::{build_icmp6, echo_reply, parse_icmp6, Icmpv6Message, Icmpv6Type};
pub use network::ipv6::{build_ipv6, Ipv6Packet};
pub use network::{checksum, parse_ip_packet, IpPacket};
pub use transport::session::{DataHandler, Echo, TcpOutputBuffer, TcpSessionEngine};
pub use transport::tcp::{build_tcp_segment, parse_tcp_segment, TcpFlags, TcpSegment};
