//! Network interface abstraction layer
//!
//! This module connects the protocol code to the outside world:
//! - Addresses and connection 4-tuples
//! - Packet dispatch to the TCP and ICMPv6 handlers
//! - Packet transports (UDP, TUN) and the serving loop

pub mod interface;
pub mod ip;
pub mod transport;

// Re-export commonly used items
pub use interface::Responder;
pub use ip::{AddressPair, IpAddr};
pub use transport::{AppData, PacketTransport, Server, UdpTransport};

#[cfg(feature = "tun")]
pub use transport::TunTransport;
