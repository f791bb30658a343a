//! Runtime configuration.
//!
//! Every struct has a `Default` matching the values the binary uses when
//! no flag overrides them.

use std::net::{Ipv6Addr, SocketAddr};
use std::time::Duration;

use crate::network::ipv6::DEFAULT_HOP_LIMIT;
use crate::transport::tcp::DEFAULT_TCP_HOP_LIMIT;

/// Default UDP port the tunnel front-end sends datagrams to.
pub const DEFAULT_PORT: u16 = 7777;

/// TCP session engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// Advertised receive window on every outgoing segment.
    pub window_size: u16,
    /// Most data bytes put in one outgoing segment.
    pub chunk_size: usize,
    pub hop_limit: u8,
    /// SYNs for new connections beyond this many open sessions are dropped.
    pub max_sessions: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            window_size: 32768,
            chunk_size: 1024,
            hop_limit: DEFAULT_TCP_HOP_LIMIT,
            max_sessions: 4096,
        }
    }
}

/// Packet dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderConfig {
    pub tcp: TcpConfig,
    /// Hop limit of ICMPv6 echo replies.
    pub echo_hop_limit: u8,
    /// Drop TCP and ICMPv6 whose checksum does not validate.
    pub verify_checksums: bool,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            tcp: TcpConfig::default(),
            echo_hop_limit: DEFAULT_HOP_LIMIT,
            verify_checksums: false,
        }
    }
}

/// Serving loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Receive buffer size; longer datagrams are truncated by the socket.
    pub recv_buffer_size: usize,
    /// How long a receive may block before queued application data is
    /// flushed anyway.
    pub poll_interval: Duration,
    /// Capacity of the application-data channel.
    pub app_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv6Addr::UNSPECIFIED, DEFAULT_PORT)),
            recv_buffer_size: 2048,
            poll_interval: Duration::from_millis(100),
            app_channel_capacity: 64,
        }
    }
}
