//! Packet dispatch
//!
//! This module turns one raw inbound datagram into the datagrams to send back:
//! - IP version recognition (only IPv6 is answered)
//! - Protocol dispatch (TCP, ICMPv6)
//! - Optional upper-layer checksum validation

use bytes::Bytes;
use log::{debug, trace};

use crate::config::ResponderConfig;
use crate::error::SessionError;
use crate::iface::ip::AddressPair;
use crate::network::icmpv6::{echo_reply, parse_icmp6, IPPROTO_ICMPV6};
use crate::network::ipv6::Ipv6Packet;
use crate::network::{parse_ip_packet, IpPacket};
use crate::transport::session::{DataHandler, Echo, TcpSessionEngine};
use crate::transport::tcp::{parse_tcp_segment, TcpSegment, IPPROTO_TCP};

/// Answers TCP and ICMPv6 echo traffic addressed to any IPv6 address.
pub struct Responder<H = Echo> {
    engine: TcpSessionEngine<H>,
    config: ResponderConfig,
}

impl Responder<Echo> {
    pub fn new(config: ResponderConfig) -> Self {
        Self::with_handler(config, Echo)
    }
}

impl Default for Responder<Echo> {
    fn default() -> Self {
        Self::new(ResponderConfig::default())
    }
}

impl<H: DataHandler> Responder<H> {
    pub fn with_handler(config: ResponderConfig, handler: H) -> Self {
        Responder {
            engine: TcpSessionEngine::with_handler(config.tcp.clone(), handler),
            config,
        }
    }

    /// Seed the generator used for TCP initial sequence numbers.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.engine = self.engine.with_seed(seed);
        self
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    pub fn engine(&self) -> &TcpSessionEngine<H> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TcpSessionEngine<H> {
        &mut self.engine
    }

    /// Process one raw datagram, returning the reply datagrams in send order.
    pub fn handle_packet(&mut self, bytes: Bytes) -> Vec<Bytes> {
        match parse_ip_packet(bytes) {
            IpPacket::V6(packet) => self.process_ipv6(&packet),
            IpPacket::V4(header) => {
                debug!("Ignoring IPv4 packet: {}", header);
                Vec::new()
            }
            IpPacket::Unsupported { version } => {
                debug!("Ignoring packet with IP version {}", version);
                Vec::new()
            }
            IpPacket::Invalid { reason } => {
                debug!("Dropping invalid packet: {}", reason);
                Vec::new()
            }
        }
    }

    /// Dispatch a decoded IPv6 datagram by its next-header value.
    pub fn process_ipv6(&mut self, packet: &Ipv6Packet) -> Vec<Bytes> {
        trace!("Received {}", packet);
        match packet.next_header() {
            IPPROTO_TCP => self.process_tcp(packet),
            IPPROTO_ICMPV6 => self.process_icmp6(packet),
            other => {
                debug!("Unsupported next header: {}", other);
                Vec::new()
            }
        }
    }

    fn process_tcp(&mut self, packet: &Ipv6Packet) -> Vec<Bytes> {
        let segment = parse_tcp_segment(packet);
        trace!("Received {}", segment);
        if self.config.verify_checksums && segment.is_well_formed() && !segment.verify_checksum() {
            debug!("Dropping TCP segment with bad checksum: {}", segment);
            return Vec::new();
        }
        to_datagrams(self.engine.handle(&segment))
    }

    fn process_icmp6(&mut self, packet: &Ipv6Packet) -> Vec<Bytes> {
        let message = parse_icmp6(packet);
        trace!("Received {}", message);
        if self.config.verify_checksums && !message.verify_checksum() {
            debug!("Dropping ICMPv6 message with bad checksum: {}", message);
            return Vec::new();
        }
        match echo_reply(&message, self.config.echo_hop_limit) {
            Some(reply) => vec![reply],
            None => {
                debug!("No reply for {}", message);
                Vec::new()
            }
        }
    }

    /// Application data for an open TCP session; see [`TcpSessionEngine::write`].
    pub fn write(&mut self, pair: &AddressPair, data: &[u8], close: bool) -> Result<Vec<Bytes>, SessionError> {
        self.engine.write(pair, data, close).map(to_datagrams)
    }
}

fn to_datagrams(segments: Vec<TcpSegment>) -> Vec<Bytes> {
    segments
        .into_iter()
        .map(|segment| segment.packet().as_bytes().clone())
        .collect()
}
