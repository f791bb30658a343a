//! TCP session tracking
//!
//! A minimal responder-side TCP: sessions are opened by a peer's SYN,
//! inbound data must arrive exactly in order, and outgoing bytes stay
//! buffered until the peer acknowledges them. There are no timers; a
//! segment is only ever sent in reaction to an inbound segment or an
//! application write.

use std::collections::HashMap;

use bytes::{Buf, BytesMut};
use log::{debug, error, trace, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::config::TcpConfig;
use crate::error::{PacketError, SessionError};
use crate::iface::ip::AddressPair;
use crate::network::ipv6::Ipv6Packet;
use crate::transport::tcp::{build_tcp_segment_with_hop_limit, parse_tcp_segment, TcpFlags, TcpSegment};

/// Receives each accepted segment's data and decides what to send back.
pub trait DataHandler {
    /// `fin` is set when the peer has finished sending. Anything written
    /// to `out` is flushed right after this returns.
    fn handle_data(
        &mut self,
        pair: &AddressPair,
        data: &[u8],
        fin: bool,
        out: &mut TcpOutputBuffer,
    ) -> Result<(), SessionError>;
}

/// Sends every received byte straight back and closes when the peer does.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

impl DataHandler for Echo {
    fn handle_data(
        &mut self,
        pair: &AddressPair,
        data: &[u8],
        fin: bool,
        out: &mut TcpOutputBuffer,
    ) -> Result<(), SessionError> {
        if data.is_empty() && !fin {
            return Ok(());
        }
        trace!("Echoing {} bytes{} on {}", data.len(), if fin { " and a FIN" } else { "" }, pair);
        out.write(data, fin)
    }
}

/// Outgoing bytes not yet acknowledged by the peer.
#[derive(Debug)]
pub struct TcpOutputBuffer {
    buffer: BytesMut,
    /// Sequence number of the first buffered byte, or of the next byte to
    /// be written when empty.
    base_sequence: u32,
    closed: bool,
    close_acked: bool,
    syn_acked: bool,
}

impl TcpOutputBuffer {
    /// Our SYN takes `initial_sequence`, so data starts one after it.
    pub fn new(initial_sequence: u32) -> Self {
        TcpOutputBuffer {
            buffer: BytesMut::new(),
            base_sequence: initial_sequence.wrapping_add(1),
            closed: false,
            close_acked: false,
            syn_acked: false,
        }
    }

    /// Append data to the to-be-sent buffer.
    ///
    /// With `close`, no more data may ever be written and a FIN follows
    /// the last byte.
    pub fn write(&mut self, data: &[u8], close: bool) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::WriteAfterClose);
        }
        self.buffer.extend_from_slice(data);
        if close {
            self.closed = true;
        }
        Ok(())
    }

    /// Drop bytes the peer has acknowledged.
    ///
    /// Acks are compared modulo 2^32 relative to `base_sequence`. Acks
    /// older than it are ignored, as are acks past what could have been
    /// sent.
    pub fn ack(&mut self, ack_number: u32) {
        let offset = ack_number.wrapping_sub(self.base_sequence);
        if (offset as i32) < 0 {
            trace!("Ignoring old ack {} (base {})", ack_number, self.base_sequence);
            return;
        }

        let len = self.buffer.len() as u32;
        if offset <= len {
            self.syn_acked = true;
            self.buffer.advance(offset as usize);
            self.base_sequence = ack_number;
        } else if self.closed && offset == len + 1 {
            // Everything plus our FIN.
            self.syn_acked = true;
            self.buffer.clear();
            self.base_sequence = self.base_sequence.wrapping_add(len);
            self.close_acked = true;
        } else {
            warn!(
                "Received ack of more data than has been buffered: {} (base {}, {} bytes buffered)",
                ack_number, self.base_sequence, len
            );
        }
    }

    /// Sequence number following everything sent so far.
    pub fn next_sequence(&self) -> u32 {
        self.base_sequence
            .wrapping_add(self.buffer.len() as u32)
            .wrapping_add(u32::from(self.close_acked))
    }

    pub fn base_sequence(&self) -> u32 {
        self.base_sequence
    }

    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_close_acked(&self) -> bool {
        self.close_acked
    }

    pub fn is_syn_acked(&self) -> bool {
        self.syn_acked
    }
}

/// State of one connection, keyed by the reply-direction address pair.
#[derive(Debug)]
pub struct TcpSession {
    output: TcpOutputBuffer,
    /// Sequence number the next accepted inbound segment must carry.
    next_inbound: u32,
    /// The peer opened with SYN and data together, so it should also
    /// accept SYN/FIN combined with data from us.
    combine: bool,
    peer_fin: bool,
}

impl TcpSession {
    fn new(initial_inbound: u32, initial_sequence: u32, combine: bool) -> Self {
        TcpSession {
            output: TcpOutputBuffer::new(initial_sequence),
            next_inbound: initial_inbound,
            combine,
            peer_fin: false,
        }
    }

    pub fn output(&self) -> &TcpOutputBuffer {
        &self.output
    }

    pub fn next_inbound(&self) -> u32 {
        self.next_inbound
    }

    pub fn combines_flags(&self) -> bool {
        self.combine
    }

    /// Both directions are closed and our FIN has been acknowledged.
    pub fn is_finished(&self) -> bool {
        self.peer_fin && self.output.close_acked
    }

    /// Send whatever SYN, data and FIN are outstanding.
    ///
    /// Returns the segments sent; empty if there was nothing to send.
    fn flush(&self, pair: &AddressPair, config: &TcpConfig) -> Result<Vec<TcpSegment>, PacketError> {
        let mut sent = Vec::new();
        let out = &self.output;
        let chunk = out.len().min(config.chunk_size);

        if self.combine {
            let include_syn = !out.syn_acked;
            let include_fin = out.closed && !out.close_acked && chunk == out.len();
            if !include_syn && chunk == 0 && !include_fin {
                return Ok(sent);
            }

            let mut flags = TcpFlags::ACK;
            flags.set(TcpFlags::SYN, include_syn);
            flags.set(TcpFlags::FIN, include_fin);
            let seq = if include_syn {
                out.base_sequence.wrapping_sub(1)
            } else {
                out.base_sequence
            };
            emit(pair, config, seq, self.next_inbound, flags, &out.buffer[..chunk], &mut sent)?;
        } else {
            if !out.syn_acked {
                emit(
                    pair,
                    config,
                    out.base_sequence.wrapping_sub(1),
                    self.next_inbound,
                    TcpFlags::SYN | TcpFlags::ACK,
                    &[],
                    &mut sent,
                )?;
            }
            if chunk > 0 {
                emit(
                    pair,
                    config,
                    out.base_sequence,
                    self.next_inbound,
                    TcpFlags::ACK,
                    &out.buffer[..chunk],
                    &mut sent,
                )?;
            }
            if out.closed && !out.close_acked && out.len() <= config.chunk_size {
                emit(
                    pair,
                    config,
                    out.base_sequence.wrapping_add(out.len() as u32),
                    self.next_inbound,
                    TcpFlags::FIN | TcpFlags::ACK,
                    &[],
                    &mut sent,
                )?;
            }
        }

        Ok(sent)
    }
}

fn emit(
    pair: &AddressPair,
    config: &TcpConfig,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    data: &[u8],
    sent: &mut Vec<TcpSegment>,
) -> Result<(), PacketError> {
    let bytes = build_tcp_segment_with_hop_limit(pair, seq, ack, flags, config.window_size, data, config.hop_limit)?;
    let segment = parse_tcp_segment(&Ipv6Packet::parse(bytes)?);
    trace!("Sending {}", segment);
    sent.push(segment);
    Ok(())
}

/// Single-threaded tracker of every TCP session this endpoint answers.
pub struct TcpSessionEngine<H = Echo> {
    sessions: HashMap<AddressPair, TcpSession>,
    handler: H,
    config: TcpConfig,
    rng: StdRng,
}

impl TcpSessionEngine<Echo> {
    pub fn new(config: TcpConfig) -> Self {
        Self::with_handler(config, Echo)
    }
}

impl Default for TcpSessionEngine<Echo> {
    fn default() -> Self {
        Self::new(TcpConfig::default())
    }
}

impl<H: DataHandler> TcpSessionEngine<H> {
    /// A `chunk_size` of 0 is raised to 1.
    pub fn with_handler(mut config: TcpConfig, handler: H) -> Self {
        if config.chunk_size == 0 {
            warn!("TCP chunk size of 0 would never send data, using 1");
            config.chunk_size = 1;
        }
        TcpSessionEngine {
            sessions: HashMap::new(),
            handler,
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Draw initial sequence numbers from a seeded generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Look up a session by its reply-direction address pair.
    pub fn session(&self, pair: &AddressPair) -> Option<&TcpSession> {
        self.sessions.get(pair)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Process one inbound segment and return the segments to send back.
    ///
    /// Malformed segments, segments for connections we never saw open and
    /// segments not carrying exactly the expected sequence number are
    /// dropped without a reply.
    pub fn handle(&mut self, segment: &TcpSegment) -> Vec<TcpSegment> {
        if let Some(note) = segment.note() {
            debug!("Dropping malformed TCP segment: {}", note);
            return Vec::new();
        }

        // Sessions are keyed by the direction we send in.
        let pair = segment.address_pair().inverse();

        let mut created = false;
        if segment.is_syn() && !self.sessions.contains_key(&pair) {
            if self.sessions.len() >= self.config.max_sessions {
                debug!("Session table full, dropping SYN for {}", pair);
                return Vec::new();
            }
            let initial_sequence = self.rng.next_u32();
            let combine = segment.has_data();
            debug!(
                "New session {} (initial sequence {}, combine {})",
                pair, initial_sequence, combine
            );
            self.sessions
                .insert(pair, TcpSession::new(segment.seq_number(), initial_sequence, combine));
            created = true;
        }

        let Some(session) = self.sessions.get_mut(&pair) else {
            debug!("No session for {}, dropping {}", pair, segment);
            return Vec::new();
        };

        if segment.seq_number() != session.next_inbound {
            debug!(
                "Out-of-order segment on {}: expected seq {}, got {}",
                pair,
                session.next_inbound,
                segment.seq_number()
            );
            return Vec::new();
        }

        if segment.is_rst() {
            debug!("Session {} reset by peer", pair);
            self.sessions.remove(&pair);
            return Vec::new();
        }

        if let Err(e) = self
            .handler
            .handle_data(&pair, segment.data(), segment.is_fin(), &mut session.output)
        {
            warn!("Data handler failed on {}: {}", pair, e);
        }
        if segment.is_fin() {
            session.peer_fin = true;
        }
        session.next_inbound = segment.seq_number().wrapping_add(segment.sequence_delta());

        // The SYN that opened the session cannot acknowledge anything.
        if segment.is_ack() && !created {
            session.output.ack(segment.ack_number());
        }

        let ack_required = segment.is_syn() || segment.is_fin() || segment.has_data();
        let mut replies = session.flush(&pair, &self.config).unwrap_or_else(|e| {
            error!("Failed to build segment for {}: {}", pair, e);
            Vec::new()
        });
        if replies.is_empty() && ack_required {
            if let Err(e) = emit(
                &pair,
                &self.config,
                session.output.next_sequence(),
                session.next_inbound,
                TcpFlags::ACK,
                &[],
                &mut replies,
            ) {
                error!("Failed to build ACK for {}: {}", pair, e);
            }
        }

        if session.is_finished() {
            debug!("Session {} closed", pair);
            self.sessions.remove(&pair);
        }

        replies
    }

    /// Queue application data on an open session and flush it.
    ///
    /// `pair` is the reply direction, as returned by
    /// `segment.address_pair().inverse()`. The data stays buffered when
    /// the flush fails with [`SessionError::Build`].
    pub fn write(&mut self, pair: &AddressPair, data: &[u8], close: bool) -> Result<Vec<TcpSegment>, SessionError> {
        let session = self
            .sessions
            .get_mut(pair)
            .ok_or(SessionError::NoSession(*pair))?;
        session.output.write(data, close)?;
        Ok(session.flush(pair, &self.config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tcp::build_tcp_segment;

    const A: [u8; 16] = [0x20, 0x20, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
    const B: [u8; 16] = [0x20, 0x20, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];

    fn peer() -> AddressPair {
        AddressPair::v6(A, 40000, B, 7)
    }

    fn segment(seq: u32, ack: u32, flags: TcpFlags, data: &[u8]) -> TcpSegment {
        let bytes = build_tcp_segment(&peer(), seq, ack, flags, 10000, data).unwrap();
        parse_tcp_segment(&Ipv6Packet::parse(bytes).unwrap())
    }

    #[test]
    fn test_output_buffer_trims_acked_prefix() {
        let mut buf = TcpOutputBuffer::new(99);
        assert_eq!(buf.base_sequence(), 100);
        buf.write(b"abcdef", false).unwrap();

        buf.ack(103);
        assert!(buf.is_syn_acked());
        assert_eq!(buf.pending(), b"def");
        assert_eq!(buf.base_sequence(), 103);

        // Old ack changes nothing.
        buf.ack(101);
        assert_eq!(buf.pending(), b"def");
    }

    #[test]
    fn test_output_buffer_close_ack() {
        let mut buf = TcpOutputBuffer::new(0);
        buf.write(b"xy", true).unwrap();
        buf.ack(3);
        assert!(!buf.is_close_acked());
        assert!(buf.is_empty());

        buf.ack(4);
        assert!(buf.is_close_acked());
        assert_eq!(buf.base_sequence(), 3);
        assert_eq!(buf.next_sequence(), 4);
    }

    #[test]
    fn test_output_buffer_ignores_ack_beyond_data() {
        let mut buf = TcpOutputBuffer::new(0);
        buf.write(b"xy", false).unwrap();
        buf.ack(10);
        assert_eq!(buf.pending(), b"xy");
        assert!(!buf.is_syn_acked());
    }

    #[test]
    fn test_output_buffer_syn_ack_across_wrap() {
        let mut buf = TcpOutputBuffer::new(u32::MAX);
        assert_eq!(buf.base_sequence(), 0);
        buf.ack(u32::MAX); // acks nothing, not even the SYN
        assert!(!buf.is_syn_acked());
        buf.ack(0);
        assert!(buf.is_syn_acked());
    }

    #[test]
    fn test_write_after_close() {
        let mut buf = TcpOutputBuffer::new(0);
        buf.write(b"", true).unwrap();
        assert!(matches!(buf.write(b"more", false), Err(SessionError::WriteAfterClose)));
    }

    #[test]
    fn test_malformed_and_unknown_segments_dropped() {
        let mut engine = TcpSessionEngine::default().with_seed(1);
        assert!(engine.handle(&segment(1, 0, TcpFlags::ACK, b"data")).is_empty());
        assert_eq!(engine.session_count(), 0);
    }

    #[test]
    fn test_out_of_order_dropped() {
        let mut engine = TcpSessionEngine::default().with_seed(2);
        assert_eq!(engine.handle(&segment(500, 0, TcpFlags::SYN, b"")).len(), 1);

        // Retransmitted SYN and a segment from the future both get nothing.
        assert!(engine.handle(&segment(500, 0, TcpFlags::SYN, b"")).is_empty());
        assert!(engine.handle(&segment(600, 0, TcpFlags::ACK, b"late")).is_empty());
        assert_eq!(engine.session(&peer().inverse()).unwrap().next_inbound(), 501);
    }

    #[test]
    fn test_large_echo_is_chunked() {
        let mut engine = TcpSessionEngine::default().with_seed(3);
        let syn_ack = engine.handle(&segment(0, 0, TcpFlags::SYN, b"")).remove(0);
        let mut ours = syn_ack.seq_number().wrapping_add(1);

        let data = vec![7u8; 1500];
        let replies = engine.handle(&segment(1, ours, TcpFlags::ACK | TcpFlags::FIN, &data));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].data().len(), 1024);
        assert_eq!(replies[0].flags(), TcpFlags::ACK);
        assert_eq!(replies[0].ack_number(), 1502);

        ours = ours.wrapping_add(1024);
        let replies = engine.handle(&segment(1502, ours, TcpFlags::ACK, b""));
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].data().len(), 476);
        assert_eq!(replies[0].seq_number(), ours);
        assert_eq!(replies[1].flags(), TcpFlags::FIN | TcpFlags::ACK);
        assert_eq!(replies[1].seq_number(), ours.wrapping_add(476));

        let fin_end = ours.wrapping_add(477);
        assert!(engine.handle(&segment(1502, fin_end, TcpFlags::ACK, b"")).is_empty());
        assert_eq!(engine.session_count(), 0);
    }

    #[test]
    fn test_rst_removes_session() {
        let mut engine = TcpSessionEngine::default().with_seed(4);
        engine.handle(&segment(10, 0, TcpFlags::SYN, b""));
        assert_eq!(engine.session_count(), 1);
        assert!(engine.handle(&segment(11, 0, TcpFlags::RST, b"")).is_empty());
        assert_eq!(engine.session_count(), 0);
    }

    #[test]
    fn test_session_limit() {
        let config = TcpConfig {
            max_sessions: 1,
            ..TcpConfig::default()
        };
        let mut engine = TcpSessionEngine::new(config).with_seed(5);
        engine.handle(&segment(10, 0, TcpFlags::SYN, b""));

        let other = AddressPair::v6(A, 40001, B, 7);
        let bytes = build_tcp_segment(&other, 10, 0, TcpFlags::SYN, 10000, b"").unwrap();
        let syn = parse_tcp_segment(&Ipv6Packet::parse(bytes).unwrap());
        assert!(engine.handle(&syn).is_empty());
        assert_eq!(engine.session_count(), 1);
    }

    #[test]
    fn test_application_write() {
        let mut engine = TcpSessionEngine::default().with_seed(6);
        let reply_pair = peer().inverse();
        assert!(matches!(
            engine.write(&reply_pair, b"hi", false),
            Err(SessionError::NoSession(_))
        ));

        let syn_ack = engine.handle(&segment(0, 0, TcpFlags::SYN, b"")).remove(0);
        let ours = syn_ack.seq_number().wrapping_add(1);
        engine.handle(&segment(1, ours, TcpFlags::ACK, b""));

        let sent = engine.write(&reply_pair, b"hi", false).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0].data()[..], b"hi");
        assert_eq!(sent[0].seq_number(), ours);
        assert_eq!(sent[0].ack_number(), 1);
        assert_eq!(sent[0].address_pair(), reply_pair);
    }

    #[derive(Default)]
    struct Collect(Vec<u8>);

    impl DataHandler for Collect {
        fn handle_data(
            &mut self,
            _pair: &AddressPair,
            data: &[u8],
            _fin: bool,
            _out: &mut TcpOutputBuffer,
        ) -> Result<(), SessionError> {
            self.0.extend_from_slice(data);
            Ok(())
        }
    }

    #[test]
    fn test_custom_handler_gets_bare_acks() {
        let mut engine = TcpSessionEngine::with_handler(TcpConfig::default(), Collect::default()).with_seed(7);
        let syn_ack = engine.handle(&segment(0, 0, TcpFlags::SYN, b"")).remove(0);
        let ours = syn_ack.seq_number().wrapping_add(1);

        let replies = engine.handle(&segment(1, ours, TcpFlags::ACK, b"quiet"));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].flags(), TcpFlags::ACK);
        assert!(replies[0].data().is_empty());
        assert_eq!(replies[0].seq_number(), ours);
        assert_eq!(replies[0].ack_number(), 6);
        assert_eq!(engine.handler().0, b"quiet");
    }

    fn open_session(engine: &mut TcpSessionEngine, seed_seq: u32) -> u32 {
        let syn_ack = engine.handle(&segment(seed_seq, 0, TcpFlags::SYN, b"")).remove(0);
        let ours = syn_ack.seq_number().wrapping_add(1);
        engine.handle(&segment(seed_seq.wrapping_add(1), ours, TcpFlags::ACK, b""));
        ours
    }

    #[test]
    fn test_write_reports_unbuildable_segment() {
        let config = TcpConfig {
            chunk_size: 70_000,
            ..TcpConfig::default()
        };
        let mut engine = TcpSessionEngine::new(config).with_seed(8);
        open_session(&mut engine, 0);

        let reply_pair = peer().inverse();
        let result = engine.write(&reply_pair, &[0u8; 66_000], false);
        assert!(matches!(
            result,
            Err(SessionError::Build(PacketError::PayloadTooLarge(_)))
        ));
        // Still buffered for a later flush.
        assert_eq!(engine.session(&reply_pair).unwrap().output().len(), 66_000);
    }

    #[test]
    fn test_zero_chunk_size_raised_to_one() {
        let config = TcpConfig {
            chunk_size: 0,
            ..TcpConfig::default()
        };
        let mut engine = TcpSessionEngine::new(config).with_seed(9);
        assert_eq!(engine.config().chunk_size, 1);

        let ours = open_session(&mut engine, 0);
        let replies = engine.handle(&segment(1, ours, TcpFlags::ACK, b"abc"));
        assert_eq!(replies.len(), 1);
        assert_eq!(&replies[0].data()[..], b"a");
    }
}
