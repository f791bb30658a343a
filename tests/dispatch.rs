use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;

use bytes::Bytes;
use ip6_responder::config::ServerConfig;
use ip6_responder::network::icmpv6::{ICMPV6_ECHO_REPLY, ICMPV6_ECHO_REQUEST};
use ip6_responder::network::ipv6::Ipv6Packet;
use ip6_responder::{
    build_icmp6, build_tcp_segment, parse_icmp6, parse_tcp_segment, AddressPair, AppData, PacketTransport,
    Responder, Server, TcpFlags, TransportError,
};

const PEER: [u8; 16] = [0xfd, 0x12, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01];
const LOCAL: [u8; 16] = [0xfd, 0x12, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x02];

/// Hands out queued datagrams, then reports itself closed.
#[derive(Default)]
struct MemoryTransport {
    inbound: VecDeque<(Bytes, u32)>,
    sent: Vec<(Bytes, u32)>,
    /// Sends to this peer fail.
    unreachable: Option<u32>,
    idle_polls: usize,
}

impl MemoryTransport {
    fn push(&mut self, packet: Bytes, peer: u32) {
        self.inbound.push_back((packet, peer));
    }
}

impl PacketTransport for MemoryTransport {
    type Peer = u32;

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, u32)>, TransportError> {
        match self.inbound.pop_front() {
            Some((packet, peer)) => {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                Ok(Some((len, peer)))
            }
            None if self.idle_polls > 0 => {
                self.idle_polls -= 1;
                Ok(None)
            }
            None => Err(TransportError::Closed),
        }
    }

    fn send_to(&mut self, packet: &[u8], peer: &u32) -> Result<(), TransportError> {
        if self.unreachable == Some(*peer) {
            return Err(TransportError::NoPeer);
        }
        self.sent.push((Bytes::copy_from_slice(packet), *peer));
        Ok(())
    }
}

fn peer_pair() -> AddressPair {
    AddressPair::v6(PEER, 40000, LOCAL, 9)
}

fn tcp(seq: u32, ack: u32, flags: TcpFlags, data: &[u8]) -> Bytes {
    build_tcp_segment(&peer_pair(), seq, ack, flags, 4096, data).unwrap()
}

fn ping() -> Bytes {
    build_icmp6(&PEER, &LOCAL, 64, ICMPV6_ECHO_REQUEST, 0, &[0, 7, 0, 1]).unwrap()
}

fn server(transport: MemoryTransport) -> Server<MemoryTransport> {
    Server::new(transport, Responder::default().with_seed(1), &ServerConfig::default())
}

#[test]
fn test_replies_go_to_sender() {
    let mut transport = MemoryTransport::default();
    transport.push(ping(), 1);
    transport.push(tcp(100, 0, TcpFlags::SYN, b""), 2);

    let mut server = server(transport);
    assert_eq!(server.run_once().unwrap(), 1);
    assert_eq!(server.run_once().unwrap(), 1);

    let sent = &server.transport().sent;
    assert_eq!(sent[0].1, 1);
    let echo = parse_icmp6(&Ipv6Packet::parse(sent[0].0.clone()).unwrap());
    assert_eq!(echo.msg_type, ICMPV6_ECHO_REPLY);

    assert_eq!(sent[1].1, 2);
    let syn_ack = parse_tcp_segment(&Ipv6Packet::parse(sent[1].0.clone()).unwrap());
    assert_eq!(syn_ack.flags(), TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(syn_ack.ack_number(), 101);
}

#[test]
fn test_run_stops_when_transport_closes() {
    let mut transport = MemoryTransport::default();
    transport.push(ping(), 1);
    transport.push(Bytes::from_static(b"garbage"), 1);
    transport.push(ping(), 1);

    let mut server = server(transport);
    let shutdown = AtomicBool::new(false);
    assert!(matches!(server.run(&shutdown), Err(TransportError::Closed)));
    assert_eq!(server.transport().sent.len(), 2);
}

#[test]
fn test_send_failure_does_not_stop_loop() {
    let mut transport = MemoryTransport {
        unreachable: Some(1),
        ..MemoryTransport::default()
    };
    transport.push(ping(), 1);
    transport.push(ping(), 2);

    let mut server = server(transport);
    assert_eq!(server.run_once().unwrap(), 0);
    assert_eq!(server.run_once().unwrap(), 1);
    assert_eq!(server.transport().sent.len(), 1);
}

#[test]
fn test_application_data_flushed_to_last_peer() {
    let mut transport = MemoryTransport {
        idle_polls: 1,
        ..MemoryTransport::default()
    };
    transport.push(tcp(0, 0, TcpFlags::SYN, b""), 5);

    let mut server = server(transport);
    let app = server.app_sender();
    assert_eq!(server.run_once().unwrap(), 1);
    let syn_ack = parse_tcp_segment(&Ipv6Packet::parse(server.transport().sent[0].0.clone()).unwrap());

    app.send(AppData {
        pair: peer_pair().inverse(),
        data: b"banner".to_vec(),
        close: false,
    })
    .unwrap();
    // Data for a session that does not exist is dropped.
    app.send(AppData {
        pair: peer_pair(),
        data: b"lost".to_vec(),
        close: false,
    })
    .unwrap();

    // Nothing arrives, but the queued write still goes out. The SYN has
    // not been acked, so it is repeated ahead of the data.
    assert_eq!(server.run_once().unwrap(), 2);
    let sent = &server.transport().sent;
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|(_, peer)| *peer == 5));

    let data = parse_tcp_segment(&Ipv6Packet::parse(sent[2].0.clone()).unwrap());
    assert_eq!(&data.data()[..], b"banner");
    assert_eq!(data.seq_number(), syn_ack.seq_number().wrapping_add(1));
}

#[test]
fn test_application_data_queued_before_session_opens() {
    let mut transport = MemoryTransport {
        idle_polls: 1,
        ..MemoryTransport::default()
    };
    transport.push(tcp(0, 0, TcpFlags::SYN, b""), 5);

    let mut server = server(transport);
    let app = server.app_sender();
    app.send(AppData {
        pair: peer_pair().inverse(),
        data: b"early".to_vec(),
        close: false,
    })
    .unwrap();

    // Queued writes are applied after the datagram, so the session exists
    // by then.
    assert_eq!(server.run_once().unwrap(), 3);
}
