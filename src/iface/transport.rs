//! Packet transports and the serving loop
//!
//! A transport moves whole IP datagrams in and out of the process. The
//! UDP transport carries one datagram per UDP payload and replies to
//! whoever sent it; the TUN transport (feature `tun`) reads and writes a
//! kernel TUN device directly.

use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::TransportError;
use crate::iface::interface::Responder;
use crate::iface::ip::AddressPair;
use crate::transport::session::{DataHandler, Echo};

/// Byte-in/byte-out datagram transport.
pub trait PacketTransport {
    /// Where a datagram came from, and so where its replies go.
    type Peer: Clone + fmt::Debug;

    /// Receive one datagram into `buf`.
    ///
    /// Returns `Ok(None)` when nothing arrived before the transport's
    /// timeout.
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, Self::Peer)>, TransportError>;

    fn send_to(&mut self, packet: &[u8], peer: &Self::Peer) -> Result<(), TransportError>;
}

/// Raw IP datagrams tunnelled in UDP payloads.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind `addr`; receives give up after `read_timeout`.
    pub fn bind(addr: SocketAddr, read_timeout: Duration) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(read_timeout))?;
        info!("Listening on udp {}", socket.local_addr()?);
        Ok(UdpTransport { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

impl PacketTransport for UdpTransport {
    type Peer = SocketAddr;

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransportError> {
        match self.socket.recv_from(buf) {
            Ok((len, peer)) => Ok(Some((len, peer))),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn send_to(&mut self, packet: &[u8], peer: &SocketAddr) -> Result<(), TransportError> {
        self.socket.send_to(packet, peer)?;
        Ok(())
    }
}

#[cfg(feature = "tun")]
pub use self::tun::TunTransport;

#[cfg(feature = "tun")]
mod tun {
    use std::io;

    use log::info;
    use tun_tap::{Iface, Mode};

    use super::PacketTransport;
    use crate::error::TransportError;

    /// A TUN device without packet info headers.
    ///
    /// Receives block until the kernel hands over a packet, so queued
    /// application data is only flushed when traffic arrives.
    pub struct TunTransport {
        iface: Iface,
    }

    impl TunTransport {
        pub fn open(name: &str) -> Result<Self, TransportError> {
            let iface = Iface::without_packet_info(name, Mode::Tun)?;
            info!("TUN device created: {}", iface.name());
            Ok(TunTransport { iface })
        }

        pub fn name(&self) -> &str {
            self.iface.name()
        }
    }

    impl PacketTransport for TunTransport {
        type Peer = ();

        fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, ())>, TransportError> {
            match self.iface.recv(buf) {
                Ok(len) => Ok(Some((len, ()))),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
                Err(e) => Err(e.into()),
            }
        }

        fn send_to(&mut self, packet: &[u8], _peer: &()) -> Result<(), TransportError> {
            self.iface.send(packet)?;
            Ok(())
        }
    }
}

/// Bytes an application wants sent on an open TCP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppData {
    /// Reply direction of the session.
    pub pair: AddressPair,
    pub data: Vec<u8>,
    /// Close our side after `data`.
    pub close: bool,
}

/// Drives a [`Responder`] from a transport, one datagram at a time.
///
/// Application data arrives through a bounded channel (see
/// [`Server::app_sender`]) and is applied between datagrams, so the
/// session engine is only ever touched from the serving thread.
pub struct Server<T: PacketTransport, H = Echo> {
    transport: T,
    responder: Responder<H>,
    app_tx: SyncSender<AppData>,
    app_rx: Receiver<AppData>,
    /// Sender of the most recent datagram; application data goes here.
    last_peer: Option<T::Peer>,
    buf: Vec<u8>,
}

impl<T: PacketTransport, H: DataHandler> Server<T, H> {
    pub fn new(transport: T, responder: Responder<H>, config: &ServerConfig) -> Self {
        let (app_tx, app_rx) = mpsc::sync_channel(config.app_channel_capacity);
        Server {
            transport,
            responder,
            app_tx,
            app_rx,
            last_peer: None,
            buf: vec![0u8; config.recv_buffer_size],
        }
    }

    /// A handle for producers of application data. Sends block while the
    /// channel is full.
    pub fn app_sender(&self) -> SyncSender<AppData> {
        self.app_tx.clone()
    }

    pub fn responder(&self) -> &Responder<H> {
        &self.responder
    }

    pub fn responder_mut(&mut self) -> &mut Responder<H> {
        &mut self.responder
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Receive and answer at most one datagram, then apply queued
    /// application data.
    ///
    /// Returns how many datagrams were sent. Individual send failures are
    /// logged and skipped; only receive failures are returned.
    pub fn run_once(&mut self) -> Result<usize, TransportError> {
        let mut sent = 0;

        if let Some((len, peer)) = self.transport.recv(&mut self.buf)? {
            let packet = Bytes::copy_from_slice(&self.buf[..len]);
            debug!("Received {} bytes from {:?}", len, peer);
            let replies = self.responder.handle_packet(packet);
            sent += self.send_all(&replies, &peer);
            self.last_peer = Some(peer);
        }

        sent += self.drain_app_data();
        Ok(sent)
    }

    /// Serve until `shutdown` is set or the transport fails.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), TransportError> {
        while !shutdown.load(Ordering::Relaxed) {
            self.run_once()?;
        }
        info!("Shutting down");
        Ok(())
    }

    fn drain_app_data(&mut self) -> usize {
        let mut sent = 0;
        while let Ok(app) = self.app_rx.try_recv() {
            let replies = match self.responder.write(&app.pair, &app.data, app.close) {
                Ok(replies) => replies,
                Err(e) => {
                    warn!("Dropping {} bytes of application data: {}", app.data.len(), e);
                    continue;
                }
            };
            let Some(peer) = self.last_peer.clone() else {
                warn!("Cannot flush application data for {}: {}", app.pair, TransportError::NoPeer);
                continue;
            };
            sent += self.send_all(&replies, &peer);
        }
        sent
    }

    fn send_all(&mut self, replies: &[Bytes], peer: &T::Peer) -> usize {
        let mut sent = 0;
        for reply in replies {
            match self.transport.send_to(reply, peer) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Failed to send {} byte reply to {:?}: {}", reply.len(), peer, e),
            }
        }
        sent
    }
}
