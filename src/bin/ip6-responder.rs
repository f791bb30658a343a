//! IPv6 responder daemon
//!
//! Receives raw IPv6 datagrams tunnelled over UDP (or from a TUN device),
//! answers pings and echoes TCP streams.

use std::net::SocketAddr;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use signal_hook::consts::{SIGINT, SIGTERM};

use ip6_responder::{PacketTransport, Responder, ResponderConfig, Server, ServerConfig, UdpTransport};

/// User-space IPv6 ICMP and TCP echo responder
#[derive(Parser, Debug)]
#[command(name = "ip6-responder", version, about)]
struct Args {
    /// UDP address to receive tunnelled datagrams on [default: [::]:7777]
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// TCP receive window advertised on every segment
    #[arg(long)]
    window: Option<u16>,

    /// Most data bytes per outgoing TCP segment
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Open TCP sessions beyond which new SYNs are dropped
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Drop TCP and ICMPv6 with an invalid checksum
    #[arg(long)]
    verify_checksums: bool,

    /// Read packets from this TUN device instead of UDP
    #[cfg(feature = "tun")]
    #[arg(long, value_name = "NAME", conflicts_with = "listen")]
    tun: Option<String>,
}

impl Args {
    fn responder_config(&self) -> ResponderConfig {
        let mut config = ResponderConfig {
            verify_checksums: self.verify_checksums,
            ..ResponderConfig::default()
        };
        if let Some(window) = self.window {
            config.tcp.window_size = window;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.tcp.chunk_size = chunk_size;
        }
        if let Some(max_sessions) = self.max_sessions {
            config.tcp.max_sessions = max_sessions;
        }
        config
    }

    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::default();
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        config
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let responder_config = args.responder_config();
    let server_config = args.server_config();
    info!(
        "Starting with window {}, chunk size {}, max {} sessions",
        responder_config.tcp.window_size, responder_config.tcp.chunk_size, responder_config.tcp.max_sessions
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            error!("Failed to install signal handler: {}", e);
            process::exit(1);
        }
    }

    let responder = Responder::new(responder_config);

    #[cfg(feature = "tun")]
    if let Some(name) = &args.tun {
        let transport = match ip6_responder::iface::TunTransport::open(name) {
            Ok(transport) => transport,
            Err(e) => {
                error!("Failed to open TUN device {}: {}", name, e);
                process::exit(1);
            }
        };
        serve(transport, responder, &server_config, &shutdown);
        return;
    }

    let transport = match UdpTransport::bind(server_config.listen, server_config.poll_interval) {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to bind {}: {}", server_config.listen, e);
            process::exit(1);
        }
    };
    serve(transport, responder, &server_config, &shutdown);
}

fn serve<T: PacketTransport>(transport: T, responder: Responder, config: &ServerConfig, shutdown: &AtomicBool) {
    let mut server = Server::new(transport, responder, config);
    if let Err(e) = server.run(shutdown) {
        error!("Server stopped: {}", e);
        process::exit(1);
    }
}
