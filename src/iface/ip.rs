//! Addresses and the 4-tuple that keys TCP sessions.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpAddr {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl IpAddr {
    pub fn version(&self) -> u8 {
        match self {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        }
    }

    pub fn octets(&self) -> &[u8] {
        match self {
            IpAddr::V4(addr) => addr,
            IpAddr::V6(addr) => addr,
        }
    }
}

impl fmt::Display for IpAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddr::V4(addr) => write!(f, "{}", Ipv4Addr::from(*addr)),
            IpAddr::V6(addr) => write!(f, "[{}]", Ipv6Addr::from(*addr)),
        }
    }
}

/// Source and destination address/port of one direction of a connection.
///
/// Both addresses always share an IP version, so equality and hashing
/// only ever see the 4 or 16 address bytes valid for it plus the ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressPair {
    source: IpAddr,
    source_port: u16,
    destination: IpAddr,
    destination_port: u16,
}

impl AddressPair {
    /// Returns `None` when the two addresses are of different versions.
    pub fn new(source: IpAddr, source_port: u16, destination: IpAddr, destination_port: u16) -> Option<Self> {
        if source.version() != destination.version() {
            return None;
        }
        Some(AddressPair {
            source,
            source_port,
            destination,
            destination_port,
        })
    }

    pub fn v6(source: [u8; 16], source_port: u16, destination: [u8; 16], destination_port: u16) -> Self {
        AddressPair {
            source: IpAddr::V6(source),
            source_port,
            destination: IpAddr::V6(destination),
            destination_port,
        }
    }

    pub fn v4(source: [u8; 4], source_port: u16, destination: [u8; 4], destination_port: u16) -> Self {
        AddressPair {
            source: IpAddr::V4(source),
            source_port,
            destination: IpAddr::V4(destination),
            destination_port,
        }
    }

    pub fn ip_version(&self) -> u8 {
        self.source.version()
    }

    pub fn source(&self) -> IpAddr {
        self.source
    }

    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    pub fn destination(&self) -> IpAddr {
        self.destination
    }

    pub fn destination_port(&self) -> u16 {
        self.destination_port
    }

    /// The opposite direction of the same connection.
    pub fn inverse(&self) -> Self {
        AddressPair {
            source: self.destination,
            source_port: self.destination_port,
            destination: self.source,
            destination_port: self.source_port,
        }
    }
}

impl fmt::Display for AddressPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source, self.source_port, self.destination, self.destination_port
        )
    }
}
