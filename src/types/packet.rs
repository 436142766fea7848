//! Captured packet records and connection identity

use bytes::Bytes;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Identity of one client flow: the client's address and port.
///
/// The destination is fixed (one monitored server) and is not part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(SocketAddr);

impl ConnectionId {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(addr, port))
    }

    pub fn addr(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

impl From<SocketAddr> for ConnectionId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// TCP control flags relevant to flow lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub fin: bool,
    pub rst: bool,
}

impl TcpFlags {
    pub(crate) const FIN: u8 = 0x01;
    pub(crate) const RST: u8 = 0x04;

    /// Build from the raw TCP flags byte.
    pub fn from_bits(bits: u8) -> Self {
        Self { fin: bits & Self::FIN != 0, rst: bits & Self::RST != 0 }
    }

    /// Whether the packet ends the flow.
    pub fn is_teardown(&self) -> bool {
        self.fin || self.rst
    }
}

/// Decoded packet record handed to the dispatcher by a packet source.
///
/// Every field is optional because decoding may stop at any layer; the
/// dispatcher skips records it cannot attribute to a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedPacket {
    /// Network-layer source address
    pub source: Option<IpAddr>,
    /// Transport-layer source port
    pub source_port: Option<u16>,
    /// Network-layer destination address
    pub destination: Option<IpAddr>,
    /// Transport-layer destination port
    pub destination_port: Option<u16>,
    /// Application-layer payload
    pub payload: Option<Bytes>,
    /// TCP control flags
    pub flags: TcpFlags,
    /// Description of the layer that failed to decode, if any
    pub decode_error: Option<String>,
}

impl CapturedPacket {
    /// Build a packet carrying `payload` from `source` to `destination`.
    pub fn tcp(source: SocketAddr, destination: SocketAddr, payload: impl Into<Bytes>) -> Self {
        Self {
            source: Some(source.ip()),
            source_port: Some(source.port()),
            destination: Some(destination.ip()),
            destination_port: Some(destination.port()),
            payload: Some(payload.into()),
            flags: TcpFlags::default(),
            decode_error: None,
        }
    }

    /// Set TCP flags (builder style).
    pub fn with_flags(mut self, flags: TcpFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Connection identity derived from the source address and port.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        match (self.source, self.source_port) {
            (Some(addr), Some(port)) => Some(ConnectionId::new(addr, port)),
            _ => None,
        }
    }

    /// Destination socket address, when both parts decoded.
    pub fn destination_addr(&self) -> Option<SocketAddr> {
        match (self.destination, self.destination_port) {
            (Some(addr), Some(port)) => Some(SocketAddr::new(addr, port)),
            _ => None,
        }
    }

    /// Payload bytes, if present and non-empty.
    pub fn application_payload(&self) -> Option<&Bytes> {
        self.payload.as_ref().filter(|payload| !payload.is_empty())
    }
}
