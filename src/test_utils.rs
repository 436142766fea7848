//! Test utilities for building captures and protocol payloads
//!
//! Captures are synthesized in memory so tests and benchmarks never depend on
//! recorded fixtures.

#![cfg(any(test, feature = "benchmark"))]

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

/// TCP flags byte for an ordinary data segment.
pub const PSH_ACK: u8 = 0x18;
/// TCP flags byte for an orderly close carrying the last data.
pub const FIN_ACK: u8 = 0x11;
/// TCP flags byte for an abortive close.
pub const RST: u8 = 0x04;

const LINKTYPE_ETHERNET: u32 = 1;
const CAPTURE_EPOCH: u32 = 1_700_000_000;

/// Encode a command as an array of bulk strings.
pub fn resp_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// TCP segment with a 20-byte header.
pub fn tcp_segment(source_port: u16, destination_port: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut segment = Vec::with_capacity(20 + payload.len());
    segment.extend_from_slice(&source_port.to_be_bytes());
    segment.extend_from_slice(&destination_port.to_be_bytes());
    segment.extend_from_slice(&1u32.to_be_bytes()); // sequence
    segment.extend_from_slice(&1u32.to_be_bytes()); // acknowledgement
    segment.push(5 << 4);
    segment.push(flags);
    segment.extend_from_slice(&65535u16.to_be_bytes());
    segment.extend_from_slice(&[0, 0, 0, 0]); // checksum, urgent pointer
    segment.extend_from_slice(payload);
    segment
}

/// IPv4 datagram carrying one TCP segment. Both addresses must be IPv4.
pub fn ipv4_tcp(source: SocketAddr, destination: SocketAddr, flags: u8, payload: &[u8]) -> Vec<u8> {
    let (IpAddr::V4(src), IpAddr::V4(dst)) = (source.ip(), destination.ip()) else {
        panic!("ipv4_tcp needs IPv4 addresses, got {} -> {}", source, destination);
    };
    let segment = tcp_segment(source.port(), destination.port(), flags, payload);
    let total_len = (20 + segment.len()) as u16;

    let mut datagram = vec![0x45, 0];
    datagram.extend_from_slice(&total_len.to_be_bytes());
    datagram.extend_from_slice(&[0, 0, 0x40, 0]); // id, don't fragment
    datagram.extend_from_slice(&[64, 6, 0, 0]); // ttl, protocol, checksum
    datagram.extend_from_slice(&src.octets());
    datagram.extend_from_slice(&dst.octets());
    datagram.extend(segment);
    datagram
}

/// IPv6 packet carrying one TCP segment. Both addresses must be IPv6.
pub fn ipv6_tcp(source: SocketAddr, destination: SocketAddr, flags: u8, payload: &[u8]) -> Vec<u8> {
    let (IpAddr::V6(src), IpAddr::V6(dst)) = (source.ip(), destination.ip()) else {
        panic!("ipv6_tcp needs IPv6 addresses, got {} -> {}", source, destination);
    };
    let segment = tcp_segment(source.port(), destination.port(), flags, payload);

    let mut packet = vec![0x60, 0, 0, 0];
    packet.extend_from_slice(&(segment.len() as u16).to_be_bytes());
    packet.extend_from_slice(&[6, 64]); // next header, hop limit
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&dst.octets());
    packet.extend(segment);
    packet
}

/// Ethernet II frame around an IPv4 or IPv6 TCP packet.
pub fn ethernet_tcp(source: SocketAddr, destination: SocketAddr, flags: u8, payload: &[u8]) -> Vec<u8> {
    let (ethertype, ip) = match source.ip() {
        IpAddr::V4(_) => (0x0800u16, ipv4_tcp(source, destination, flags, payload)),
        IpAddr::V6(_) => (0x86ddu16, ipv6_tcp(source, destination, flags, payload)),
    };
    let mut frame = vec![0x02, 0, 0, 0, 0, 0x01, 0x02, 0, 0, 0, 0, 0x02];
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame.extend(ip);
    frame
}

/// Builder for little-endian, microsecond-resolution pcap captures.
#[derive(Debug, Clone)]
pub struct PcapBuilder {
    link_type: u32,
    records: Vec<Vec<u8>>,
}

impl PcapBuilder {
    /// Capture with Ethernet framing.
    pub fn ethernet() -> Self {
        Self::with_link_type(LINKTYPE_ETHERNET)
    }

    pub fn with_link_type(link_type: u32) -> Self {
        Self { link_type, records: Vec::new() }
    }

    /// Append an arbitrary link-layer frame.
    pub fn raw_record(mut self, frame: Vec<u8>) -> Self {
        self.records.push(frame);
        self
    }

    /// Append a data segment from `source` to `destination`.
    pub fn tcp(self, source: SocketAddr, destination: SocketAddr, payload: &[u8]) -> Self {
        self.tcp_with_flags(source, destination, PSH_ACK, payload)
    }

    pub fn tcp_with_flags(
        self,
        source: SocketAddr,
        destination: SocketAddr,
        flags: u8,
        payload: &[u8],
    ) -> Self {
        self.raw_record(ethernet_tcp(source, destination, flags, payload))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize the capture.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes()); // thiszone
        out.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
        out.extend_from_slice(&65535u32.to_le_bytes());
        out.extend_from_slice(&self.link_type.to_le_bytes());

        for (index, record) in self.records.iter().enumerate() {
            let len = record.len() as u32;
            out.extend_from_slice(&CAPTURE_EPOCH.to_le_bytes());
            out.extend_from_slice(&((index as u32) * 1000).to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(record);
        }
        out
    }

    /// Write the capture to a fresh file under the system temp directory.
    pub fn write_temp(&self) -> std::io::Result<PathBuf> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let path = std::env::temp_dir().join(format!(
            "respmirror-{}-{}.pcap",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&path, self.build())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resp_command_encodes_bulk_array() {
        assert_eq!(resp_command(&[b"GET", b"foo"]), b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n".to_vec());
        assert_eq!(resp_command(&[]), b"*0\r\n".to_vec());
    }

    #[test]
    fn ipv4_datagram_lengths_are_consistent() {
        let datagram = ipv4_tcp(
            "10.0.0.5:51221".parse().unwrap(),
            "10.0.0.1:6379".parse().unwrap(),
            PSH_ACK,
            b"+OK\r\n",
        );
        assert_eq!(datagram.len(), 20 + 20 + 5);
        assert_eq!(u16::from_be_bytes([datagram[2], datagram[3]]) as usize, datagram.len());
    }

    #[test]
    fn capture_layout() {
        let builder = PcapBuilder::ethernet().raw_record(vec![1, 2, 3]);
        let capture = builder.build();
        assert_eq!(builder.len(), 1);
        assert_eq!(capture.len(), 24 + 16 + 3);
        assert_eq!(&capture[..4], &[0xd4, 0xc3, 0xb2, 0xa1]);
    }
}
