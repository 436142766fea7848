//! Link, network and transport decoding
//!
//! Turns one captured link-layer frame into a [`CapturedPacket`]. Decoding
//! stops at the first layer it cannot parse; everything decoded up to that
//! point is kept and the failure is recorded in `decode_error`. Non-TCP
//! traffic decodes without error but carries no ports or payload.

use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::types::{CapturedPacket, TcpFlags};
use crate::{MirrorError, Result};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_VLAN: [u16; 3] = [0x8100, 0x88a8, 0x9100];

const IPPROTO_TCP: u8 = 6;
const IPV6_HOP_BY_HOP: u8 = 0;
const IPV6_ROUTING: u8 = 43;
const IPV6_FRAGMENT: u8 = 44;
const IPV6_DESTINATION: u8 = 60;

/// Link-layer header types this decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// BSD loopback: 4-byte address family in host byte order
    Null,
    /// Ethernet II, with any number of 802.1Q/802.1ad tags
    Ethernet,
    /// Bare IPv4 or IPv6
    Raw,
    /// Linux cooked capture v1 (`tcpdump -i any`)
    LinuxSll,
    /// Linux cooked capture v2
    LinuxSll2,
    Ipv4,
    Ipv6,
}

impl LinkType {
    /// Map a pcap `LINKTYPE_*` value.
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(LinkType::Null),
            1 => Ok(LinkType::Ethernet),
            12 | 14 | 101 => Ok(LinkType::Raw),
            113 => Ok(LinkType::LinuxSll),
            276 => Ok(LinkType::LinuxSll2),
            228 => Ok(LinkType::Ipv4),
            229 => Ok(LinkType::Ipv6),
            other => Err(MirrorError::unsupported_format(format!("link type {}", other))),
        }
    }
}

/// Network protocol carried by the link layer.
enum Network {
    Ipv4,
    Ipv6,
    /// Raw IP; decided by the version nibble
    Sniff,
    Other,
}

/// Decode one link-layer frame.
pub fn decode_packet(link: LinkType, frame: &Bytes) -> CapturedPacket {
    let mut packet = CapturedPacket::default();
    if let Err(e) = decode_into(link, frame, &mut packet) {
        packet.decode_error = Some(e.to_string());
    }
    packet
}

fn decode_into(link: LinkType, frame: &Bytes, packet: &mut CapturedPacket) -> Result<()> {
    let (network, offset) = match link {
        LinkType::Null => null_header(frame)?,
        LinkType::Ethernet => ethernet_header(frame)?,
        LinkType::Raw => (Network::Sniff, 0),
        LinkType::LinuxSll => {
            require(frame, 16, "linux-sll")?;
            (network_for_ethertype(be16(frame, 14)), 16)
        }
        LinkType::LinuxSll2 => {
            require(frame, 20, "linux-sll2")?;
            (network_for_ethertype(be16(frame, 0)), 20)
        }
        LinkType::Ipv4 => (Network::Ipv4, 0),
        LinkType::Ipv6 => (Network::Ipv6, 0),
    };

    let ip = frame.slice(offset..);
    let network = match network {
        Network::Sniff => match ip.first().map(|b| b >> 4) {
            Some(4) => Network::Ipv4,
            Some(6) => Network::Ipv6,
            _ => return Err(MirrorError::decode_error("ip", "unknown IP version")),
        },
        other => other,
    };

    let segment = match network {
        Network::Ipv4 => ipv4(&ip, packet)?,
        Network::Ipv6 => ipv6(&ip, packet)?,
        Network::Sniff | Network::Other => return Ok(()),
    };

    match segment {
        Some(segment) => tcp(&segment, packet),
        None => Ok(()),
    }
}

fn null_header(frame: &Bytes) -> Result<(Network, usize)> {
    require(frame, 4, "loopback")?;
    let mut family = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    if family > 0xffff {
        family = family.swap_bytes();
    }
    let network = match family {
        2 => Network::Ipv4,
        // AF_INET6 differs between BSDs
        10 | 24 | 28 | 30 => Network::Ipv6,
        _ => Network::Other,
    };
    Ok((network, 4))
}

fn ethernet_header(frame: &Bytes) -> Result<(Network, usize)> {
    require(frame, 14, "ethernet")?;
    let mut offset = 12;
    let mut ethertype = be16(frame, offset);
    while ETHERTYPE_VLAN.contains(&ethertype) {
        offset += 4;
        require(frame, offset + 2, "vlan")?;
        ethertype = be16(frame, offset);
    }
    Ok((network_for_ethertype(ethertype), offset + 2))
}

fn network_for_ethertype(ethertype: u16) -> Network {
    match ethertype {
        ETHERTYPE_IPV4 => Network::Ipv4,
        ETHERTYPE_IPV6 => Network::Ipv6,
        _ => Network::Other,
    }
}

/// Returns the TCP segment, if the datagram carries one.
fn ipv4(ip: &Bytes, packet: &mut CapturedPacket) -> Result<Option<Bytes>> {
    require(ip, 20, "ipv4")?;
    let header_len = ((ip[0] & 0x0f) as usize) * 4;
    if header_len < 20 || ip.len() < header_len {
        return Err(MirrorError::decode_error("ipv4", format!("bad header length {}", header_len)));
    }

    packet.source = Some(IpAddr::V4(Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15])));
    packet.destination = Some(IpAddr::V4(Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19])));

    let total_len = be16(ip, 2) as usize;
    if total_len < header_len {
        return Err(MirrorError::decode_error("ipv4", format!("bad total length {}", total_len)));
    }
    if total_len > ip.len() {
        return Err(MirrorError::decode_error("ipv4", "datagram truncated by capture"));
    }
    if be16(ip, 6) & 0x1fff != 0 {
        return Err(MirrorError::decode_error("ipv4", "non-initial fragment"));
    }

    if ip[9] != IPPROTO_TCP {
        return Ok(None);
    }
    // Ethernet padding after total_len is dropped
    Ok(Some(ip.slice(header_len..total_len)))
}

fn ipv6(ip: &Bytes, packet: &mut CapturedPacket) -> Result<Option<Bytes>> {
    require(ip, 40, "ipv6")?;
    packet.source = Some(IpAddr::V6(ipv6_addr(&ip[8..24])));
    packet.destination = Some(IpAddr::V6(ipv6_addr(&ip[24..40])));

    let end = 40 + be16(ip, 4) as usize;
    if end > ip.len() {
        return Err(MirrorError::decode_error("ipv6", "datagram truncated by capture"));
    }

    let mut next = ip[6];
    let mut offset = 40;
    loop {
        match next {
            IPPROTO_TCP => return Ok(Some(ip.slice(offset..end))),
            IPV6_HOP_BY_HOP | IPV6_ROUTING | IPV6_DESTINATION => {
                require(ip, offset + 2, "ipv6 extension")?;
                next = ip[offset];
                offset += (ip[offset + 1] as usize + 1) * 8;
            }
            IPV6_FRAGMENT => {
                require(ip, offset + 8, "ipv6 fragment")?;
                if be16(ip, offset + 2) & 0xfff8 != 0 {
                    return Err(MirrorError::decode_error("ipv6", "non-initial fragment"));
                }
                next = ip[offset];
                offset += 8;
            }
            _ => return Ok(None),
        }
        if offset > end {
            return Err(MirrorError::decode_error("ipv6", "extension headers overrun payload"));
        }
    }
}

fn tcp(segment: &Bytes, packet: &mut CapturedPacket) -> Result<()> {
    require(segment, 20, "tcp")?;
    packet.source_port = Some(be16(segment, 0));
    packet.destination_port = Some(be16(segment, 2));

    let data_offset = ((segment[12] >> 4) as usize) * 4;
    if data_offset < 20 || data_offset > segment.len() {
        return Err(MirrorError::decode_error("tcp", format!("bad data offset {}", data_offset)));
    }

    packet.flags = TcpFlags::from_bits(segment[13]);
    packet.payload = Some(segment.slice(data_offset..));
    Ok(())
}

fn ipv6_addr(bytes: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(bytes);
    Ipv6Addr::from(octets)
}

fn be16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn require(bytes: &[u8], len: usize, layer: &'static str) -> Result<()> {
    if bytes.len() < len {
        return Err(MirrorError::decode_error(
            layer,
            format!("need {} bytes, have {}", len, bytes.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ethernet_tcp, ipv4_tcp, ipv6_tcp};
    use std::net::SocketAddr;

    fn client() -> SocketAddr {
        "10.0.0.5:51221".parse().unwrap()
    }

    fn server() -> SocketAddr {
        "10.0.0.1:6379".parse().unwrap()
    }

    #[test]
    fn ethernet_tcp_payload_is_extracted() {
        let frame = Bytes::from(ethernet_tcp(client(), server(), 0x18, b"*1\r\n$4\r\nPING\r\n"));
        let packet = decode_packet(LinkType::Ethernet, &frame);

        assert_eq!(packet.decode_error, None);
        assert_eq!(packet.connection_id().unwrap().to_string(), "10.0.0.5:51221");
        assert_eq!(packet.destination_addr(), Some(server()));
        assert_eq!(packet.payload.as_deref(), Some(&b"*1\r\n$4\r\nPING\r\n"[..]));
        assert!(!packet.flags.is_teardown());
    }

    #[test]
    fn vlan_tags_are_skipped() {
        let plain = ethernet_tcp(client(), server(), 0x18, b"+OK\r\n");
        let mut tagged = plain[..12].to_vec();
        tagged.extend_from_slice(&[0x81, 0x00, 0x00, 0x64]);
        tagged.extend_from_slice(&plain[12..]);

        let packet = decode_packet(LinkType::Ethernet, &Bytes::from(tagged));
        assert_eq!(packet.decode_error, None);
        assert_eq!(packet.payload.as_deref(), Some(&b"+OK\r\n"[..]));
    }

    #[test]
    fn ethernet_padding_is_not_payload() {
        let mut frame = ethernet_tcp(client(), server(), 0x10, b"");
        frame.extend_from_slice(&[0u8; 6]);

        let packet = decode_packet(LinkType::Ethernet, &Bytes::from(frame));
        assert_eq!(packet.decode_error, None);
        assert!(packet.application_payload().is_none());
    }

    #[test]
    fn raw_ipv6_with_fin_flag() {
        let client: SocketAddr = "[2001:db8::5]:40000".parse().unwrap();
        let server: SocketAddr = "[2001:db8::1]:6379".parse().unwrap();
        let frame = Bytes::from(ipv6_tcp(client, server, 0x11, b":1\r\n"));

        let packet = decode_packet(LinkType::Raw, &frame);
        assert_eq!(packet.decode_error, None);
        assert_eq!(packet.connection_id().unwrap().to_string(), "[2001:db8::5]:40000");
        assert!(packet.flags.fin);
        assert_eq!(packet.payload.as_deref(), Some(&b":1\r\n"[..]));
    }

    #[test]
    fn loopback_header_in_either_byte_order() {
        for family in [2u32.to_le_bytes(), 2u32.to_be_bytes()] {
            let mut frame = family.to_vec();
            frame.extend(ipv4_tcp(client(), server(), 0x18, b"+PONG\r\n"));
            let packet = decode_packet(LinkType::Null, &Bytes::from(frame));
            assert_eq!(packet.decode_error, None);
            assert_eq!(packet.payload.as_deref(), Some(&b"+PONG\r\n"[..]));
        }
    }

    #[test]
    fn non_tcp_traffic_has_no_ports() {
        let mut datagram = ipv4_tcp(client(), server(), 0x18, b"data");
        datagram[9] = 17; // UDP
        let packet = decode_packet(LinkType::Ipv4, &Bytes::from(datagram));
        assert_eq!(packet.decode_error, None);
        assert!(packet.source.is_some());
        assert_eq!(packet.connection_id(), None);
    }

    #[test]
    fn truncated_tcp_header_records_the_failing_layer() {
        let datagram = ipv4_tcp(client(), server(), 0x18, b"");
        // Cut into the TCP header but keep the IPv4 total length consistent
        let mut cut = datagram[..30].to_vec();
        cut[2..4].copy_from_slice(&30u16.to_be_bytes());

        let packet = decode_packet(LinkType::Raw, &Bytes::from(cut));
        assert!(packet.decode_error.as_deref().is_some_and(|e| e.contains("tcp")));
        assert!(packet.source.is_some());
        assert_eq!(packet.connection_id(), None);
    }

    #[test]
    fn snaplen_truncation_is_a_decode_error() {
        let datagram = ipv4_tcp(client(), server(), 0x18, b"*1\r\n$4\r\nPING\r\n");
        let cut = Bytes::copy_from_slice(&datagram[..datagram.len() - 4]);
        let packet = decode_packet(LinkType::Raw, &cut);
        assert!(packet.decode_error.is_some());
    }

    #[test]
    fn link_type_codes() {
        assert_eq!(LinkType::from_code(1).unwrap(), LinkType::Ethernet);
        assert_eq!(LinkType::from_code(113).unwrap(), LinkType::LinuxSll);
        assert!(LinkType::from_code(147).is_err());
    }
}
