//! libpcap file format structures and parsing
//!
//! ## File Structure
//!
//! 1. **Global Header** (24 bytes): magic, version, timezone, accuracy,
//!    snapshot length, link type
//! 2. **Records**: a 16-byte record header (timestamp seconds, sub-second
//!    timestamp, captured length, original length) followed by the captured
//!    bytes
//!
//! The magic number fixes both the byte order of every header field and the
//! timestamp resolution (microseconds or nanoseconds). pcapng files are
//! recognized and rejected.

use std::time::Duration;
use tracing::debug;

use crate::{MirrorError, Result};

pub const GLOBAL_HEADER_SIZE: usize = 24;
pub const RECORD_HEADER_SIZE: usize = 16;

const MAGIC_MICROS: u32 = 0xa1b2_c3d4;
const MAGIC_NANOS: u32 = 0xa1b2_3c4d;
const MAGIC_PCAPNG: u32 = 0x0a0d_0d0a;

/// Largest record accepted regardless of the advertised snapshot length.
pub const MAX_RECORD_SIZE: u32 = 16 * 1024 * 1024;

/// Byte order of header fields, as announced by the magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    fn u16(self, bytes: &[u8], offset: usize) -> u16 {
        let raw = [bytes[offset], bytes[offset + 1]];
        match self {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        }
    }

    fn u32(self, bytes: &[u8], offset: usize) -> u32 {
        let raw = [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]];
        match self {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        }
    }
}

/// Timestamp resolution of record headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampResolution {
    Micros,
    Nanos,
}

/// pcap global header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeader {
    pub endian: Endian,
    pub resolution: TimestampResolution,
    pub version_major: u16,
    pub version_minor: u16,
    pub snaplen: u32,
    pub link_type: u32,
}

impl GlobalHeader {
    /// Parse the 24-byte global header.
    pub fn parse(bytes: &[u8; GLOBAL_HEADER_SIZE]) -> Result<Self> {
        let le = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let be = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

        let (endian, resolution) = match (le, be) {
            (MAGIC_MICROS, _) => (Endian::Little, TimestampResolution::Micros),
            (_, MAGIC_MICROS) => (Endian::Big, TimestampResolution::Micros),
            (MAGIC_NANOS, _) => (Endian::Little, TimestampResolution::Nanos),
            (_, MAGIC_NANOS) => (Endian::Big, TimestampResolution::Nanos),
            (MAGIC_PCAPNG, _) => {
                return Err(MirrorError::unsupported_format(
                    "pcapng capture; convert with `editcap -F pcap`",
                ));
            }
            _ => {
                return Err(MirrorError::unsupported_format(format!(
                    "unknown capture magic {:#010x}",
                    le
                )));
            }
        };

        let header = Self {
            endian,
            resolution,
            version_major: endian.u16(bytes, 4),
            version_minor: endian.u16(bytes, 6),
            snaplen: endian.u32(bytes, 16),
            // Upper bits carry FCS information
            link_type: endian.u32(bytes, 20) & 0x0fff_ffff,
        };

        if header.version_major != 2 {
            return Err(MirrorError::unsupported_format(format!(
                "pcap version {}.{}",
                header.version_major, header.version_minor
            )));
        }

        debug!(
            "Parsed pcap header: {:?} endian, {:?} timestamps, snaplen={}, link_type={}",
            header.endian, header.resolution, header.snaplen, header.link_type
        );
        Ok(header)
    }
}

/// pcap record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Capture time since the Unix epoch
    pub timestamp: Duration,
    /// Bytes present in the file
    pub captured_len: u32,
    /// Bytes on the wire
    pub original_len: u32,
}

impl RecordHeader {
    /// Parse a 16-byte record header using the file's byte order and resolution.
    pub fn parse(bytes: &[u8; RECORD_HEADER_SIZE], global: &GlobalHeader) -> Result<Self> {
        let seconds = global.endian.u32(bytes, 0);
        let fraction = global.endian.u32(bytes, 4);
        let captured_len = global.endian.u32(bytes, 8);
        let original_len = global.endian.u32(bytes, 12);

        let limit = global.snaplen.max(65_535).min(MAX_RECORD_SIZE);
        if captured_len > limit {
            return Err(MirrorError::decode_error(
                "pcap",
                format!("record length {} exceeds limit {}", captured_len, limit),
            ));
        }

        let subsec = match global.resolution {
            TimestampResolution::Micros => Duration::from_micros(fraction as u64),
            TimestampResolution::Nanos => Duration::from_nanos(fraction as u64),
        };

        Ok(Self {
            timestamp: Duration::from_secs(seconds as u64) + subsec,
            captured_len,
            original_len,
        })
    }

    /// Whether the capture cut the packet short.
    pub fn is_truncated(&self) -> bool {
        self.captured_len < self.original_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_bytes(magic_le: [u8; 4], link_type: u32) -> [u8; GLOBAL_HEADER_SIZE] {
        let mut bytes = [0u8; GLOBAL_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&magic_le);
        bytes[4..6].copy_from_slice(&2u16.to_le_bytes());
        bytes[6..8].copy_from_slice(&4u16.to_le_bytes());
        bytes[16..20].copy_from_slice(&65535u32.to_le_bytes());
        bytes[20..24].copy_from_slice(&link_type.to_le_bytes());
        bytes
    }

    #[test]
    fn little_endian_microsecond_header_parses() {
        let header = GlobalHeader::parse(&global_bytes(MAGIC_MICROS.to_le_bytes(), 1)).unwrap();
        assert_eq!(header.endian, Endian::Little);
        assert_eq!(header.resolution, TimestampResolution::Micros);
        assert_eq!(header.link_type, 1);
        assert_eq!(header.snaplen, 65535);
    }

    #[test]
    fn big_endian_nanosecond_header_parses() {
        let mut bytes = [0u8; GLOBAL_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&MAGIC_NANOS.to_be_bytes());
        bytes[4..6].copy_from_slice(&2u16.to_be_bytes());
        bytes[6..8].copy_from_slice(&4u16.to_be_bytes());
        bytes[16..20].copy_from_slice(&262_144u32.to_be_bytes());
        bytes[20..24].copy_from_slice(&101u32.to_be_bytes());

        let header = GlobalHeader::parse(&bytes).unwrap();
        assert_eq!(header.endian, Endian::Big);
        assert_eq!(header.resolution, TimestampResolution::Nanos);
        assert_eq!(header.link_type, 101);
    }

    #[test]
    fn pcapng_and_garbage_are_unsupported() {
        let pcapng = global_bytes(MAGIC_PCAPNG.to_le_bytes(), 1);
        assert!(matches!(GlobalHeader::parse(&pcapng), Err(MirrorError::UnsupportedFormat { .. })));

        let garbage = global_bytes(*b"GET ", 1);
        assert!(matches!(GlobalHeader::parse(&garbage), Err(MirrorError::UnsupportedFormat { .. })));
    }

    #[test]
    fn record_header_applies_resolution_and_limits() {
        let global = GlobalHeader::parse(&global_bytes(MAGIC_MICROS.to_le_bytes(), 1)).unwrap();

        let mut bytes = [0u8; RECORD_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&10u32.to_le_bytes());
        bytes[4..8].copy_from_slice(&500u32.to_le_bytes());
        bytes[8..12].copy_from_slice(&60u32.to_le_bytes());
        bytes[12..16].copy_from_slice(&1514u32.to_le_bytes());
        let record = RecordHeader::parse(&bytes, &global).unwrap();
        assert_eq!(record.timestamp, Duration::from_secs(10) + Duration::from_micros(500));
        assert!(record.is_truncated());

        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(RecordHeader::parse(&bytes, &global), Err(MirrorError::Decode { .. })));
    }
}
