//! Packet capture reading and decoding (cross-platform)
//!
//! Reads classic libpcap streams, from a file or a `tcpdump -w -` pipe, and
//! decodes each record down to the TCP payload for the dispatcher.

pub mod decode;
pub mod format;
pub mod reader;

pub use decode::{LinkType, decode_packet};
pub use reader::{PcapReader, PcapRecord};
