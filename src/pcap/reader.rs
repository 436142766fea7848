//! Streaming pcap reader
//!
//! Reads records incrementally from any [`AsyncRead`], so the same reader
//! serves capture files and a live `tcpdump -w -` pipe on stdin.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use respmirror::pcap::PcapReader;
//!
//! async fn count_records() -> respmirror::Result<u64> {
//!     let file = tokio::fs::File::open("capture.pcap").await?;
//!     let mut reader = PcapReader::new(tokio::io::BufReader::new(file)).await?;
//!
//!     let mut count = 0;
//!     while let Some(record) = reader.next_record().await? {
//!         println!("{} bytes at {:?}", record.data.len(), record.header.timestamp);
//!         count += 1;
//!     }
//!     Ok(count)
//! }
//! ```

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{trace, warn};

use super::decode::LinkType;
use super::format::{GLOBAL_HEADER_SIZE, GlobalHeader, RECORD_HEADER_SIZE, RecordHeader};
use crate::{MirrorError, Result};

/// One captured link-layer frame.
#[derive(Debug, Clone)]
pub struct PcapRecord {
    pub header: RecordHeader,
    pub data: Bytes,
}

/// Incremental reader over a classic pcap stream.
pub struct PcapReader<R> {
    reader: R,
    header: GlobalHeader,
    link_type: LinkType,
    records_read: u64,
}

impl<R> PcapReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Read and validate the global header.
    pub async fn new(mut reader: R) -> Result<Self> {
        let mut raw = [0u8; GLOBAL_HEADER_SIZE];
        let read = read_full(&mut reader, &mut raw).await?;
        if read < GLOBAL_HEADER_SIZE {
            return Err(MirrorError::unsupported_format(format!(
                "capture is {} bytes, shorter than the pcap header",
                read
            )));
        }

        let header = GlobalHeader::parse(&raw)?;
        let link_type = LinkType::from_code(header.link_type)?;
        Ok(Self { reader, header, link_type, records_read: 0 })
    }

    pub fn header(&self) -> &GlobalHeader {
        &self.header
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Next record, or `None` at end of capture.
    ///
    /// A record cut off by the end of input (a capture killed mid-write) is
    /// treated as end of capture.
    pub async fn next_record(&mut self) -> Result<Option<PcapRecord>> {
        let mut raw = [0u8; RECORD_HEADER_SIZE];
        match read_full(&mut self.reader, &mut raw).await? {
            0 => return Ok(None),
            RECORD_HEADER_SIZE => {}
            partial => {
                warn!("Capture ends inside a record header ({} bytes)", partial);
                return Ok(None);
            }
        }

        let header = RecordHeader::parse(&raw, &self.header)?;
        let mut data = BytesMut::zeroed(header.captured_len as usize);
        let read = read_full(&mut self.reader, &mut data[..]).await?;
        if read < data.len() {
            warn!(
                "Capture ends inside record {} ({} of {} bytes)",
                self.records_read + 1,
                read,
                data.len()
            );
            return Ok(None);
        }

        self.records_read += 1;
        trace!(
            "Record {}: {} bytes captured of {}",
            self.records_read, header.captured_len, header.original_len
        );
        Ok(Some(PcapRecord { header, data: data.freeze() }))
    }
}

/// Fill `buf` unless input ends first; returns the number of bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
