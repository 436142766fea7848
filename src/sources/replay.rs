//! Packet source over pcap captures

use std::path::Path;
use tokio::io::{AsyncRead, BufReader};
use tracing::{debug, info, trace};

use crate::pcap::{PcapReader, decode_packet};
use crate::source::PacketSource;
use crate::types::CapturedPacket;
use crate::{MirrorError, Result};

type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;

/// Reads a pcap capture from a file, or from stdin when the path is `-`.
///
/// Records are delivered as fast as they can be read; capture timestamps are
/// not replayed.
pub struct PcapSource {
    reader: PcapReader<BoxedRead>,
    packets: u64,
    decode_failures: u64,
}

impl PcapSource {
    /// Open a capture file, or stdin for `-`.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path == Path::new("-") {
            info!("Reading capture from stdin");
            return Self::from_reader(BufReader::new(tokio::io::stdin())).await;
        }

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| MirrorError::capture_error(path, e))?;
        let source = Self::from_reader(BufReader::new(file)).await?;
        info!("Opened capture {} (link type {:?})", path.display(), source.reader.link_type());
        Ok(source)
    }

    /// Read a capture from any byte stream.
    pub async fn from_reader<R>(reader: R) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let boxed: BoxedRead = Box::new(reader);
        let reader = PcapReader::new(boxed).await?;
        Ok(Self { reader, packets: 0, decode_failures: 0 })
    }

    /// Records read so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Records that failed to decode.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }
}

#[async_trait::async_trait]
impl PacketSource for PcapSource {
    async fn next_packet(&mut self) -> Result<Option<CapturedPacket>> {
        let record = match self.reader.next_record().await? {
            Some(record) => record,
            None => {
                debug!("End of capture after {} records", self.packets);
                return Ok(None);
            }
        };

        self.packets += 1;
        let packet = decode_packet(self.reader.link_type(), &record.data);
        if let Some(error) = &packet.decode_error {
            self.decode_failures += 1;
            debug!("Record {}: {}", self.packets, error);
        } else if record.header.is_truncated() {
            trace!(
                "Record {} truncated to {} of {} bytes",
                self.packets, record.header.captured_len, record.header.original_len
            );
        }

        Ok(Some(packet))
    }
}
