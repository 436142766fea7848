//! Packet source fed through an in-process channel

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::Result;
use crate::source::PacketSource;
use crate::types::CapturedPacket;

/// Packets pushed by an embedding application's own capture.
///
/// The source ends once every sender is dropped and the channel is drained.
pub struct ChannelSource {
    packets: ReceiverStream<CapturedPacket>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it.
    pub fn new(capacity: usize) -> (mpsc::Sender<CapturedPacket>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::from_receiver(rx))
    }

    pub fn from_receiver(rx: mpsc::Receiver<CapturedPacket>) -> Self {
        Self { packets: ReceiverStream::new(rx) }
    }
}

#[async_trait::async_trait]
impl PacketSource for ChannelSource {
    async fn next_packet(&mut self) -> Result<Option<CapturedPacket>> {
        Ok(self.packets.next().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yields_packets_until_senders_drop() {
        let (tx, mut source) = ChannelSource::new(4);
        let packet = CapturedPacket::tcp(
            "10.0.0.5:51221".parse().unwrap(),
            "10.0.0.1:6379".parse().unwrap(),
            &b"+PING\r\n"[..],
        );
        tx.send(packet.clone()).await.unwrap();
        drop(tx);

        assert_eq!(source.next_packet().await.unwrap(), Some(packet));
        assert_eq!(source.next_packet().await.unwrap(), None);
    }
}
