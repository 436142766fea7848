//! Packet source trait

use crate::Result;
use crate::types::CapturedPacket;

/// Source of decoded packet records.
///
/// Sources abstract over where packets come from (a capture file, a capture
/// pipe, an in-process channel) and are consumed by exactly one dispatcher.
#[async_trait::async_trait]
pub trait PacketSource: Send + 'static {
    /// Get the next packet record
    ///
    /// Returns:
    /// - `Ok(Some(packet))` - Next record, possibly with a decode error set
    /// - `Ok(None)` - Source exhausted (normal termination)
    /// - `Err(e)` - The source itself failed and cannot continue
    async fn next_packet(&mut self) -> Result<Option<CapturedPacket>>;
}

#[async_trait::async_trait]
impl<S: PacketSource + ?Sized> PacketSource for Box<S> {
    async fn next_packet(&mut self) -> Result<Option<CapturedPacket>> {
        (**self).next_packet().await
    }
}
