//! Frame sinks
//!
//! A sink receives every forwarded frame exactly as it was captured, with no
//! added framing or metadata. Sinks are shared by all connection workers and
//! write each frame as a unit, so frames from different connections never
//! interleave on the output.
//!
//! - [`WriterSink`] wraps any [`tokio::io::AsyncWrite`]; [`WriterSink::stdout`]
//!   targets standard output
//! - [`TcpSink`] dials a remote server and drains its responses
//! - [`ChannelSink`] hands frames to an in-process receiver

mod tcp;
mod writer;

pub use tcp::{CONNECT_TIMEOUT, TcpSink};
pub use writer::WriterSink;

use tokio::sync::mpsc;

use crate::types::{ConnectionId, Frame};
use crate::{MirrorError, Result};

/// Destination for forwarded frames.
#[async_trait::async_trait]
pub trait FrameSink: Send + Sync + 'static {
    /// Forward one frame captured on connection `id`.
    async fn send(&self, id: ConnectionId, frame: &Frame) -> Result<()>;
}

/// Sink that forwards frames over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(ConnectionId, Frame)>,
}

impl ChannelSink {
    /// Create a sink and the receiver that observes its frames.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(ConnectionId, Frame)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl FrameSink for ChannelSink {
    async fn send(&self, id: ConnectionId, frame: &Frame) -> Result<()> {
        self.tx
            .send((id, frame.clone()))
            .map_err(|_| MirrorError::sink_failed("frame receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn channel_sink_delivers_frames_with_their_connection() {
        let (sink, mut rx) = ChannelSink::new();
        let id = ConnectionId::new("10.0.0.5".parse().unwrap(), 51221);
        let frame = Frame::new(Bytes::from_static(b"+PING\r\n"));

        sink.send(id, &frame).await.expect("receiver alive");
        let (got_id, got_frame) = rx.recv().await.expect("frame delivered");
        assert_eq!(got_id, id);
        assert_eq!(got_frame, frame);
    }

    #[tokio::test]
    async fn channel_sink_fails_once_receiver_is_gone() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let id = ConnectionId::new("10.0.0.5".parse().unwrap(), 51221);
        let frame = Frame::new(Bytes::from_static(b":1\r\n"));
        assert!(matches!(sink.send(id, &frame).await, Err(MirrorError::Sink { .. })));
    }
}
