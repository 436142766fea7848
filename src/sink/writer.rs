//! Sink over any async writer

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::trace;

use super::FrameSink;
use crate::types::{ConnectionId, Frame};
use crate::{MirrorError, Result};

/// Sink that writes raw frame bytes to an [`AsyncWrite`].
///
/// The writer is locked for the duration of one frame, so concurrent workers
/// never interleave partial frames.
pub struct WriterSink<W> {
    writer: Mutex<W>,
    flush_each: bool,
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a writer. Frames are not flushed individually.
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer), flush_each: false }
    }

    /// Flush after every frame (for interactive outputs).
    pub fn flush_each_frame(mut self) -> Self {
        self.flush_each = true;
        self
    }

    /// Consume the sink, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl WriterSink<tokio::io::Stdout> {
    /// Sink writing frames to standard output.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout()).flush_each_frame()
    }
}

#[async_trait::async_trait]
impl<W> FrameSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, id: ConnectionId, frame: &Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| MirrorError::sink_failed_with_source(format!("write frame from {}", id), e))?;
        if self.flush_each {
            writer
                .flush()
                .await
                .map_err(|e| MirrorError::sink_failed_with_source("flush sink", e))?;
        }
        trace!("Forwarded {} bytes from {}", frame.len(), id);
        Ok(())
    }
}
