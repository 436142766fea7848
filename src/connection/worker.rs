//! Connection worker: frames one client stream and forwards each frame

use std::sync::{Arc, Weak};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::handle::{Feed, SharedState, WorkerState};
use super::registry::Registry;
use crate::config::FramingLimits;
use crate::resp::FrameReader;
use crate::sink::FrameSink;
use crate::stream::{StreamReader, StreamWriter};
use crate::MirrorError;
use crate::types::ConnectionId;

/// Counters reported when a worker terminates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WorkerSummary {
    /// Frames handed to the sink successfully
    pub frames_forwarded: u64,
    /// Frames the sink rejected
    pub frames_dropped: u64,
    /// Bytes handed to the sink successfully
    pub bytes_forwarded: u64,
}

/// Read-forward loop for one connection.
pub(crate) struct ConnectionWorker {
    id: ConnectionId,
    generation: u64,
    frames: FrameReader<BufReader<StreamReader>>,
    sink: Arc<dyn FrameSink>,
    registry: Weak<Registry>,
    state: SharedState,
}

impl ConnectionWorker {
    pub(crate) fn new(
        id: ConnectionId,
        generation: u64,
        reader: StreamReader,
        limits: FramingLimits,
        sink: Arc<dyn FrameSink>,
        registry: Weak<Registry>,
        state: SharedState,
    ) -> Self {
        Self {
            id,
            generation,
            frames: FrameReader::with_limits(BufReader::new(reader), limits),
            sink,
            registry,
            state,
        }
    }

    /// Forward frames until the first read failure, then release the
    /// registry entry. Never resumes after returning.
    pub(crate) async fn run(mut self) -> WorkerSummary {
        self.state.advance(WorkerState::Running);
        debug!("Connection {} (generation {}) started", self.id, self.generation);

        let mut summary = WorkerSummary::default();
        let reason = loop {
            let frame = match self.frames.read_frame().await {
                Ok(frame) => frame,
                Err(e) => break e,
            };

            trace!("Connection {}: {:?} frame, {} bytes", self.id, frame.kind(), frame.len());
            match self.sink.send(self.id, &frame).await {
                Ok(()) => {
                    summary.frames_forwarded += 1;
                    summary.bytes_forwarded += frame.len() as u64;
                }
                Err(e) => {
                    // Best-effort mirroring: drop the frame, keep the connection.
                    summary.frames_dropped += 1;
                    warn!("Connection {}: dropped {}-byte frame: {}", self.id, frame.len(), e);
                }
            }
        };

        self.terminate(&reason, &summary);
        summary
    }

    fn terminate(self, reason: &MirrorError, summary: &WorkerSummary) {
        match reason {
            MirrorError::EndOfStream => debug!(
                "Connection {} closed after {} frames ({} bytes, {} dropped)",
                self.id, summary.frames_forwarded, summary.bytes_forwarded, summary.frames_dropped
            ),
            MirrorError::InvalidSyntax { .. } => warn!(
                "Connection {} terminated after {} frames: {}",
                self.id, summary.frames_forwarded, reason
            ),
            _ => debug!(
                "Connection {} stopped after {} frames: {}",
                self.id, summary.frames_forwarded, reason
            ),
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id, self.generation);
        }

        // Dropping the reader closes the buffer and rejects further writes.
        drop(self.frames);
        self.state.advance(WorkerState::Terminated);
    }
}

/// Move queued fragments into the stream buffer (decoupled dispatch).
///
/// Ends when the queue's sender side is gone or the buffer closes; dropping
/// the writer then closes the buffer so the worker drains and exits.
pub(crate) async fn feed(id: ConnectionId, mut queue: mpsc::Receiver<Feed>, writer: StreamWriter) {
    while let Some(item) = queue.recv().await {
        let fragment = match item {
            Feed::Data(fragment) => fragment,
            Feed::Finish => break,
        };
        if let Err(e) = writer.write(&fragment).await {
            debug!("Connection {}: feeder stopped: {}", id, e);
            return;
        }
    }
    trace!("Connection {}: feeder finished", id);
}
