//! Handle to a live connection worker

use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::stream::{StreamCloser, StreamWriter};
use crate::types::ConnectionId;
use crate::{MirrorError, Result};

/// Lifecycle of a connection worker: `Created → Running → Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    Terminated,
}

/// Shared, atomically updated worker state.
#[derive(Debug, Clone)]
pub(crate) struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Created as u8)))
    }

    pub(crate) fn get(&self) -> WorkerState {
        match self.0.load(Ordering::Acquire) {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            _ => WorkerState::Terminated,
        }
    }

    /// Move forward only; `Terminated` is final.
    pub(crate) fn advance(&self, next: WorkerState) {
        self.0.fetch_max(next as u8, Ordering::AcqRel);
    }
}

/// Item on a decoupled connection's queue.
#[derive(Debug)]
pub(crate) enum Feed {
    Data(Bytes),
    /// No more input; close the buffer once everything before it is written
    Finish,
}

/// Where the dispatcher's payload goes.
pub(crate) enum Input {
    /// Directly into the stream buffer
    Inline(StreamWriter),
    /// Into a bounded queue drained by a feeder task
    Queued(mpsc::Sender<Feed>),
}

struct Inner {
    id: ConnectionId,
    generation: u64,
    input: Input,
    closer: StreamCloser,
    state: SharedState,
}

/// Cloneable handle to one connection worker.
///
/// The registry owns one clone; the dispatcher borrows others transiently.
/// When the last clone is dropped the input side closes, and the worker drains
/// what was already delivered before terminating.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnectionId,
        generation: u64,
        input: Input,
        closer: StreamCloser,
        state: SharedState,
    ) -> Self {
        Self { inner: Arc::new(Inner { id, generation, input, closer, state }) }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Unique per worker; a replacement worker for the same identity gets a
    /// new generation.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn state(&self) -> WorkerState {
        self.inner.state.get()
    }

    /// Deliver a payload fragment to the worker.
    ///
    /// Inline handles suspend while the stream buffer is full, and fail with
    /// [`MirrorError::WriteInterrupted`] if the worker stops after taking part
    /// of the payload. Queued handles never suspend and fail with
    /// [`MirrorError::QueueFull`] instead. Either fails with
    /// [`MirrorError::BufferClosed`] once the worker has stopped accepting
    /// input.
    ///
    /// Queued delivery is best-effort: a fragment enqueued just before the
    /// worker stops is discarded with the queue.
    pub async fn write(&self, payload: Bytes) -> Result<()> {
        match &self.inner.input {
            Input::Inline(writer) => writer.write(&payload).await,
            Input::Queued(_) if self.inner.closer.is_closed() => Err(MirrorError::BufferClosed),
            Input::Queued(tx) => match tx.try_send(Feed::Data(payload)) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(MirrorError::QueueFull),
                Err(TrySendError::Closed(_)) => Err(MirrorError::BufferClosed),
            },
        }
    }

    /// Stop accepting input once everything delivered so far reaches the
    /// buffer. The worker forwards the remaining complete frames, then
    /// terminates.
    ///
    /// For a queued handle whose queue is full this falls back to
    /// [`ConnectionHandle::close`].
    pub fn finish(&self) {
        match &self.inner.input {
            Input::Inline(writer) => writer.close(),
            Input::Queued(tx) => {
                if tx.try_send(Feed::Finish).is_err() {
                    self.close();
                }
            }
        }
    }

    /// Close the stream buffer now. Bytes already in the buffer are still
    /// read; queued fragments and all further input are rejected.
    pub fn close(&self) {
        self.inner.closer.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closer.is_closed()
    }

    /// Whether two handles refer to the same worker.
    pub fn same_worker(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("generation", &self.inner.generation)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_only_moves_forward() {
        let state = SharedState::new();
        assert_eq!(state.get(), WorkerState::Created);
        state.advance(WorkerState::Running);
        assert_eq!(state.get(), WorkerState::Running);
        state.advance(WorkerState::Terminated);
        state.advance(WorkerState::Running);
        assert_eq!(state.get(), WorkerState::Terminated);
    }
}
