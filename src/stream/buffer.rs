//! Bounded single-producer/single-consumer byte buffer
//!
//! Bridges the dispatcher (writer) and one connection worker (reader):
//!
//! - [`StreamWriter::write`] suspends while the buffer is full; bytes are
//!   never dropped and the buffer never grows past its capacity
//! - [`StreamReader`] implements [`AsyncRead`] and suspends while the buffer
//!   is empty
//! - closing is one-way and idempotent; it wakes both sides, rejects later
//!   writes, and lets the reader drain what was already written before
//!   reporting end-of-stream
//!
//! Dropping either half closes the buffer.

use bytes::BytesMut;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, ReadBuf};

use crate::{MirrorError, Result};

/// Initial allocation; the buffer grows on demand up to its capacity.
const INITIAL_ALLOCATION: usize = 16 * 1024;

struct State {
    data: BytesMut,
    capacity: usize,
    closed: bool,
    reader: Option<Waker>,
    writer: Option<Waker>,
}

struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // State stays consistent across a panic elsewhere; keep going.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        let (reader, writer) = {
            let mut state = self.lock();
            state.closed = true;
            (state.reader.take(), state.writer.take())
        };
        if let Some(waker) = reader {
            waker.wake();
        }
        if let Some(waker) = writer {
            waker.wake();
        }
    }
}

/// Constructor namespace for stream buffers.
pub struct StreamBuffer;

impl StreamBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> (StreamWriter, StreamReader) {
        assert!(capacity > 0, "stream buffer capacity must be non-zero");
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                data: BytesMut::with_capacity(capacity.min(INITIAL_ALLOCATION)),
                capacity,
                closed: false,
                reader: None,
                writer: None,
            }),
        });
        (StreamWriter { shared: Arc::clone(&shared) }, StreamReader { shared })
    }
}

/// Producer half of a stream buffer.
pub struct StreamWriter {
    shared: Arc<Shared>,
}

impl StreamWriter {
    /// Append `data`, suspending while the buffer is full.
    ///
    /// Writes larger than the capacity are delivered in pieces as the reader
    /// makes room. Returns [`MirrorError::BufferClosed`] if the buffer is
    /// closed before any byte is accepted, and
    /// [`MirrorError::WriteInterrupted`] if it closes part-way through. The
    /// accepted prefix stays readable either way.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut remaining = data;
        poll_fn(|cx| {
            let mut state = self.shared.lock();
            if state.closed {
                let accepted = data.len() - remaining.len();
                return Poll::Ready(Err(if accepted == 0 {
                    MirrorError::BufferClosed
                } else {
                    MirrorError::WriteInterrupted { accepted }
                }));
            }

            let space = state.capacity - state.data.len();
            let accepted = space.min(remaining.len());
            if accepted > 0 {
                state.data.extend_from_slice(&remaining[..accepted]);
                remaining = &remaining[accepted..];
            }

            let reader = if accepted > 0 { state.reader.take() } else { None };
            let poll = if remaining.is_empty() {
                Poll::Ready(Ok(()))
            } else {
                state.writer = Some(cx.waker().clone());
                Poll::Pending
            };
            drop(state);

            if let Some(waker) = reader {
                waker.wake();
            }
            poll
        })
        .await
    }

    /// Close the buffer. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Handle that can close the buffer without owning either half.
    pub fn closer(&self) -> StreamCloser {
        StreamCloser { shared: Arc::clone(&self.shared) }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Bytes written but not yet read.
    pub fn buffered(&self) -> usize {
        self.shared.lock().data.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Close-only handle to a stream buffer.
#[derive(Clone)]
pub struct StreamCloser {
    shared: Arc<Shared>,
}

impl StreamCloser {
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

/// Consumer half of a stream buffer.
pub struct StreamReader {
    shared: Arc<Shared>,
}

impl StreamReader {
    /// Close the buffer from the reading side. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl AsyncRead for StreamReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.shared.lock();

        if !state.data.is_empty() {
            let n = buf.remaining().min(state.data.len());
            let chunk = state.data.split_to(n);
            buf.put_slice(&chunk);
            let writer = state.writer.take();
            drop(state);
            if let Some(waker) = writer {
                waker.wake();
            }
            return Poll::Ready(Ok(()));
        }

        if state.closed {
            // End of stream
            return Poll::Ready(Ok(()));
        }

        state.reader = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.shared.close();
    }
}
