//! Error types for traffic mirroring.
//!
//! Every fallible operation in the crate returns [`MirrorError`]. Errors fall
//! into three groups that decide how far they travel:
//!
//! - **Bootstrap errors** (`Capture`, `UnsupportedFormat`, `Sink`, `Config`):
//!   raised before any frame is processed; the binary aborts on them.
//! - **Packet errors** (`Decode`): one packet is skipped, ingestion continues.
//! - **Connection-local errors** (`InvalidSyntax`, `EndOfStream`,
//!   `BufferClosed`, `WriteInterrupted`, `QueueFull`, `Io`): terminate a
//!   single connection worker and nothing else.
//!
//! ```rust
//! use respmirror::MirrorError;
//!
//! let error = MirrorError::invalid_syntax("unknown frame marker 0x50");
//! assert!(error.is_connection_local());
//! assert!(error.to_string().contains("0x50"));
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mirroring operations.
pub type Result<T, E = MirrorError> = std::result::Result<T, E>;

/// Main error type for mirroring operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MirrorError {
    #[error("invalid syntax: {reason}")]
    InvalidSyntax { reason: String },

    #[error("unexpected end of stream")]
    EndOfStream,

    #[error("stream buffer closed")]
    BufferClosed,

    /// The buffer closed after taking the first `accepted` bytes of a write
    #[error("stream buffer closed after accepting {accepted} bytes")]
    WriteInterrupted { accepted: usize },

    #[error("connection queue full")]
    QueueFull,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture source error: {path}")]
    Capture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported capture format: {details}")]
    UnsupportedFormat { details: String },

    #[error("failed to decode {layer} layer: {details}")]
    Decode { layer: &'static str, details: String },

    #[error("sink error: {reason}")]
    Sink {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("invalid configuration: {details}")]
    Config { details: String },
}

impl MirrorError {
    /// Returns whether this error is scoped to a single connection.
    ///
    /// Connection-local errors terminate the affected worker only; they never
    /// reach the dispatcher or other connections.
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            MirrorError::InvalidSyntax { .. }
                | MirrorError::EndOfStream
                | MirrorError::BufferClosed
                | MirrorError::WriteInterrupted { .. }
                | MirrorError::QueueFull
                | MirrorError::Io(_)
        )
    }

    /// Returns whether this error must abort the process before processing starts.
    pub fn is_bootstrap(&self) -> bool {
        matches!(
            self,
            MirrorError::Capture { .. }
                | MirrorError::UnsupportedFormat { .. }
                | MirrorError::Sink { .. }
                | MirrorError::Config { .. }
        )
    }

    /// Helper constructor for framing errors.
    pub fn invalid_syntax(reason: impl Into<String>) -> Self {
        MirrorError::InvalidSyntax { reason: reason.into() }
    }

    /// Helper constructor for capture file errors with path context.
    pub fn capture_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MirrorError::Capture { path: path.into(), source }
    }

    /// Helper constructor for packet decoding errors.
    pub fn decode_error(layer: &'static str, details: impl Into<String>) -> Self {
        MirrorError::Decode { layer, details: details.into() }
    }

    /// Helper constructor for sink errors.
    pub fn sink_failed(reason: impl Into<String>) -> Self {
        MirrorError::Sink { reason: reason.into(), source: None }
    }

    /// Helper constructor for sink errors with an I/O source.
    pub fn sink_failed_with_source(reason: impl Into<String>, source: std::io::Error) -> Self {
        MirrorError::Sink { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(details: impl Into<String>) -> Self {
        MirrorError::Config { details: details.into() }
    }

    /// Helper constructor for unsupported capture formats.
    pub fn unsupported_format(details: impl Into<String>) -> Self {
        MirrorError::UnsupportedFormat { details: details.into() }
    }

    /// Map a reader-side I/O error, folding premature EOF into [`MirrorError::EndOfStream`].
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            MirrorError::EndOfStream
        } else {
            MirrorError::Io(err)
        }
    }
}
