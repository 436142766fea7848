//! Frame types for the forwarding pipeline

use bytes::Bytes;

/// Leading marker of a RESP frame.
///
/// Only the marker is inspected; the frame's value is never decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `+OK\r\n`
    SimpleString,
    /// `-ERR message\r\n`
    Error,
    /// `:42\r\n`
    Integer,
    /// `$3\r\nfoo\r\n`, or `$-1\r\n` for the null string
    BulkString,
    /// `*2\r\n...`, a count-prefixed sequence of nested frames
    Array,
}

impl FrameKind {
    /// Classify a marker byte.
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            b'+' => Some(FrameKind::SimpleString),
            b'-' => Some(FrameKind::Error),
            b':' => Some(FrameKind::Integer),
            b'$' => Some(FrameKind::BulkString),
            b'*' => Some(FrameKind::Array),
            _ => None,
        }
    }

    /// The wire marker for this kind.
    pub fn marker(self) -> u8 {
        match self {
            FrameKind::SimpleString => b'+',
            FrameKind::Error => b'-',
            FrameKind::Integer => b':',
            FrameKind::BulkString => b'$',
            FrameKind::Array => b'*',
        }
    }
}

/// One complete protocol value, exactly as it appeared on the wire.
///
/// Re-emitting [`Frame::as_bytes`] reproduces the original encoding byte for
/// byte. Cloning is cheap (reference counted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Bytes,
}

impl Frame {
    /// Wrap raw frame bytes produced by the frame reader.
    pub(crate) fn new(raw: Bytes) -> Self {
        Self { raw }
    }

    /// Leading marker of the frame.
    pub fn kind(&self) -> FrameKind {
        // The reader only yields frames with a recognized first byte.
        self.raw.first().copied().and_then(FrameKind::from_marker).unwrap_or(FrameKind::Array)
    }

    /// Raw wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Consume the frame, returning its wire bytes.
    pub fn into_bytes(self) -> Bytes {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}
