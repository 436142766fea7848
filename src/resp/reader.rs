//! Recursive RESP frame reader
//!
//! Reads one complete top-level frame at a time from any
//! [`AsyncBufRead`] source and returns its raw bytes. The reader never
//! interprets values; it only computes extents:
//!
//! 1. Read a CRLF-terminated line.
//! 2. `+`, `-`, `:` lines are complete frames on their own.
//! 3. `$<n>` is followed by `n + 2` body bytes (`$-1` has no body).
//! 4. `*<n>` is followed by `n` nested frames, read recursively
//!    (`*-1` has no elements).
//!
//! A call either yields a complete frame or fails; partial frames are never
//! returned.
//!
//! ## Usage Example
//!
//! ```rust
//! use respmirror::resp::FrameReader;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> respmirror::Result<()> {
//! let wire: &[u8] = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n+OK\r\n";
//! let mut reader = FrameReader::new(wire);
//!
//! let first = reader.read_frame().await?;
//! assert_eq!(first.as_bytes(), b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
//!
//! let second = reader.read_frame().await?;
//! assert_eq!(second.as_bytes(), b"+OK\r\n");
//! # Ok(())
//! # }
//! ```

use bytes::BytesMut;
use futures::future::BoxFuture;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::trace;

use crate::config::FramingLimits;
use crate::types::{Frame, FrameKind};
use crate::{MirrorError, Result};

/// Frame reader over a suspending byte source.
///
/// Holds no parse state between frames; after a failure the underlying
/// source is positioned somewhere inside the broken frame and the reader
/// should be discarded.
pub struct FrameReader<R> {
    reader: R,
    limits: FramingLimits,
    /// Scratch space for line reads, reused across frames
    line: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// Create a reader with default framing limits.
    pub fn new(reader: R) -> Self {
        Self::with_limits(reader, FramingLimits::default())
    }

    /// Create a reader with explicit framing limits.
    pub fn with_limits(reader: R, limits: FramingLimits) -> Self {
        Self { reader, limits, line: Vec::new() }
    }

    /// Framing limits in effect.
    pub fn limits(&self) -> &FramingLimits {
        &self.limits
    }

    /// Consume the reader, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read exactly one complete frame.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::InvalidSyntax`] for a bad line terminator, an unknown
    ///   marker, a malformed count, or a frame beyond the configured limits
    /// - [`MirrorError::EndOfStream`] if the source ends before the frame is
    ///   complete (including a clean end before the first byte)
    /// - [`MirrorError::Io`] for other source failures
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let mut raw = BytesMut::new();
        self.read_value(&mut raw, 0).await?;
        trace!("Framed {} bytes", raw.len());
        Ok(Frame::new(raw.freeze()))
    }

    /// Append one complete value to `out`. `depth` counts enclosing arrays.
    async fn read_value(&mut self, out: &mut BytesMut, depth: usize) -> Result<()> {
        let start = out.len();
        self.read_line(out).await?;

        let marker = out[start];
        match FrameKind::from_marker(marker) {
            Some(FrameKind::SimpleString | FrameKind::Error | FrameKind::Integer) => Ok(()),
            Some(FrameKind::BulkString) => {
                let Some(len) = parse_count(&out[start..])? else {
                    return Ok(());
                };
                if len > self.limits.max_bulk_length {
                    return Err(MirrorError::invalid_syntax(format!(
                        "bulk length {} exceeds maximum {}",
                        len, self.limits.max_bulk_length
                    )));
                }

                // Body plus trailing CRLF, copied verbatim
                let body_start = out.len();
                out.resize(body_start + len + 2, 0);
                self.reader
                    .read_exact(&mut out[body_start..])
                    .await
                    .map_err(MirrorError::from_read)?;
                Ok(())
            }
            Some(FrameKind::Array) => {
                let Some(count) = parse_count(&out[start..])? else {
                    return Ok(());
                };
                if depth >= self.limits.max_nesting_depth {
                    return Err(MirrorError::invalid_syntax(format!(
                        "nesting depth exceeds maximum {}",
                        self.limits.max_nesting_depth
                    )));
                }
                self.read_elements(out, count, depth + 1).await
            }
            None => Err(MirrorError::invalid_syntax(format!(
                "unknown frame marker {:#04x}",
                marker
            ))),
        }
    }

    /// Read `count` nested values. Boxed to give the recursion a fixed size.
    fn read_elements<'a>(
        &'a mut self,
        out: &'a mut BytesMut,
        count: usize,
        depth: usize,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for _ in 0..count {
                self.read_value(out, depth).await?;
            }
            Ok(())
        })
    }

    /// Append one CRLF-terminated line to `out`.
    async fn read_line(&mut self, out: &mut BytesMut) -> Result<()> {
        self.line.clear();
        let limit = self.limits.max_line_length;
        let read = (&mut self.reader)
            .take(limit as u64)
            .read_until(b'\n', &mut self.line)
            .await
            .map_err(MirrorError::from_read)?;

        if read == 0 {
            return Err(MirrorError::EndOfStream);
        }
        if self.line.last() != Some(&b'\n') {
            if read >= limit {
                return Err(MirrorError::invalid_syntax(format!(
                    "line exceeds maximum length {}",
                    limit
                )));
            }
            return Err(MirrorError::EndOfStream);
        }
        // Too short, or LF not preceded by CR
        if read < 2 || self.line[read - 2] != b'\r' {
            return Err(MirrorError::invalid_syntax("line not terminated by CRLF"));
        }

        out.extend_from_slice(&self.line);
        Ok(())
    }
}

/// Parse the count between the marker and the first CR.
///
/// Returns `None` for the null count `-1`.
fn parse_count(line: &[u8]) -> Result<Option<usize>> {
    let end = line.iter().position(|&b| b == b'\r').unwrap_or(line.len());
    let digits = std::str::from_utf8(&line[1..end])
        .map_err(|_| MirrorError::invalid_syntax("non-ASCII count"))?;
    let count: i64 = digits
        .parse()
        .map_err(|_| MirrorError::invalid_syntax(format!("invalid count {:?}", digits)))?;

    match count {
        -1 => Ok(None),
        n if n < 0 => Err(MirrorError::invalid_syntax(format!("negative count {}", n))),
        n => usize::try_from(n)
            .map(Some)
            .map_err(|_| MirrorError::invalid_syntax(format!("count {} out of range", n))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamBuffer;
    use tokio::io::BufReader;

    async fn frame_of(wire: &[u8]) -> Result<Frame> {
        FrameReader::new(wire).read_frame().await
    }

    #[tokio::test]
    async fn line_frames_are_returned_unchanged() {
        for wire in [&b"+OK\r\n"[..], b"-ERR unknown command\r\n", b":1000\r\n", b":-3\r\n"] {
            let frame = frame_of(wire).await.expect("line frame");
            assert_eq!(frame.as_bytes(), wire);
        }
    }

    #[tokio::test]
    async fn bulk_string_includes_header_body_and_terminator() {
        let frame = frame_of(b"$5\r\nhello\r\n+next\r\n").await.expect("bulk string");
        assert_eq!(frame.as_bytes(), b"$5\r\nhello\r\n");
        assert_eq!(frame.kind(), FrameKind::BulkString);
    }

    #[tokio::test]
    async fn bulk_body_is_never_interpreted() {
        // The body contains CRLF and markers; only the declared length counts.
        let wire = b"$8\r\n*1\r\n+x\r\n\r\n";
        let frame = frame_of(wire).await.expect("bulk string with CRLF inside");
        assert_eq!(frame.as_bytes(), wire);
    }

    #[tokio::test]
    async fn null_bulk_string_is_header_only() {
        let frame = frame_of(b"$-1\r\n:1\r\n").await.expect("null bulk");
        assert_eq!(frame.as_bytes(), b"$-1\r\n");
    }

    #[tokio::test]
    async fn empty_bulk_string_keeps_its_terminator() {
        let frame = frame_of(b"$0\r\n\r\n").await.expect("empty bulk");
        assert_eq!(frame.as_bytes(), b"$0\r\n\r\n");
    }

    #[tokio::test]
    async fn arrays_concatenate_nested_frames() {
        let wire = b"*3\r\n$3\r\nSET\r\n*2\r\n:1\r\n$-1\r\n+OK\r\n";
        let frame = frame_of(wire).await.expect("nested array");
        assert_eq!(frame.as_bytes(), wire);
        assert_eq!(frame.kind(), FrameKind::Array);
    }

    #[tokio::test]
    async fn null_and_empty_arrays_are_header_only() {
        assert_eq!(frame_of(b"*-1\r\n").await.unwrap().as_bytes(), b"*-1\r\n");
        assert_eq!(frame_of(b"*0\r\n").await.unwrap().as_bytes(), b"*0\r\n");
    }

    #[tokio::test]
    async fn consecutive_frames_are_read_in_order() {
        let wire: &[u8] = b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n";
        let mut reader = FrameReader::new(wire);
        assert_eq!(reader.read_frame().await.unwrap().as_bytes(), b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(
            reader.read_frame().await.unwrap().as_bytes(),
            b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n"
        );
        assert!(matches!(reader.read_frame().await, Err(MirrorError::EndOfStream)));
    }

    #[tokio::test]
    async fn bare_line_feed_is_invalid_syntax() {
        assert!(matches!(frame_of(b"+OK\n").await, Err(MirrorError::InvalidSyntax { .. })));
        assert!(matches!(frame_of(b"\n").await, Err(MirrorError::InvalidSyntax { .. })));
        assert!(matches!(
            frame_of(b"*1\r\n$3\nGET\r\n").await,
            Err(MirrorError::InvalidSyntax { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_marker_is_invalid_syntax() {
        // Inline commands are not framed
        assert!(matches!(frame_of(b"PING\r\n").await, Err(MirrorError::InvalidSyntax { .. })));
        assert!(matches!(frame_of(b"\r\n").await, Err(MirrorError::InvalidSyntax { .. })));
        assert!(matches!(
            frame_of(b"*1\r\n%1\r\n").await,
            Err(MirrorError::InvalidSyntax { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_counts_are_invalid_syntax() {
        for wire in [&b"$abc\r\n"[..], b"*\r\n", b"$-2\r\n", b"*-5\r\n", b"$1.5\r\nx\r\n"] {
            assert!(
                matches!(frame_of(wire).await, Err(MirrorError::InvalidSyntax { .. })),
                "{:?} should be rejected",
                String::from_utf8_lossy(wire)
            );
        }
    }

    #[tokio::test]
    async fn nesting_beyond_limit_is_invalid_syntax() {
        let limits = FramingLimits { max_nesting_depth: 3, ..FramingLimits::default() };

        let at_limit: &[u8] = b"*1\r\n*1\r\n*1\r\n:1\r\n";
        let frame = FrameReader::with_limits(at_limit, limits).read_frame().await;
        assert_eq!(frame.expect("depth 3 accepted").as_bytes(), at_limit);

        let too_deep: &[u8] = b"*1\r\n*1\r\n*1\r\n*1\r\n:1\r\n";
        let result = FrameReader::with_limits(too_deep, limits).read_frame().await;
        assert!(matches!(result, Err(MirrorError::InvalidSyntax { .. })));
    }

    #[tokio::test]
    async fn pathological_nesting_does_not_exhaust_the_stack() {
        let wire = b"*1\r\n".repeat(100_000);
        let result = FrameReader::new(&wire[..]).read_frame().await;
        assert!(matches!(result, Err(MirrorError::InvalidSyntax { .. })));
    }

    #[tokio::test]
    async fn oversized_lines_and_bulks_are_rejected() {
        let limits =
            FramingLimits { max_line_length: 8, max_bulk_length: 4, ..FramingLimits::default() };

        let long_line: &[u8] = b"+0123456789\r\n";
        let result = FrameReader::with_limits(long_line, limits).read_frame().await;
        assert!(matches!(result, Err(MirrorError::InvalidSyntax { .. })));

        let big_bulk: &[u8] = b"$5\r\nhello\r\n";
        let result = FrameReader::with_limits(big_bulk, limits).read_frame().await;
        assert!(matches!(result, Err(MirrorError::InvalidSyntax { .. })));
    }

    #[tokio::test]
    async fn truncated_frames_end_the_stream() {
        assert!(matches!(frame_of(b"$10\r\nhello").await, Err(MirrorError::EndOfStream)));
        assert!(matches!(frame_of(b"*2\r\n:1\r\n").await, Err(MirrorError::EndOfStream)));
        assert!(matches!(frame_of(b"+OK").await, Err(MirrorError::EndOfStream)));
    }

    #[tokio::test]
    async fn truncated_body_waits_then_fails_when_buffer_closes() {
        let (writer, reader) = StreamBuffer::with_capacity(64);
        let mut frames = FrameReader::new(BufReader::new(reader));

        writer.write(b"$10\r\nhello").await.expect("write partial frame");
        let pending = tokio::spawn(async move { frames.read_frame().await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished(), "reader should wait for the rest of the body");

        writer.close();
        let result = pending.await.expect("reader task");
        assert!(matches!(result, Err(MirrorError::EndOfStream)));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Value {
            Simple(String),
            Error(String),
            Integer(i64),
            Bulk(Option<Vec<u8>>),
            Array(Option<Vec<Value>>),
        }

        fn encode(value: &Value, out: &mut Vec<u8>) {
            match value {
                Value::Simple(s) => out.extend_from_slice(format!("+{}\r\n", s).as_bytes()),
                Value::Error(s) => out.extend_from_slice(format!("-{}\r\n", s).as_bytes()),
                Value::Integer(n) => out.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
                Value::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
                Value::Bulk(Some(body)) => {
                    out.extend_from_slice(format!("${}\r\n", body.len()).as_bytes());
                    out.extend_from_slice(body);
                    out.extend_from_slice(b"\r\n");
                }
                Value::Array(None) => out.extend_from_slice(b"*-1\r\n"),
                Value::Array(Some(items)) => {
                    out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                    for item in items {
                        encode(item, out);
                    }
                }
            }
        }

        fn value_strategy() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Simple),
                "ERR [a-z ]{0,16}".prop_map(Value::Error),
                any::<i64>().prop_map(Value::Integer),
                proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64))
                    .prop_map(Value::Bulk),
            ];
            leaf.prop_recursive(4, 64, 6, |inner| {
                proptest::option::of(proptest::collection::vec(inner, 0..6)).prop_map(Value::Array)
            })
        }

        fn wire_of(value: &Value) -> Vec<u8> {
            let mut out = Vec::new();
            encode(value, &mut out);
            out
        }

        proptest! {
          #[test]
          fn valid_frames_round_trip_byte_for_byte(value in value_strategy()) {
            let wire = wire_of(&value);
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let frame = runtime.block_on(async { FrameReader::new(&wire[..]).read_frame().await });
            let frame = frame.unwrap();
            prop_assert_eq!(frame.as_bytes(), &wire[..]);
          }

          #[test]
          fn fragmentation_does_not_change_the_frame(
            value in value_strategy(),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..8),
          ) {
            let wire = wire_of(&value);
            let mut offsets: Vec<usize> = cuts.iter().map(|cut| cut.index(wire.len() + 1)).collect();
            offsets.push(0);
            offsets.push(wire.len());
            offsets.sort_unstable();
            offsets.dedup();

            let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let frame = runtime.block_on(async {
                let (writer, reader) = StreamBuffer::with_capacity(32);
                let chunks: Vec<Vec<u8>> =
                    offsets.windows(2).map(|w| wire[w[0]..w[1]].to_vec()).collect();
                let feeder = tokio::spawn(async move {
                    for chunk in chunks {
                        writer.write(&chunk).await.expect("buffer open");
                    }
                    writer
                });
                let frame = FrameReader::new(BufReader::new(reader)).read_frame().await;
                drop(feeder.await.expect("feeder task"));
                frame
            });
            let frame = frame.unwrap();
            prop_assert_eq!(frame.as_bytes(), &wire[..]);
          }
        }
    }
}
