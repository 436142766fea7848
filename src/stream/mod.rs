//! Per-connection byte streams

mod buffer;

pub use buffer::{StreamBuffer, StreamCloser, StreamReader, StreamWriter};
