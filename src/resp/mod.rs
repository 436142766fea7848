//! RESP framing
//!
//! Determines the exact byte extent of request frames without decoding their
//! values. See [`FrameReader`].

mod reader;

pub use reader::FrameReader;
