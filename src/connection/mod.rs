//! Per-connection workers and the registry that tracks them.
//!
//! Each observed client flow gets one [`ConnectionHandle`]: a stream buffer
//! fed by the dispatcher and a worker task that frames the buffered bytes
//! and forwards every complete frame to the sink.
//!
//! ```text
//! dispatcher ──write──▶ StreamBuffer ──▶ FrameReader ──▶ worker ──▶ FrameSink
//!      │                                                   │
//!      └── Registry::get_or_create            Registry::remove (on termination)
//! ```
//!
//! A worker runs until its first read failure (malformed frame or end of
//! stream), removes its own registry entry and never restarts. The next
//! fragment for the same identity gets a brand-new worker and buffer.

mod handle;
mod registry;
mod worker;


pub use handle::{ConnectionHandle, WorkerState};
pub use registry::Registry;
