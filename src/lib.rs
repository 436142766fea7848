//! Passive traffic mirroring for RESP servers.
//!
//! respmirror watches captured TCP traffic addressed to a RESP server,
//! rebuilds each client's byte stream and re-emits every complete request
//! frame, byte-for-byte, to a sink: another server, stdout or an in-process
//! channel.
//!
//! # Features
//!
//! - **Exact framing**: frames are forwarded exactly as captured, including
//!   nested arrays and binary bulk strings split across any number of packets
//! - **Isolation**: one worker per client flow; a malformed stream terminates
//!   only its own worker
//! - **Capture input**: classic pcap files, or a `tcpdump -w -` pipe on stdin
//! - **Bounded memory**: fixed-capacity per-connection buffers with
//!   backpressure
//!
//! ## Example (capture replay)
//!
//! ```rust,no_run
//! use respmirror::{Mirror, MirrorConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> respmirror::Result<()> {
//!     let config = MirrorConfig::default();
//!     let sink = Mirror::sink(&config, Some("127.0.0.1:6380")).await?;
//!     let stats = Mirror::replay("session.pcap", config, sink, CancellationToken::new()).await?;
//!     println!("{} bytes mirrored", stats.bytes);
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Stream reassembly and framing
pub mod connection;
pub mod dispatcher;
pub mod resp;
pub mod stream;

// Packet input and frame output
pub mod pcap;
pub mod sink;
pub mod source;
pub mod sources;

// Core exports
pub use config::{DispatchMode, FramingLimits, MirrorConfig};
pub use error::*;
pub use types::*;

// Pipeline exports
pub use connection::{ConnectionHandle, Registry, WorkerState};
pub use dispatcher::{DispatchStats, Disposition, Dispatcher};
pub use resp::FrameReader;
pub use sink::{ChannelSink, FrameSink, TcpSink, WriterSink};
pub use source::PacketSource;
pub use sources::{ChannelSource, PcapSource};
pub use stream::{StreamBuffer, StreamReader, StreamWriter};

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Unified entry point for mirroring sessions.
///
/// Wires a packet source, a dispatcher and a sink together for the common
/// cases; embedders with their own capture use [`Dispatcher`] and
/// [`ChannelSource`] directly.
pub struct Mirror;

impl Mirror {
    /// Build the frame sink: a connection to `server` when given, stdout
    /// otherwise.
    pub async fn sink(config: &MirrorConfig, server: Option<&str>) -> Result<Arc<dyn FrameSink>> {
        match server {
            Some(addr) => Ok(Arc::new(TcpSink::connect(addr, config.echo_responses).await?)),
            None => Ok(Arc::new(WriterSink::stdout())),
        }
    }

    /// Replay a capture file (or stdin for `-`) into `sink` until the capture
    /// ends or `cancel` fires.
    pub async fn replay<P: AsRef<Path>>(
        path: P,
        config: MirrorConfig,
        sink: Arc<dyn FrameSink>,
        cancel: CancellationToken,
    ) -> Result<DispatchStats> {
        let dispatcher = Dispatcher::new(config, sink)?;
        let source = PcapSource::open(path).await?;
        dispatcher.run(source, cancel).await
    }
}
