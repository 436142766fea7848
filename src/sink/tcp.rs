//! TCP sink towards a mirror server

use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

use super::WriterSink;
use crate::{MirrorError, Result};

/// Maximum time to establish the sink connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Constructor for TCP sinks.
///
/// The mirror server answers every forwarded request; those responses are
/// drained continuously by a background task so the server never blocks on
/// a full send window. They are discarded, or copied to stdout when
/// `echo_responses` is set.
pub struct TcpSink;

impl TcpSink {
    /// Dial `addr` and return a sink writing frames to it.
    pub async fn connect(addr: &str, echo_responses: bool) -> Result<WriterSink<OwnedWriteHalf>> {
        info!("Connecting to mirror server {}", addr);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                MirrorError::sink_failed(format!(
                    "timed out after {:?} dialing {}",
                    CONNECT_TIMEOUT, addr
                ))
            })?
            .map_err(|e| MirrorError::sink_failed_with_source(format!("failed to dial {}", addr), e))?;

        // Requests are small and latency matters more than packet count.
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(drain_responses(read_half, echo_responses));

        info!("Connected to mirror server {}", addr);
        Ok(WriterSink::new(write_half))
    }
}

async fn drain_responses(mut read_half: OwnedReadHalf, echo: bool) {
    let result = if echo {
        let mut stdout = tokio::io::stdout();
        let copied = tokio::io::copy(&mut read_half, &mut stdout).await;
        let _ = stdout.flush().await;
        copied
    } else {
        tokio::io::copy(&mut read_half, &mut tokio::io::sink()).await
    };

    match result {
        Ok(bytes) => debug!("Mirror server closed its side after {} response bytes", bytes),
        Err(e) => debug!("Stopped draining mirror server responses: {}", e),
    }
}
