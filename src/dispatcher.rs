//! Dispatcher routes captured payload to per-connection workers
//!
//! A single sequential task: it pulls packet records from a [`PacketSource`],
//! derives each record's connection identity and writes the TCP payload into
//! that connection's stream buffer. It never parses frames itself.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::MirrorConfig;
use crate::connection::{ConnectionHandle, Registry};
use crate::sink::FrameSink;
use crate::source::PacketSource;
use crate::types::{CapturedPacket, ConnectionId};
use crate::{MirrorError, Result};

/// What happened to one packet record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Payload reached a connection's input
    Delivered,
    /// Nothing to deliver: undecodable, unattributable, filtered or empty
    Skipped,
    /// Payload was lost (queue overflow or a worker that stopped accepting)
    Dropped,
}

/// Counters for one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Packet records received from the source
    pub packets: u64,
    /// Records whose payload was delivered
    pub dispatched: u64,
    /// Records with nothing to deliver
    pub skipped: u64,
    /// Records whose payload was lost
    pub dropped: u64,
    /// Payload bytes delivered
    pub bytes: u64,
    /// Flows closed by FIN or RST
    pub flows_closed: u64,
    /// Connections evicted for overflowing their queue
    pub evicted: u64,
    /// Workers created
    pub connections_created: u64,
}

/// Routes packet payload to connection workers.
pub struct Dispatcher {
    registry: Arc<Registry>,
    target: Option<SocketAddr>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create a dispatcher with a fresh registry forwarding to `sink`.
    ///
    /// Fails if `config` does not validate.
    pub fn new(config: MirrorConfig, sink: Arc<dyn FrameSink>) -> Result<Self> {
        Ok(Self::with_registry(Registry::new(config, sink)?))
    }

    /// Create a dispatcher over an existing registry.
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        let target = registry.config().target;
        Self { registry, target, stats: DispatchStats::default() }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats { connections_created: self.registry.connections_created(), ..self.stats }
    }

    /// Route one packet record.
    ///
    /// In inline mode this suspends while the connection's buffer is full.
    pub async fn dispatch(&mut self, packet: CapturedPacket) -> Disposition {
        self.stats.packets += 1;

        if let Some(error) = &packet.decode_error {
            trace!("Skipping undecodable packet: {}", error);
            self.stats.skipped += 1;
            return Disposition::Skipped;
        }

        let Some(id) = packet.connection_id() else {
            trace!("Skipping packet without source address and port");
            self.stats.skipped += 1;
            return Disposition::Skipped;
        };

        if let Some(target) = self.target {
            if packet.destination_addr() != Some(target) {
                trace!("Skipping packet from {} not addressed to {}", id, target);
                self.stats.skipped += 1;
                return Disposition::Skipped;
            }
        }

        let disposition = match packet.application_payload() {
            Some(payload) => self.deliver(id, payload.clone()).await,
            None => Disposition::Skipped,
        };

        match disposition {
            Disposition::Delivered => self.stats.dispatched += 1,
            Disposition::Skipped => self.stats.skipped += 1,
            Disposition::Dropped => self.stats.dropped += 1,
        }

        if packet.flags.is_teardown() {
            if let Some(handle) = self.registry.get(id) {
                debug!("Connection {} closed by {}", id, if packet.flags.rst { "RST" } else { "FIN" });
                handle.finish();
                self.stats.flows_closed += 1;
            }
        }

        disposition
    }

    async fn deliver(&mut self, id: ConnectionId, payload: Bytes) -> Disposition {
        let len = payload.len();
        let handle = self.registry.get_or_create(id);

        let written = handle.write(payload.clone()).await;
        let result = match written {
            Err(MirrorError::BufferClosed) => {
                // Nothing of this fragment reached the old worker, which may
                // still be registered while it drains.
                trace!("Connection {}: worker gone, retrying on a fresh one", id);
                self.registry.remove(id, handle.generation());
                let fresh = self.registry.get_or_create(id);
                fresh.write(payload).await.map_err(|e| (fresh, e))
            }
            other => other.map_err(|e| (handle, e)),
        };

        match result {
            Ok(()) => {
                trace!("Connection {}: delivered {} bytes", id, len);
                self.stats.bytes += len as u64;
                Disposition::Delivered
            }
            Err((handle, e)) => {
                self.drop_fragment(&handle, len, e);
                Disposition::Dropped
            }
        }
    }

    fn drop_fragment(&mut self, handle: &ConnectionHandle, len: usize, error: MirrorError) {
        let id = handle.id();
        match error {
            MirrorError::QueueFull => {
                warn!("Connection {}: queue full, evicting and dropping {} bytes", id, len);
                if self.registry.get(id).is_some_and(|current| current.same_worker(handle)) {
                    self.registry.close(id);
                }
                handle.close();
                self.stats.evicted += 1;
            }
            MirrorError::WriteInterrupted { accepted } => {
                // The worker already saw the prefix; restarting mid-fragment
                // would forward its frames twice.
                self.stats.bytes += accepted as u64;
                warn!(
                    "Connection {}: worker stopped mid-fragment, dropped {} of {} bytes",
                    id,
                    len - accepted,
                    len
                );
            }
            error => warn!("Connection {}: dropped {} bytes: {}", id, len, error),
        }
    }

    /// Dispatch every packet from `source` until it ends or `cancel` fires,
    /// then shut down the registry and wait for workers to drain.
    ///
    /// Fails only when the source itself fails; connection-level errors never
    /// reach here.
    pub async fn run<S>(mut self, mut source: S, cancel: CancellationToken) -> Result<DispatchStats>
    where
        S: PacketSource,
    {
        info!("Dispatcher started");

        let outcome = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Dispatcher cancelled");
                    break Ok(());
                }
                next = source.next_packet() => next,
            };

            match next {
                Ok(Some(packet)) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Dispatcher cancelled while delivering");
                            break Ok(());
                        }
                        _ = self.dispatch(packet) => {}
                    }
                }
                Ok(None) => {
                    info!("Packet source ended after {} packets", self.stats.packets);
                    break Ok(());
                }
                Err(e) => {
                    error!("Packet source failed: {}", e);
                    break Err(e);
                }
            }
        };

        self.registry.shutdown().await;

        let stats = self.stats();
        info!(
            "Dispatcher finished: {} packets, {} dispatched ({} bytes), {} skipped, {} dropped, \
             {} connections, {} flows closed, {} evicted",
            stats.packets,
            stats.dispatched,
            stats.bytes,
            stats.skipped,
            stats.dropped,
            stats.connections_created,
            stats.flows_closed,
            stats.evicted
        );
        outcome.map(|()| stats)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("target", &self.target)
            .field("stats", &self.stats)
            .finish()
    }
}
