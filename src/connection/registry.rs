//! Connection registry
//!
//! Maps each live client flow to its worker. The dispatcher adds entries
//! through [`Registry::get_or_create`]; each worker removes its own entry when
//! it terminates, and the dispatcher removes the entry of a connection it
//! evicts. Creation is atomic: concurrent first fragments for a new identity
//! always observe the same worker.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use super::handle::{ConnectionHandle, Input, SharedState};
use super::worker::{self, ConnectionWorker};
use crate::config::{DispatchMode, MirrorConfig};
use crate::sink::FrameSink;
use crate::stream::StreamBuffer;
use crate::types::ConnectionId;
use crate::Result;

/// Concurrent map from connection identity to worker.
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    next_generation: AtomicU64,
    config: MirrorConfig,
    sink: Arc<dyn FrameSink>,
    tasks: TaskTracker,
}

impl Registry {
    /// Create an empty registry whose workers forward to `sink`.
    ///
    /// Fails with [`MirrorError::Config`](crate::MirrorError::Config) if
    /// `config` does not validate.
    pub fn new(config: MirrorConfig, sink: Arc<dyn FrameSink>) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            config,
            sink,
            tasks: TaskTracker::new(),
        }))
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Live worker for `id`, if any.
    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.read().get(&id).cloned()
    }

    /// Live worker for `id`, creating and starting one if none exists.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get_or_create(self: &Arc<Self>, id: ConnectionId) -> ConnectionHandle {
        if let Some(handle) = self.read().get(&id) {
            return handle.clone();
        }

        // Re-check under the exclusive lock: another caller may have won.
        match self.write().entry(id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let handle = self.spawn_worker(id);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    /// Remove the entry for `id` if it still belongs to `generation`.
    ///
    /// Returns whether an entry was removed. A newer worker registered under
    /// the same identity is left untouched.
    pub fn remove(&self, id: ConnectionId, generation: u64) -> bool {
        let mut connections = self.write();
        match connections.get(&id) {
            Some(handle) if handle.generation() == generation => {
                connections.remove(&id);
                trace!("Removed connection {} (generation {})", id, generation);
                true
            }
            _ => false,
        }
    }

    /// Evict the connection for `id` and close its buffer at once.
    ///
    /// Bytes already in the buffer are still framed; queued fragments are
    /// discarded. Returns the evicted handle, if any.
    pub fn close(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let handle = self.write().remove(&id)?;
        handle.close();
        debug!("Evicted connection {} (generation {})", id, handle.generation());
        Some(handle)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Identities of all live connections.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.read().keys().copied().collect()
    }

    /// Workers created so far, including terminated ones.
    pub fn connections_created(&self) -> u64 {
        self.next_generation.load(Ordering::Relaxed) - 1
    }

    /// Finish every live connection and wait for all workers to drain.
    ///
    /// Complete frames already delivered are still forwarded; trailing
    /// partial frames are discarded.
    pub async fn shutdown(&self) {
        let handles: Vec<ConnectionHandle> = self.read().values().cloned().collect();
        info!("Shutting down {} connections", handles.len());
        for handle in &handles {
            handle.finish();
        }
        drop(handles);

        self.tasks.close();
        self.tasks.wait().await;
        debug!("All connection workers finished");
    }

    fn spawn_worker(self: &Arc<Self>, id: ConnectionId) -> ConnectionHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (writer, reader) = StreamBuffer::with_capacity(self.config.buffer_capacity);
        let closer = writer.closer();
        let state = SharedState::new();

        let input = match self.config.dispatch_mode {
            DispatchMode::Inline => Input::Inline(writer),
            DispatchMode::Decoupled => {
                let (tx, rx) = mpsc::channel(self.config.queue_depth);
                self.tasks.spawn(worker::feed(id, rx, writer));
                Input::Queued(tx)
            }
        };

        let worker = ConnectionWorker::new(
            id,
            generation,
            reader,
            self.config.framing_limits(),
            Arc::clone(&self.sink),
            Arc::downgrade(self),
            state.clone(),
        );
        self.tasks.spawn(worker.run());

        debug!("Created connection {} (generation {})", id, generation);
        ConnectionHandle::new(id, generation, input, closer, state)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("connections", &self.len())
            .field("created", &self.connections_created())
            .finish()
    }
}
