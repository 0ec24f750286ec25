//! Live connection registry.
//!
//! The server keeps every accepted connection in a [`ConnectionRegistry`]
//! so that shutdown can reach all of them. A connection is inserted when it
//! is accepted and removed exactly once, when its [`Registration`] guard is
//! dropped at the end of the connection's life.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::connection::ConnectionHandle;

/// A unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new time-ordered connection ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Counters describing the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Connections currently registered.
    pub active_connections: usize,
    /// Connections registered since the registry was created.
    pub total_accepted: usize,
    /// Connections removed since the registry was created.
    pub total_closed: usize,
}

/// The set of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    total_accepted: AtomicUsize,
    total_closed: AtomicUsize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a connection. It stays registered until the returned guard
    /// is dropped.
    pub fn register(self: &Arc<Self>, handle: Arc<ConnectionHandle>) -> Registration {
        let id = handle.id();
        self.connections.insert(id, handle);
        self.total_accepted.fetch_add(1, Ordering::Relaxed);

        debug!(connection_id = %id, total = self.connections.len(), "Connection registered");

        Registration {
            registry: Arc::clone(self),
            id,
        }
    }

    fn remove(&self, id: &ConnectionId) {
        if self.connections.remove(id).is_some() {
            self.total_closed.fetch_add(1, Ordering::Relaxed);
            debug!(connection_id = %id, "Connection removed");
        }
    }

    /// Get a registered connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Check if a connection is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Get the number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Get the IDs of all registered connections.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| *e.key()).collect()
    }

    /// Take a snapshot of all registered connections.
    ///
    /// The snapshot does not hold any lock on the registry.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Get the registry counters.
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            active_connections: self.connections.len(),
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
        }
    }
}

/// Keeps a connection registered while alive.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Registration {
    /// The registered connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
