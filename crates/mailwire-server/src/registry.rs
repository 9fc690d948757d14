use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mailwire_backend::MailBackend;
use mailwire_core::{ConnectionId, Identity};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Connection-id collision. Ids are process-unique by construction, so
    /// this is a programming invariant violation; registration is rejected
    /// rather than silently overwriting the live entry.
    #[error("connection {0} already registered")]
    Duplicate(ConnectionId),
}

/// One live, authenticated wire connection: the outbound transport handle,
/// the identity resolved at connect time, and the backend client bound for
/// the connection's lifetime. Exclusively owned by its registry entry.
pub struct Connection {
    pub id: ConnectionId,
    pub identity: Identity,
    outbound: mpsc::Sender<String>,
    pub backend: Arc<dyn MailBackend>,
    pub cancel: CancellationToken,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        identity: Identity,
        outbound: mpsc::Sender<String>,
        backend: Arc<dyn MailBackend>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            identity,
            outbound,
            backend,
            cancel,
        }
    }

    fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id.clone(),
            identity: self.identity.clone(),
            outbound: self.outbound.clone(),
            backend: Arc::clone(&self.backend),
            cancel: self.cancel.clone(),
        }
    }
}

/// Cheap per-operation view of a registry entry. Handed out by
/// [`ConnectionRegistry::get`] for the duration of one relay operation;
/// holds no lock on the registry.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: Identity,
    outbound: mpsc::Sender<String>,
    pub backend: Arc<dyn MailBackend>,
    pub cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Queue a frame for the socket writer. Logs and drops when the send
    /// queue is full (slow consumer).
    pub fn send(&self, frame: String) -> bool {
        queue_frame(&self.id, &self.outbound, frame)
    }
}

fn queue_frame(id: &ConnectionId, outbound: &mpsc::Sender<String>, frame: String) -> bool {
    match outbound.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(frame)) => {
            tracing::warn!(
                connection_id = %id,
                frame_len = frame.len(),
                "send queue full, dropping frame"
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Process-wide table of live connections, keyed by connection id.
///
/// The only state shared across connection-handling tasks. The map is never
/// exposed; every mutation goes through `register`/`deregister`, which are
/// atomic with respect to concurrent connect/disconnect on other
/// connections (DashMap serializes per shard).
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn register(&self, conn: Connection) -> Result<(), RegistryError> {
        let id = conn.id.clone();
        // The entry guard is released before len() is called below.
        let inserted = match self.connections.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(conn);
                true
            }
        };

        if !inserted {
            tracing::error!(connection_id = %id, "duplicate connection id rejected");
            return Err(RegistryError::Duplicate(id));
        }

        self.log_size();
        Ok(())
    }

    /// Remove a connection. Idempotent: deregistering an unknown id is a
    /// no-op, which absorbs teardown racing a second disconnect signal.
    pub fn deregister(&self, id: &ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(id).map(|(_, conn)| conn);
        if removed.is_some() {
            self.log_size();
        }
        removed
    }

    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(id).map(|entry| entry.handle())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue a frame on every live connection. Returns how many accepted it.
    pub fn broadcast(&self, frame: &str) -> usize {
        let mut delivered = 0;
        for entry in self.connections.iter() {
            if queue_frame(&entry.id, &entry.outbound, frame.to_string()) {
                delivered += 1;
            }
        }
        delivered
    }

    fn log_size(&self) {
        tracing::info!(active_connections = self.connections.len(), "registry size changed");
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
