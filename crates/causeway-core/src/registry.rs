//! Concurrent registry of live connections.
//!
//! Connections are stored in a `DashMap` keyed by peer identity, so the
//! registry is safe to drive from the accept path, the dial path, and
//! error handlers at the same time. Entries leave the map only through
//! [`delete`](ConnectionRegistry::delete) (or the shutdown sweep), which
//! also closes the stored connection.

use std::sync::Arc;

use causeway_transport::MessageStream;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::id::ConnectionId;

/// Map from peer identity to live connection.
pub struct ConnectionRegistry<S: MessageStream> {
    connections: DashMap<ConnectionId, Arc<Connection<S>>>,
}

impl<S: MessageStream> ConnectionRegistry<S> {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Insert a connection under its identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if a connection with the same
    /// identity is registered; the existing entry is untouched.
    pub fn add(&self, connection: Arc<Connection<S>>) -> Result<()> {
        let id = connection.id();
        match self.connections.entry(id) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(id)),
            Entry::Vacant(vacant) => {
                vacant.insert(connection);
                tracing::debug!(peer = %id.short(), "connection registered");
                Ok(())
            }
        }
    }

    /// Close and remove the connection registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no connection is registered.
    pub async fn delete(&self, id: &ConnectionId) -> Result<()> {
        match self.connections.remove(id) {
            Some((_, connection)) => {
                connection.close().await;
                tracing::debug!(peer = %id.short(), "connection deregistered");
                Ok(())
            }
            None => Err(Error::NotFound(*id)),
        }
    }

    /// Fetch the connection registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no connection is registered.
    pub fn get(&self, id: &ConnectionId) -> Result<Arc<Connection<S>>> {
        self.connections
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::NotFound(*id))
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close and remove every connection. Used during node shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, connection)) = self.connections.remove(&id) {
                connection.close().await;
            }
        }
    }
}

impl<S: MessageStream> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
