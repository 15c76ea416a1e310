//! Per-origin HTTP/2 connection pool
//!
//! One connection per `(host, port)`. Lookups hand out a cached connection
//! only while it can still open streams; a stale entry is replaced by the
//! next [`ConnectionManager::get_or_connect`].

use super::config::ConnectionConfig;
use super::connection::Connection;
use super::error::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

type OriginKey = (String, u16);

/// Shares HTTP/2 connections between requests to the same origin
#[derive(Debug)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    connections: DashMap<OriginKey, Arc<Connection>>,
}

impl ConnectionManager {
    /// Create an empty manager; new connections use `config`
    pub fn new(config: ConnectionConfig) -> Self {
        ConnectionManager {
            config,
            connections: DashMap::new(),
        }
    }

    /// Configuration applied to new connections
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn key(host: &str, port: u16) -> OriginKey {
        (host.to_ascii_lowercase(), port)
    }

    /// A cached connection that can still open streams
    pub fn get(&self, host: &str, port: u16) -> Option<Arc<Connection>> {
        let conn = self
            .connections
            .get(&Self::key(host, port))
            .map(|entry| Arc::clone(entry.value()))?;

        if conn.is_usable() {
            tracing::info!(conn = %conn.id(), host, port, "reusing existing HTTP/2 connection");
            Some(conn)
        } else {
            None
        }
    }

    /// Reuse the cached connection for `(host, port)` or start a new one on `io`
    ///
    /// `io` is dropped unused when a usable connection already exists. When
    /// two callers race, both handshake but only the first to finish is
    /// cached; the other connection is disposed and the cached one returned.
    pub async fn get_or_connect<S>(&self, host: &str, port: u16, io: S) -> Result<Arc<Connection>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if let Some(conn) = self.get(host, port) {
            return Ok(conn);
        }
        // The handshake awaits; no map guard may be held across it
        let conn = Connection::handshake(io, self.config.clone()).await?;

        let (winner, discarded) = match self.connections.entry(Self::key(host, port)) {
            Entry::Occupied(entry) if entry.get().is_usable() => {
                tracing::debug!(conn = %conn.id(), host, port, "another caller connected first");
                (Arc::clone(entry.get()), Some(conn))
            }
            Entry::Occupied(mut entry) => {
                tracing::info!(conn = %conn.id(), host, port, "initializing a new HTTP/2 connection");
                let stale = entry.insert(Arc::clone(&conn));
                (conn, Some(stale))
            }
            Entry::Vacant(entry) => {
                tracing::info!(conn = %conn.id(), host, port, "initializing a new HTTP/2 connection");
                entry.insert(Arc::clone(&conn));
                (conn, None)
            }
        };

        // Entry guard is gone, disposal may await
        if let Some(discarded) = discarded {
            discarded.dispose().await;
        }
        Ok(winner)
    }

    /// Drop `conn` from the pool after it failed with a stale-connection error
    ///
    /// Only that exact connection is removed; a newer one already cached
    /// for the same origin stays. Returns whether an entry was removed.
    pub fn remove(&self, host: &str, port: u16, conn: &Arc<Connection>) -> bool {
        let removed = self
            .connections
            .remove_if(&Self::key(host, port), |_, cached| Arc::ptr_eq(cached, conn))
            .is_some();
        if removed {
            tracing::info!(
                conn = %conn.id(),
                host,
                port,
                "stale HTTP/2 connection detected, retrying through the pool"
            );
        }
        removed
    }

    /// Dispose every pooled connection and empty the pool
    pub async fn dispose_all(&self) {
        let keys: Vec<OriginKey> = self.connections.iter().map(|entry| entry.key().clone()).collect();
        let drained: Vec<Arc<Connection>> = keys
            .into_iter()
            .filter_map(|key| self.connections.remove(&key).map(|(_, conn)| conn))
            .collect();

        tracing::debug!(count = drained.len(), "disposing pooled HTTP/2 connections");
        for conn in drained {
            conn.dispose().await;
        }
    }

    /// Number of pooled connections, usable or not
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}
