//! The table of live connections of a single server.
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};

use crate::error::Error;
use crate::network::connection::Connection;

/// Live connections keyed by their remote address.
///
/// A connection is registered from the moment it's accepted until it has been closed.
/// Connections that are still [Pending](crate::network::connection::ConnectionState::Pending)
/// are skipped by [ConnectionRegistry::send] and [ConnectionRegistry::broadcast].
///
/// Broadcasts write to one connection after the other.
/// A slow peer thereby stalls the whole broadcast (up to the write timeout), which is fine for
/// the small fan-out this is meant for.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    /// A previous connection with the same address is replaced. That one must have been closed.
    pub fn add(&self, connection: Arc<Connection>) {
        let address = connection.remote_address().to_string();
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = connections.insert(address, connection) {
            warn!(
                "Replaced registered connection {} ({:?})",
                previous.remote_address(),
                previous.state()
            );
        }
    }

    /// Remove a connection. Removing a connection that isn't registered is a no-op.
    ///
    /// Only this exact connection is removed, a newer connection with the same address is kept.
    pub fn remove(&self, connection: &Connection) {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);

        let is_registered = connections
            .get(connection.remote_address())
            .map_or(false, |registered| std::ptr::eq(Arc::as_ptr(registered), connection));
        if is_registered {
            connections.remove(connection.remote_address());
            debug!("Removed connection {}", connection.remote_address());
        }
    }

    /// Get a registered connection, no matter its state.
    pub fn get(&self, address: &str) -> Option<Arc<Connection>> {
        self.read().get(address).cloned()
    }

    /// The amount of registered connections, pending ones included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// The addresses of all active connections.
    pub fn addresses(&self) -> Vec<String> {
        self.active().iter().map(|connection| connection.remote_address().to_string()).collect()
    }

    /// Send data to the connection with the given address.
    /// An empty key sends the data to all active connections.
    pub async fn send(&self, key: &str, data: &[u8]) -> Result<(), Error> {
        if key.is_empty() {
            let active = self.active();
            let attempted = active.len();
            let failed = write_to_all(&active, data).await;
            if failed.is_empty() {
                return Ok(());
            }

            return Err(Error::Broadcast {
                failed: failed.len(),
                attempted,
            });
        }

        let connection = self
            .get(key)
            .filter(|connection| connection.is_active())
            .ok_or_else(|| Error::UnknownConnection(key.to_string()))?;

        connection.write(data).await
    }

    /// Send data to every active connection.
    ///
    /// A failing write doesn't stop the broadcast.
    /// Returns the address and the error of each failed write.
    pub async fn broadcast(&self, data: &[u8]) -> Vec<(String, Error)> {
        write_to_all(&self.active(), data).await
    }

    /// Snapshot of all active connections.
    /// The lock is released before any socket is touched.
    fn active(&self) -> Vec<Arc<Connection>> {
        self.read()
            .values()
            .filter(|connection| connection.is_active())
            .cloned()
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Connection>>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write to one connection after the other, collecting the failures.
async fn write_to_all(connections: &[Arc<Connection>], data: &[u8]) -> Vec<(String, Error)> {
    let mut failed = Vec::new();
    for connection in connections {
        if let Err(err) = connection.write(data).await {
            warn!("Broadcast to {} failed: {err}", connection.remote_address());
            failed.push((connection.remote_address().to_string(), err));
        }
    }

    failed
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, DuplexStream};

    use super::*;
    use crate::network::socket::{GenericStream, Peer};

    fn connection(port: u16) -> (Arc<Connection>, DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(1024);
        let stream: GenericStream = Box::new(ours);
        let (_, writer) = tokio::io::split(stream);
        let peer = Peer {
            address: format!("10.0.0.1:{port}").parse().unwrap(),
            certificates: None,
        };

        let connection = Connection::new(peer, writer, Some(Duration::from_secs(1)));
        (Arc::new(connection), theirs)
    }

    fn active_connection(port: u16) -> (Arc<Connection>, DuplexStream) {
        let (connection, peer) = connection(port);
        connection.activate();
        (connection, peer)
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (first, _first_peer) = active_connection(1);
        let (second, _second_peer) = active_connection(2);
        registry.add(first.clone());
        registry.add(second.clone());

        registry.remove(&first);
        registry.remove(&first);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("10.0.0.1:2").is_some());

        // Removing a connection that was never registered doesn't touch anything.
        let (stranger, _stranger_peer) = active_connection(3);
        registry.remove(&stranger);
        assert_eq!(registry.addresses(), vec!["10.0.0.1:2".to_string()]);
    }

    /// A stale handle must not remove its successor with the same address.
    #[test]
    fn test_remove_keeps_replacement() {
        let registry = ConnectionRegistry::new();
        let (old, _old_peer) = active_connection(1);
        let (new, _new_peer) = active_connection(1);
        registry.add(old.clone());
        registry.add(new.clone());

        registry.remove(&old);
        let registered = registry.get("10.0.0.1:1").unwrap();
        assert!(Arc::ptr_eq(&registered, &new));
    }

    #[tokio::test]
    async fn test_broadcast_continues_after_failure() {
        let registry = ConnectionRegistry::new();
        let mut peers = Vec::new();
        for port in 1..=3 {
            let (connection, peer) = active_connection(port);
            registry.add(connection);
            peers.push(Some(peer));
        }

        // The second peer goes away, writes to it fail with a broken pipe.
        peers[1] = None;

        let failed = registry.broadcast(b"ping").await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "10.0.0.1:2");

        for peer in peers.iter_mut().flatten() {
            let mut buffer = [0; 4];
            peer.read_exact(&mut buffer).await.unwrap();
            assert_eq!(&buffer, b"ping");
        }

        let result = registry.send("", b"ping").await;
        assert!(matches!(
            result,
            Err(Error::Broadcast {
                failed: 1,
                attempted: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_pending_connections_are_skipped() {
        let registry = ConnectionRegistry::new();
        let (pending, _pending_peer) = connection(1);
        let (active, mut active_peer) = active_connection(2);
        registry.add(pending);
        registry.add(active);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.addresses(), vec!["10.0.0.1:2".to_string()]);
        assert!(registry.broadcast(b"data").await.is_empty());

        let result = registry.send("10.0.0.1:1", b"data").await;
        assert!(matches!(result, Err(Error::UnknownConnection(_))));

        registry.send("10.0.0.1:2", b"more").await.unwrap();
        let mut buffer = [0; 8];
        active_peer.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"datamore");
    }

    /// Both numbers of a failed broadcast describe the same set of connections.
    #[tokio::test]
    async fn test_broadcast_error_counts_only_active() {
        let registry = ConnectionRegistry::new();
        let (pending, _pending_peer) = connection(1);
        let (alive, mut alive_peer) = active_connection(2);
        let (dead, dead_peer) = active_connection(3);
        registry.add(pending);
        registry.add(alive);
        registry.add(dead);
        drop(dead_peer);

        let result = registry.send("", b"ping").await;
        match result {
            Err(Error::Broadcast { failed, attempted }) => {
                assert_eq!((failed, attempted), (1, 2));
            }
            other => panic!("Expected a broadcast error, got {other:?}"),
        }

        let mut buffer = [0; 4];
        alive_peer.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"ping");
    }
}
