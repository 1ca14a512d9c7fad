use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;

use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transmitter::TransmitterId;
use crate::types::TransportType;

/// Identifier of a connection in the [`ConnectionTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a connection-oriented transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Snapshot of a table entry.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub transport: TransportType,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub state: ConnectionState,
    /// Host names the peer is known by (RFC 5923 aliases).
    pub aliases: Vec<String>,
    pub owners: HashSet<TransmitterId>,
}

impl ConnectionInfo {
    /// A connection can carry messages until it starts closing.
    pub fn is_usable(&self) -> bool {
        matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Manager-wide table of connection-oriented transport connections.
///
/// Lookups only read. Owner attach and detach are the only mutations made
/// on behalf of transmitters. The lock is held for the duration of a single
/// call.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: Mutex<HashMap<ConnectionId, ConnectionInfo>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection in the `Connecting` state.
    pub fn insert(&self, transport: TransportType, local: SocketAddr, remote: SocketAddr) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.lock().insert(
            id,
            ConnectionInfo {
                id,
                transport,
                local,
                remote,
                state: ConnectionState::Connecting,
                aliases: Vec::new(),
                owners: HashSet::new(),
            },
        );
        debug!(connection = %id, %transport, %local, %remote, "connection added");
        id
    }

    pub fn set_state(&self, id: ConnectionId, state: ConnectionState) -> Result<()> {
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(&id)
            .ok_or_else(|| Error::Connection(format!("unknown connection {}", id)))?;
        conn.state = state;
        Ok(())
    }

    /// Records `alias` as a host name for the connection's peer.
    pub fn add_alias(&self, id: ConnectionId, alias: impl Into<String>) -> Result<()> {
        let alias = alias.into();
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(&id)
            .ok_or_else(|| Error::Connection(format!("unknown connection {}", id)))?;
        if !conn.aliases.iter().any(|a| a.eq_ignore_ascii_case(&alias)) {
            conn.aliases.push(alias);
        }
        Ok(())
    }

    /// Usable connection over `transport` from `local` whose peer is known as `alias`.
    pub fn find_by_alias(
        &self,
        transport: TransportType,
        local: SocketAddr,
        alias: &str,
    ) -> Option<(ConnectionId, SocketAddr)> {
        let connections = self.connections.lock();
        let found = connections
            .values()
            .find(|c| {
                c.transport == transport
                    && c.local == local
                    && c.is_usable()
                    && c.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias))
            })
            .map(|c| (c.id, c.remote));
        trace!(%transport, %local, alias, found = found.is_some(), "alias lookup");
        found
    }

    /// Usable connection over `transport` between `local` and `remote`.
    pub fn find_by_destination(
        &self,
        transport: TransportType,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Option<ConnectionId> {
        self.connections
            .lock()
            .values()
            .find(|c| c.transport == transport && c.local == local && c.remote == remote && c.is_usable())
            .map(|c| c.id)
    }

    pub fn attach_owner(&self, id: ConnectionId, owner: TransmitterId) -> Result<()> {
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(&id)
            .ok_or_else(|| Error::Connection(format!("unknown connection {}", id)))?;
        if !conn.is_usable() {
            return Err(Error::Connection(format!("connection {} is closing", id)));
        }
        conn.owners.insert(owner);
        trace!(connection = %id, %owner, "owner attached");
        Ok(())
    }

    /// Returns `true` if `owner` was attached.
    pub fn detach_owner(&self, id: ConnectionId, owner: TransmitterId) -> bool {
        let mut connections = self.connections.lock();
        let detached = connections
            .get_mut(&id)
            .is_some_and(|conn| conn.owners.remove(&owner));
        if detached {
            trace!(connection = %id, %owner, "owner detached");
        }
        detached
    }

    pub fn owners(&self, id: ConnectionId) -> Vec<TransmitterId> {
        self.connections
            .lock()
            .get(&id)
            .map(|c| c.owners.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.lock().get(&id).cloned()
    }

    pub fn is_usable(&self, id: ConnectionId) -> bool {
        self.connections.lock().get(&id).is_some_and(ConnectionInfo::is_usable)
    }

    /// Removes the connection from the table.
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let removed = self.connections.lock().remove(&id);
        if removed.is_some() {
            debug!(connection = %id, "connection removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_alias_lookup_is_case_insensitive_and_transport_bound() {
        let table = ConnectionTable::new();
        let local = addr("10.0.0.1:5060");
        let id = table.insert(TransportType::Tcp, local, addr("203.0.113.5:5060"));
        table.set_state(id, ConnectionState::Connected).unwrap();
        table.add_alias(id, "Proxy.Example.com").unwrap();

        assert_eq!(
            table.find_by_alias(TransportType::Tcp, local, "proxy.example.com"),
            Some((id, addr("203.0.113.5:5060")))
        );
        assert_eq!(table.find_by_alias(TransportType::Tls, local, "proxy.example.com"), None);
        assert_eq!(
            table.find_by_alias(TransportType::Tcp, addr("10.0.0.2:5060"), "proxy.example.com"),
            None
        );
    }

    #[test]
    fn test_closing_connection_is_not_found() {
        let table = ConnectionTable::new();
        let local = addr("10.0.0.1:5060");
        let remote = addr("203.0.113.5:5060");
        let id = table.insert(TransportType::Tcp, local, remote);
        assert_eq!(table.find_by_destination(TransportType::Tcp, local, remote), Some(id));
        table.set_state(id, ConnectionState::Closing).unwrap();
        assert_eq!(table.find_by_destination(TransportType::Tcp, local, remote), None);
        assert!(table.attach_owner(id, TransmitterId::new()).is_err());
    }

    #[test]
    fn test_owner_attach_detach() {
        let table = ConnectionTable::new();
        let id = table.insert(TransportType::Tls, addr("10.0.0.1:5061"), addr("203.0.113.5:5061"));
        let owner = TransmitterId::new();
        table.attach_owner(id, owner).unwrap();
        assert_eq!(table.owners(id), vec![owner]);
        assert!(table.detach_owner(id, owner));
        assert!(!table.detach_owner(id, owner));
        assert!(table.owners(id).is_empty());
    }
}
