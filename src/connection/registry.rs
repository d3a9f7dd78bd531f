//! Live Connection Registry
//!
//! Insertion-ordered set of connections keyed by [`ConnectionId`]. Ids are
//! handed out monotonically, so key order is insertion order.
//!
//! Traversal goes through a [`Cursor`], which holds no borrow of the registry
//! between steps. Entries may be removed (including the one just visited) or
//! inserted while a traversal is in progress: nothing is skipped or visited
//! twice, and connections inserted after the cursor was taken are not visited.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::{Connection, ConnectionId};

/// Position of an in-progress traversal
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    after: Option<ConnectionId>,
    limit: ConnectionId,
}

/// Owns every live connection
#[derive(Debug)]
pub struct Registry {
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: usize,
}

impl Registry {
    /// Create an empty registry whose ids start at `first_id`
    pub fn new(first_id: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_id: first_id,
        }
    }

    /// Allocate an id, build the connection with it and insert it at the tail
    pub fn insert_with<F>(&mut self, build: F) -> ConnectionId
    where
        F: FnOnce(ConnectionId) -> Connection,
    {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        let connection = build(id);
        debug_assert_eq!(connection.id(), id);
        self.connections.insert(id, connection);
        id
    }

    /// Remove a connection, handing ownership back to the caller.
    /// Returns `None` if it was already removed.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids in insertion order
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Start a full traversal covering every connection present right now
    pub fn cursor(&self) -> Cursor {
        Cursor {
            after: None,
            limit: ConnectionId(self.next_id),
        }
    }

    /// Step the traversal to the next live connection
    pub fn advance(&mut self, cursor: &mut Cursor) -> Option<&mut Connection> {
        let lower = match cursor.after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let (id, connection) = self
            .connections
            .range_mut((lower, Bound::Excluded(cursor.limit)))
            .next()?;
        cursor.after = Some(*id);
        Some(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::connection_pair;

    fn registry_with(n: usize) -> (Registry, Vec<ConnectionId>, Vec<std::net::TcpStream>) {
        let mut registry = Registry::new(100);
        let mut ids = Vec::new();
        let mut clients = Vec::new();
        for _ in 0..n {
            let id = registry.insert_with(|id| {
                let (conn, client) = connection_pair(id.as_usize());
                clients.push(client);
                conn
            });
            ids.push(id);
        }
        (registry, ids, clients)
    }

    fn visit_all(registry: &mut Registry) -> Vec<ConnectionId> {
        let mut cursor = registry.cursor();
        let mut seen = Vec::new();
        while let Some(conn) = registry.advance(&mut cursor) {
            seen.push(conn.id());
        }
        seen
    }

    #[test]
    fn test_insertion_order_and_unique_ids() {
        let (mut registry, ids, _clients) = registry_with(4);
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.ids(), ids);
        assert_eq!(visit_all(&mut registry), ids);

        let mut sorted = ids.clone();
        sorted.dedup();
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn test_remove_is_exactly_once() {
        let (mut registry, ids, _clients) = registry_with(2);
        assert!(registry.remove(ids[0]).is_some());
        assert!(registry.remove(ids[0]).is_none());
        assert!(!registry.contains(ids[0]));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_current_during_traversal() {
        let (mut registry, ids, _clients) = registry_with(5);
        let mut cursor = registry.cursor();
        let mut seen = Vec::new();
        while let Some(conn) = registry.advance(&mut cursor) {
            let id = conn.id();
            seen.push(id);
            if id == ids[1] || id == ids[2] {
                registry.remove(id);
            }
        }
        assert_eq!(seen, ids);
        assert_eq!(registry.ids(), vec![ids[0], ids[3], ids[4]]);
    }

    #[test]
    fn test_remove_ahead_during_traversal() {
        let (mut registry, ids, _clients) = registry_with(4);
        let mut cursor = registry.cursor();
        let mut seen = Vec::new();
        while let Some(conn) = registry.advance(&mut cursor) {
            let id = conn.id();
            seen.push(id);
            if id == ids[0] {
                registry.remove(ids[2]);
            }
        }
        assert_eq!(seen, vec![ids[0], ids[1], ids[3]]);
    }

    #[test]
    fn test_insert_during_traversal_is_not_visited() {
        let (mut registry, ids, mut clients) = registry_with(2);
        let mut cursor = registry.cursor();
        let mut seen = Vec::new();
        let mut late = None;
        while let Some(conn) = registry.advance(&mut cursor) {
            seen.push(conn.id());
            if late.is_none() {
                late = Some(registry.insert_with(|id| {
                    let (conn, client) = connection_pair(id.as_usize());
                    clients.push(client);
                    conn
                }));
            }
        }
        assert_eq!(seen, ids);
        let late = late.unwrap();
        assert!(registry.contains(late));
        assert_eq!(visit_all(&mut registry), vec![ids[0], ids[1], late]);
    }

    #[test]
    fn test_empty_registry_traversal() {
        let mut registry = Registry::new(1);
        assert!(registry.is_empty());
        assert!(visit_all(&mut registry).is_empty());
    }
}
