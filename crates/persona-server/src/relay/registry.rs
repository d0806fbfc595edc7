//! Session membership: which connections are joined to which character.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use persona_core::{CharacterId, ConnectionId};

use super::connection::Connection;
use super::protocol::Outbound;

/// Registry of live connections and the sessions they have joined.
///
/// A connection is a member of at most one session. A session key exists only
/// while at least one connection is joined to it.
pub struct SessionRegistry {
    sessions: DashMap<CharacterId, HashMap<ConnectionId, Arc<Connection>>>,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
}

impl SessionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            connections: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Create a connection with its outbound queue. It joins no session yet.
    pub fn register(&self) -> (Arc<Connection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let conn = Arc::new(Connection::new(ConnectionId::new(), tx));
        self.connections.insert(conn.id.clone(), Arc::clone(&conn));
        (conn, rx)
    }

    /// Join `key`, leaving any previously joined session first.
    pub fn join(&self, conn: &Arc<Connection>, key: CharacterId) {
        let mut slot = conn.session_slot();
        if !conn.is_open() {
            return;
        }
        if let Some(previous) = slot.take() {
            if previous == key {
                *slot = Some(key);
                return;
            }
            self.detach(previous, &conn.id);
            debug!(client_id = %conn.id, from = %previous, to = %key, "moving connection between sessions");
        }
        self.sessions
            .entry(key)
            .or_default()
            .insert(conn.id.clone(), Arc::clone(conn));
        *slot = Some(key);
        info!(client_id = %conn.id, session = %key, "joined session");
    }

    /// Leave the joined session, if any.
    pub fn leave(&self, conn: &Connection) {
        let mut slot = conn.session_slot();
        if let Some(key) = slot.take() {
            self.detach(key, &conn.id);
        }
    }

    /// Forget a connection entirely: close it and drop its membership.
    pub fn unregister(&self, id: &ConnectionId) {
        let Some((_, conn)) = self.connections.remove(id) else {
            return;
        };
        conn.close();
        self.leave(&conn);
        debug!(client_id = %id, "connection unregistered");
    }

    fn detach(&self, key: CharacterId, id: &ConnectionId) {
        if let Some(mut members) = self.sessions.get_mut(&key) {
            members.remove(id);
        }
        if self.sessions.remove_if(&key, |_, members| members.is_empty()).is_some() {
            debug!(session = %key, "session pruned");
        }
    }

    /// Send `frame` to one connection.
    pub fn send_to(&self, conn: &Connection, frame: &Outbound) -> bool {
        match frame.encode() {
            Ok(json) => conn.send(json),
            Err(e) => {
                error!(client_id = %conn.id, frame = frame.kind(), error = %e, "failed to encode frame");
                false
            }
        }
    }

    /// Send `frame` to every open member of `key`. Returns how many accepted it.
    ///
    /// The member set is copied before delivery, so joins and leaves that race
    /// with a broadcast never see a half-updated set.
    pub fn broadcast(&self, key: CharacterId, frame: &Outbound) -> usize {
        let members: Vec<Arc<Connection>> = match self.sessions.get(&key) {
            Some(members) => members.values().cloned().collect(),
            None => return 0,
        };
        let json = match frame.encode() {
            Ok(json) => json,
            Err(e) => {
                error!(session = %key, frame = frame.kind(), error = %e, "failed to encode broadcast");
                return 0;
            }
        };

        let delivered = members
            .iter()
            .filter(|conn| conn.is_open())
            .filter(|conn| conn.send(Arc::clone(&json)))
            .count();
        debug!(session = %key, frame = frame.kind(), members = members.len(), delivered, "broadcast");
        delivered
    }

    /// Ids of the connections joined to `key`.
    pub fn members(&self, key: CharacterId) -> Vec<ConnectionId> {
        self.sessions
            .get(&key)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Tell every connection to close. Socket tasks unregister themselves.
    pub fn close_all(&self) -> usize {
        let conns: Vec<Arc<Connection>> = self.connections.iter().map(|c| Arc::clone(c.value())).collect();
        for conn in &conns {
            conn.close();
        }
        if !conns.is_empty() {
            info!(count = conns.len(), "closing all connections");
        }
        conns.len()
    }
}
