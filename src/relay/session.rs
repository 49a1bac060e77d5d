// Registry of connected sessions

use crate::relay::error::RelayError;
use crate::relay::wire::Message;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Identifier generated for every accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used in user listings
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of queueing a frame for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The session's outbound queue is full; the frame was dropped
    Dropped,
    /// The connection is gone
    Closed,
}

/// A connected client, authenticated or not
pub struct Session {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub username: Option<String>,
    pub connected_at: SystemTime,
    seq: u64,
    outbound: mpsc::Sender<Message>,
    closer: Option<oneshot::Sender<()>>,
}

impl Session {
    /// Queue a frame for this session without waiting
    pub fn send(&self, message: Message) -> Delivery {
        match self.outbound.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue full for session {}, dropping frame", self.id);
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    /// Tell the connection task to stop reading and flush what is queued
    fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            let _ = closer.send(());
        }
    }
}

/// Bounded table of sessions. Owned by the hub task; all mutation goes through it.
pub struct SessionTable {
    sessions: HashMap<SessionId, Session>,
    capacity: usize,
    next_seq: u64,
}

impl SessionTable {
    /// Create an empty table holding at most `capacity` sessions
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// Register a freshly accepted connection
    pub fn insert(
        &mut self,
        peer: SocketAddr,
        outbound: mpsc::Sender<Message>,
        closer: oneshot::Sender<()>,
    ) -> Result<SessionId, RelayError> {
        if self.sessions.len() >= self.capacity {
            return Err(RelayError::ServerFull {
                capacity: self.capacity,
            });
        }

        let id = SessionId::new();
        self.next_seq += 1;
        self.sessions.insert(
            id,
            Session {
                id,
                peer,
                username: None,
                connected_at: SystemTime::now(),
                seq: self.next_seq,
                outbound,
                closer: Some(closer),
            },
        );

        tracing::info!("Session {} connected from {}", id, peer);
        Ok(id)
    }

    /// Bind a username to a session. Names must be unique among active sessions.
    pub fn bind(&mut self, id: SessionId, username: &str) -> Result<(), RelayError> {
        if let Some(owner) = self.find_by_username(username) {
            if owner != id {
                return Err(RelayError::DuplicateLogin(username.to_string()));
            }
        }

        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(RelayError::UnknownSession(id))?;
        session.username = Some(username.to_string());
        Ok(())
    }

    /// Username bound to a session, if it has logged in
    pub fn username_of(&self, id: SessionId) -> Option<&str> {
        self.sessions.get(&id)?.username.as_deref()
    }

    /// First session, in connection order, bound to `name`
    pub fn find_by_username(&self, name: &str) -> Option<SessionId> {
        self.active()
            .find(|s| s.username.as_deref() == Some(name))
            .map(|s| s.id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Free the entry and close its connection
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let mut session = self.sessions.remove(&id)?;
        session.close();
        tracing::info!(
            "Session {} ({}) removed",
            id,
            session.username.as_deref().unwrap_or("anonymous")
        );
        Some(session)
    }

    /// Active sessions in connection order
    pub fn active(&self) -> impl Iterator<Item = &Session> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by_key(|s| s.seq);
        sessions.into_iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a frame for one session. A closed connection is removed.
    pub fn send_to(&mut self, id: SessionId, message: Message) -> Delivery {
        let delivery = match self.sessions.get(&id) {
            Some(session) => session.send(message),
            None => Delivery::Closed,
        };
        if delivery == Delivery::Closed {
            self.remove(id);
        }
        delivery
    }

    /// Queue a frame for every session except `except`. Returns how many were reached.
    pub fn broadcast(&mut self, except: Option<SessionId>, message: &Message) -> usize {
        let mut reached = 0;
        let mut failed = Vec::new();

        for session in self.active() {
            if Some(session.id) == except {
                continue;
            }
            match session.send(message.clone()) {
                Delivery::Queued => reached += 1,
                Delivery::Dropped => {}
                Delivery::Closed => failed.push(session.id),
            }
        }

        for id in failed {
            tracing::info!("Removed failed session {}", id);
            self.remove(id);
        }

        reached
    }

    /// Listing of authenticated users, one per line
    pub fn user_list(&self) -> String {
        let list: String = self
            .active()
            .filter_map(|s| {
                s.username
                    .as_ref()
                    .map(|name| format!("- {} (session {})\n", name, s.id.short()))
            })
            .collect();

        if list.is_empty() {
            "(no users online)\n".to_string()
        } else {
            list
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::wire::MessageKind;

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn add(
        table: &mut SessionTable,
    ) -> (SessionId, mpsc::Receiver<Message>, oneshot::Receiver<()>) {
        let (tx, rx) = mpsc::channel(8);
        let (close_tx, close_rx) = oneshot::channel();
        let id = table.insert(peer(), tx, close_tx).unwrap();
        (id, rx, close_rx)
    }

    #[test]
    fn test_insert_respects_capacity() {
        let mut table = SessionTable::new(2);
        let _a = add(&mut table);
        let _b = add(&mut table);

        let (tx, _rx) = mpsc::channel(1);
        let (close_tx, _close_rx) = oneshot::channel();
        let err = table.insert(peer(), tx, close_tx).unwrap_err();
        assert!(matches!(err, RelayError::ServerFull { capacity: 2 }));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_bind_rejects_duplicate_names() {
        let mut table = SessionTable::new(4);
        let (a, _, _) = add(&mut table);
        let (b, _, _) = add(&mut table);

        table.bind(a, "alice").unwrap();
        assert!(matches!(
            table.bind(b, "alice"),
            Err(RelayError::DuplicateLogin(_))
        ));
        // Rebinding the same session is fine
        table.bind(a, "alice").unwrap();

        assert_eq!(table.username_of(a), Some("alice"));
        assert_eq!(table.username_of(b), None);
        assert_eq!(table.find_by_username("alice"), Some(a));
    }

    #[test]
    fn test_remove_frees_name_and_closes() {
        let mut table = SessionTable::new(4);
        let (a, _rx, mut close_rx) = add(&mut table);
        table.bind(a, "alice").unwrap();

        assert!(table.remove(a).is_some());
        assert_eq!(table.find_by_username("alice"), None);
        assert!(close_rx.try_recv().is_ok());
        assert!(table.remove(a).is_none());

        // The name is free again
        let (b, _, _) = add(&mut table);
        table.bind(b, "alice").unwrap();
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let mut table = SessionTable::new(4);
        let (a, mut rx_a, _ca) = add(&mut table);
        let (_b, mut rx_b, _cb) = add(&mut table);
        let (_c, mut rx_c, _cc) = add(&mut table);

        let msg = Message::text(MessageKind::Chat, "alice", "hello");
        assert_eq!(table.broadcast(Some(a), &msg), 2);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), msg);
        assert_eq!(rx_c.try_recv().unwrap(), msg);
    }

    #[test]
    fn test_closed_receivers_are_pruned() {
        let mut table = SessionTable::new(4);
        let (_a, rx_a, _ca) = add(&mut table);
        let (b, _rx_b, _cb) = add(&mut table);
        drop(rx_a);

        let msg = Message::notice(MessageKind::Chat, "ping");
        assert_eq!(table.broadcast(Some(b), &msg), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_user_list_in_connection_order() {
        let mut table = SessionTable::new(4);
        assert_eq!(table.user_list(), "(no users online)\n");

        let (a, _, _) = add(&mut table);
        let (_anon, _, _) = add(&mut table);
        let (c, _, _) = add(&mut table);
        table.bind(c, "carol").unwrap();
        table.bind(a, "alice").unwrap();

        let list = table.user_list();
        let lines: Vec<&str> = list.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("- alice (session "));
        assert!(lines[1].starts_with("- carol (session "));
    }
}
