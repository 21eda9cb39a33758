use std::sync::Arc;

use chat_core::types::ConnId;
use chat_protocol::OutboundFrame;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::{Result, SessionError};
use crate::types::Session;

/// Bounded capacity of each session's outbound queue. Generous enough that
/// ordinary streaming never fills it; a full queue only happens when the
/// socket writer has fallen behind the network.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Registry of every live connection's [`Session`]. One instance is shared
/// across the whole gateway; entries are added on connect and removed on
/// disconnect, so the registry's size tracks open sockets exactly.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Create and register a new session, returning it along with the
    /// receiving half of its outbound queue for the socket writer task.
    pub fn register(&self) -> (Arc<Session>, mpsc::Receiver<OutboundFrame>) {
        let conn_id = ConnId::new();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let session = Arc::new(Session::new(conn_id.clone(), tx));
        self.sessions.insert(conn_id, session.clone());
        (session, rx)
    }

    pub fn get(&self, conn_id: &ConnId) -> Result<Arc<Session>> {
        self.sessions
            .get(conn_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::NotFound {
                conn_id: conn_id.as_str().to_string(),
            })
    }

    /// Remove a session from the registry. Called once the connection's
    /// read/write tasks have both exited. Does not itself cancel any
    /// in-flight turn — callers should `begin_closing()` the session first.
    pub fn unregister(&self, conn_id: &ConnId) {
        self.sessions.remove(conn_id);
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_get_returns_same_session() {
        let registry = SessionRegistry::new();
        let (session, _rx) = registry.register();
        let fetched = registry.get(&session.conn_id).unwrap();
        assert_eq!(fetched.conn_id, session.conn_id);
        assert_eq!(registry.connected_count(), 1);
    }

    #[tokio::test]
    async fn unregister_removes_session() {
        let registry = SessionRegistry::new();
        let (session, _rx) = registry.register();
        registry.unregister(&session.conn_id);
        assert!(registry.get(&session.conn_id).is_err());
        assert_eq!(registry.connected_count(), 0);
    }

    #[tokio::test]
    async fn get_on_unknown_conn_id_fails() {
        let registry = SessionRegistry::new();
        assert!(registry.get(&ConnId::new()).is_err());
    }
}
