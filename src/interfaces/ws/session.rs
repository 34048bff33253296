//! Live station sockets
//!
//! Each connected station owns an outgoing channel drained by its socket
//! task. The registry is the router's network hook: writing a frame to a
//! station means pushing it onto that channel.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::ports::NetworkConnection;
use crate::domain::{NetworkError, OcppVersion, StationIdentifier};

/// Close code sent to a socket replaced by a newer connection.
pub const CLOSE_REPLACED: u16 = 4000;
/// Close code sent to sockets when the gateway shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code sent when keepalive gives up on a peer.
pub const CLOSE_NO_PONG: u16 = 1011;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Ping,
    Close { code: u16, reason: String },
}

#[derive(Debug)]
pub struct Session {
    pub connection_id: String,
    pub protocol: OcppVersion,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<Outgoing>,
}

impl Session {
    pub fn new(
        connection_id: impl Into<String>,
        protocol: OcppVersion,
        sender: mpsc::UnboundedSender<Outgoing>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            protocol,
            connected_at: Utc::now(),
            sender,
        }
    }

    fn send(&self, message: Outgoing) -> bool {
        self.sender.send(message).is_ok()
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<StationIdentifier, Session>,
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket, evicting any previous socket of the same station.
    /// Returns the connection id of the evicted socket.
    pub fn register(&self, identifier: &StationIdentifier, session: Session) -> Option<String> {
        let connection_id = session.connection_id.clone();
        let previous = self.sessions.insert(identifier.clone(), session);
        self.update_gauge();
        info!(station_id = %identifier, %connection_id, "Session registered");

        previous.map(|old| {
            info!(station_id = %identifier, evicted = %old.connection_id, "Replacing existing connection");
            old.send(Outgoing::Close {
                code: CLOSE_REPLACED,
                reason: "Replaced by new connection".into(),
            });
            old.connection_id
        })
    }

    /// Remove the session only if it still belongs to `connection_id`, so an
    /// evicted socket never unregisters its replacement.
    pub fn unregister(&self, identifier: &StationIdentifier, connection_id: &str) -> bool {
        let removed = self
            .sessions
            .remove_if(identifier, |_, s| s.connection_id == connection_id)
            .is_some();
        if removed {
            self.update_gauge();
            info!(station_id = %identifier, %connection_id, "Session unregistered");
        }
        removed
    }

    pub fn is_current(&self, identifier: &StationIdentifier, connection_id: &str) -> bool {
        self.sessions
            .get(identifier)
            .is_some_and(|s| s.connection_id == connection_id)
    }

    pub fn is_connected(&self, identifier: &StationIdentifier) -> bool {
        self.sessions.contains_key(identifier)
    }

    pub fn protocol(&self, identifier: &StationIdentifier) -> Option<OcppVersion> {
        self.sessions.get(identifier).map(|s| s.protocol)
    }

    pub fn connected(&self) -> Vec<StationIdentifier> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Ask every socket to close. Their tasks unregister themselves.
    pub fn close_all(&self, reason: &str) {
        for session in self.sessions.iter() {
            session.send(Outgoing::Close {
                code: CLOSE_GOING_AWAY,
                reason: reason.to_string(),
            });
        }
    }

    fn update_gauge(&self) {
        metrics::gauge!("ocpp_connected_stations").set(self.sessions.len() as f64);
    }
}

#[async_trait]
impl NetworkConnection for SessionRegistry {
    async fn send_message(
        &self,
        identifier: &StationIdentifier,
        message: String,
    ) -> Result<(), NetworkError> {
        let session = self
            .sessions
            .get(identifier)
            .ok_or_else(|| NetworkError::NotConnected(identifier.clone()))?;
        debug!(station_id = %identifier, message = %message, "->");
        if session.send(Outgoing::Text(message)) {
            Ok(())
        } else {
            Err(NetworkError::SendFailed {
                identifier: identifier.clone(),
                reason: "socket task has stopped".into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> StationIdentifier {
        StationIdentifier::new(1, "CS-001")
    }

    #[tokio::test]
    async fn frames_reach_the_socket_channel() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(&station(), Session::new("c-1", OcppVersion::V16, tx));

        registry.send_message(&station(), "[2]".into()).await.unwrap();
        assert_eq!(rx.recv().await, Some(Outgoing::Text("[2]".into())));

        let err = registry
            .send_message(&StationIdentifier::new(1, "other"), "x".into())
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::NotConnected(_)));
    }

    #[tokio::test]
    async fn second_connection_evicts_first() {
        let registry = SessionRegistry::new();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, _new_rx) = mpsc::unbounded_channel();

        assert_eq!(registry.register(&station(), Session::new("c-1", OcppVersion::V16, old_tx)), None);
        let evicted = registry.register(&station(), Session::new("c-2", OcppVersion::V201, new_tx));
        assert_eq!(evicted.as_deref(), Some("c-1"));
        assert!(matches!(old_rx.recv().await, Some(Outgoing::Close { code: CLOSE_REPLACED, .. })));

        // the evicted socket's teardown must not remove the new one
        assert!(!registry.unregister(&station(), "c-1"));
        assert!(registry.is_current(&station(), "c-2"));
        assert_eq!(registry.protocol(&station()), Some(OcppVersion::V201));
        assert!(registry.unregister(&station(), "c-2"));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn closed_channel_is_a_send_failure() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(&station(), Session::new("c-1", OcppVersion::V16, tx));
        drop(rx);
        let err = registry.send_message(&station(), "x".into()).await.unwrap_err();
        assert!(matches!(err, NetworkError::SendFailed { .. }));
    }
}
