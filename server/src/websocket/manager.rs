//! WebSocket connection manager.
//!
//! Tracks active connections with their scope subscriptions and fans
//! realtime frames out to everyone listening on a scope.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use greenroom_engine::Scope;
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// The station behind it
    pub client_id: String,
    /// Scopes this connection wants frames for
    pub scopes: HashSet<Scope>,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection, subscribed to every scope until it says
    /// otherwise. Returns the connection ID.
    pub fn register(&self, client_id: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();
        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                client_id,
                scopes: Scope::ALL.into_iter().collect(),
                sender,
            },
        );
        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");
        conn_id
    }

    /// Unregister a connection.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            tracing::info!(conn_id = %conn_id, client_id = %conn.client_id, "WebSocket connection unregistered");
        }
    }

    /// Replace a connection's scope subscriptions.
    pub fn subscribe(&self, conn_id: &str, scopes: impl IntoIterator<Item = Scope>) {
        if let Some(mut conn) = self.connections.get_mut(conn_id) {
            conn.scopes = scopes.into_iter().collect();
        }
    }

    /// Send a frame to every connection subscribed to the scope, except the
    /// originator. Returns the number of recipients.
    pub fn broadcast_scope(
        &self,
        scope: Scope,
        except_client_id: Option<&str>,
        message: ServerMessage,
    ) -> usize {
        let mut sent = 0;
        for entry in self.connections.iter() {
            let conn = entry.value();
            if !conn.scopes.contains(&scope) {
                continue;
            }
            if except_client_id == Some(conn.client_id.as_str()) {
                continue;
            }
            if conn.sender.send(message.clone()).is_ok() {
                sent += 1;
            }
        }
        tracing::debug!(scope = %scope, recipients = sent, "broadcast frame");
        sent
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) {
        if let Some(conn) = self.connections.get(conn_id) {
            let _ = conn.sender.send(message);
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_unregister() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register("station-1".to_string(), tx);
        assert_eq!(manager.connection_count(), 1);

        manager.unregister(&conn_id);
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn broadcast_respects_scope_subscriptions_and_origin() {
        let manager = ConnectionManager::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        let _listener = manager.register("station-1".to_string(), tx1);
        let ticket_only = manager.register("station-2".to_string(), tx2);
        let _origin = manager.register("station-3".to_string(), tx3);

        manager.subscribe(&ticket_only, [Scope::Tickets]);

        let sent = manager.broadcast_scope(Scope::Inventory, Some("station-3"), ServerMessage::Pong);
        assert_eq!(sent, 1);

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_err());
    }
}
