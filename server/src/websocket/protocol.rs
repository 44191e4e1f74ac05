//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded. Server frames reuse the engine's
//! [`RealtimeEnvelope`] so a station feeds them straight into its
//! realtime bridge.

use greenroom_engine::{RealtimeEnvelope, Scope};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the set of scopes this connection wants frames for.
    Subscribe { scopes: Vec<Scope> },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection accepted; carries the server-assigned connection id.
    Welcome { conn_id: String },

    /// New events for a subscribed scope.
    Sync { envelope: RealtimeEnvelope },

    /// Acknowledges a subscription change.
    Subscribed { scopes: Vec<Scope> },

    /// Response to ping.
    Pong,

    /// Error message.
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_deserialization() {
        let json = r#"{"type": "subscribe", "scopes": ["inventory", "tickets"]}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Subscribe { scopes } => {
                assert_eq!(scopes, vec![Scope::Inventory, Scope::Tickets]);
            }
            _ => panic!("expected subscribe"),
        }

        let json = r#"{"type": "ping"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn server_message_serialization() {
        let json = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let json = serde_json::to_string(&ServerMessage::Sync {
            envelope: RealtimeEnvelope {
                scope: Scope::Tickets,
                server_seq: Some(7),
                events: vec![],
                delta: None,
            },
        })
        .unwrap();
        assert!(json.contains(r#""type":"sync""#));
        assert!(json.contains(r#""scope":"tickets""#));
        assert!(json.contains(r#""serverSeq":7"#));
    }
}
