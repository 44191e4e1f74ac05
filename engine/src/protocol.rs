//! Wire types for the sync protocol.
//!
//! All messages are JSON-encoded and use camelCase field names. The same
//! shapes are produced by the HTTP endpoints and the realtime channel.

use crate::apply::Delta;
use crate::event::{PendingEvent, ServerSyncEvent};
use crate::Scope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of the paginated initial dataset endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapPage {
    /// Opaque records for this scope.
    pub records: Vec<serde_json::Value>,
    /// Server sequence the page set was captured at.
    pub server_seq: i64,
    pub captured_at: DateTime<Utc>,
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Request body for the push endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub scope: Scope,
    /// Stable per-installation client id.
    pub client_id: String,
    /// Fresh per attempt; lets the server detect replayed batches.
    pub client_mutation_id: String,
    pub events: Vec<PendingEvent>,
    /// Watermark the client believes is current; used for staleness checks.
    pub last_known_server_seq: i64,
}

/// Batch-level outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    /// The batch was applied (some events may still be `skipped`).
    Applied,
    /// This `clientMutationId` was already processed - a safe retry of a
    /// prior attempt; treated like `applied` for watermark purposes.
    Duplicate,
    /// The client's watermark is behind the server's truth; pull first.
    Stale,
}

/// Receipt for a processed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationReceipt {
    pub client_mutation_id: String,
    pub processed_at: DateTime<Utc>,
}

/// Response body of the push endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub status: PushStatus,
    pub server_seq: i64,
    /// Canonical server events for the accepted batch.
    #[serde(default)]
    pub events: Vec<ServerSyncEvent>,
    /// Ids of events dropped as already-known duplicates (not an error).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation: Option<MutationReceipt>,
}

/// Request body for the pull endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub scope: Scope,
    /// Return events with `serverSeq` greater than this.
    pub last_server_seq: i64,
}

/// Response body of the pull endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub events: Vec<ServerSyncEvent>,
    pub server_seq: i64,
    pub has_more: bool,
}

/// Envelope pushed over the realtime channel; shaped like a pull response,
/// optionally carrying a server-authoritative delta instead of raw events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEnvelope {
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_seq: Option<i64>,
    #[serde(default)]
    pub events: Vec<ServerSyncEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_status_wire_form() {
        assert_eq!(
            serde_json::to_string(&PushStatus::Applied).unwrap(),
            r#""applied""#
        );
        let parsed: PushStatus = serde_json::from_str(r#""stale""#).unwrap();
        assert_eq!(parsed, PushStatus::Stale);
    }

    #[test]
    fn push_response_defaults() {
        let json = json!({"status": "duplicate", "serverSeq": 12});
        let resp: PushResponse = serde_json::from_value(json).unwrap();
        assert_eq!(resp.status, PushStatus::Duplicate);
        assert!(resp.events.is_empty());
        assert!(resp.skipped.is_empty());
        assert!(resp.mutation.is_none());
    }

    #[test]
    fn realtime_envelope_minimal() {
        let json = json!({"scope": "tickets"});
        let env: RealtimeEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(env.scope, Scope::Tickets);
        assert!(env.server_seq.is_none());
        assert!(env.events.is_empty());
        assert!(env.delta.is_none());
    }

    #[test]
    fn push_request_camel_case() {
        let request = PushRequest {
            scope: Scope::Inventory,
            client_id: "station-1".into(),
            client_mutation_id: "mut-1".into(),
            events: vec![],
            last_known_server_seq: 42,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""lastKnownServerSeq":42"#));
        assert!(json.contains(r#""clientMutationId":"mut-1""#));
    }
}
