//! Event types flowing through the queue and the sync protocol.
//!
//! Local mutations are expressed as events, not direct table writes. Queued
//! events travel to the server in flush batches; the server's canonical
//! echo comes back as [`ServerSyncEvent`]s via push acknowledgements, pull
//! responses and realtime envelopes.

use crate::Scope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of locally originated mutation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "inventory.upsert")]
    InventoryUpsert,
    #[serde(rename = "inventory.adjustment")]
    InventoryAdjustment,
    #[serde(rename = "inventory.delete")]
    InventoryDelete,
    #[serde(rename = "ticket.issue")]
    TicketIssue,
    #[serde(rename = "ticket.checkin")]
    TicketCheckin,
    #[serde(rename = "ticket.void")]
    TicketVoid,
}

impl EventType {
    /// Canonical dotted string form (`inventory.adjustment`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::InventoryUpsert => "inventory.upsert",
            EventType::InventoryAdjustment => "inventory.adjustment",
            EventType::InventoryDelete => "inventory.delete",
            EventType::TicketIssue => "ticket.issue",
            EventType::TicketCheckin => "ticket.checkin",
            EventType::TicketVoid => "ticket.void",
        }
    }

    /// Parse the dotted string form.
    pub fn parse(s: &str) -> Option<EventType> {
        match s {
            "inventory.upsert" => Some(EventType::InventoryUpsert),
            "inventory.adjustment" => Some(EventType::InventoryAdjustment),
            "inventory.delete" => Some(EventType::InventoryDelete),
            "ticket.issue" => Some(EventType::TicketIssue),
            "ticket.checkin" => Some(EventType::TicketCheckin),
            "ticket.void" => Some(EventType::TicketVoid),
            _ => None,
        }
    }

    /// The scope this event type belongs to, inferred from its prefix.
    pub fn scope(self) -> Scope {
        // The set is closed, so the prefix is always recognized.
        Scope::of_event_type(self.as_str()).unwrap_or(Scope::Inventory)
    }
}

/// Input for enqueuing a local mutation.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub event_type: EventType,
    pub payload: serde_json::Value,
    /// Scoping key for merge: repeated edits to the same logical change
    /// collapse into one queued event (e.g. `inventory:prop-sword-01`).
    pub dedupe_key: String,
}

impl EventInput {
    pub fn new(
        event_type: EventType,
        payload: serde_json::Value,
        dedupe_key: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            payload,
            dedupe_key: dedupe_key.into(),
        }
    }
}

/// A locally queued, not-yet-acknowledged mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEvent {
    /// Client-generated stable identity; survives re-enqueues.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: serde_json::Value,
    /// Defines FIFO order within the queue.
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub dedupe_key: String,
}

impl PendingEvent {
    /// The scope this event flushes under.
    pub fn scope(&self) -> Scope {
        self.event_type.scope()
    }
}

/// Canonical server-side event envelope, used both in pull responses and
/// realtime pushes. The `kind` is an open string: servers may emit types
/// outside the local closed set, and unrecognized ones are simply ignored
/// by delta inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSyncEvent {
    pub id: String,
    pub scope: Scope,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub server_seq: i64,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
}

/// What a row in the append-only audit trail describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Queue,
    Dequeue,
    Snapshot,
    Delta,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Queue => "queue",
            AuditAction::Dequeue => "dequeue",
            AuditAction::Snapshot => "snapshot",
            AuditAction::Delta => "delta",
        }
    }

    pub fn parse(s: &str) -> Option<AuditAction> {
        match s {
            "queue" => Some(AuditAction::Queue),
            "dequeue" => Some(AuditAction::Dequeue),
            "snapshot" => Some(AuditAction::Snapshot),
            "delta" => Some(AuditAction::Delta),
            _ => None,
        }
    }
}

/// Append-only diagnostic trail entry. Never mutated, never required for
/// correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: String,
    pub scope: Scope,
    pub action: AuditAction,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub metadata: serde_json::Value,
}
