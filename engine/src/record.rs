//! Typed views over the synchronized records.
//!
//! The engine itself treats records as opaque JSON keyed by `id`; these
//! types exist for the read models the UI layer consumes. Their fields match
//! the server's canonical record shapes.

use crate::{Result, Scope, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inventory item (props, costumes, set pieces) tracked per production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItemRecord {
    pub id: String,
    pub sku: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// The production/event this item is reserved for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Admission status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TicketStatus {
    Issued,
    CheckedIn,
    Void,
}

/// A ticket for a performance, scanned at the door.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRecord {
    pub id: String,
    pub code: String,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_name: Option<String>,
    /// The performance this ticket admits to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Primary key of an opaque record, if present.
pub fn record_id(value: &serde_json::Value) -> Option<&str> {
    value.get("id").and_then(serde_json::Value::as_str)
}

/// Whether a JSON value carries the minimum identifying fields for a
/// record of the given scope (`id` plus `sku`/`code`).
pub fn is_record_shape(scope: Scope, value: &serde_json::Value) -> bool {
    value.is_object()
        && record_id(value).is_some()
        && value
            .get(scope.identity_field())
            .map(|v| v.is_string())
            .unwrap_or(false)
}

/// Decode an opaque record into its typed form, naming the scope on failure.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    scope: Scope,
    raw: &str,
) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| SyncError::Corrupt(format!("{scope} record: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_shape_check() {
        let item = json!({"id": "item-1", "sku": "PROP-SWORD", "quantity": 3});
        assert!(is_record_shape(Scope::Inventory, &item));
        assert!(!is_record_shape(Scope::Tickets, &item));

        let ticket = json!({"id": "t-1", "code": "GALA-0042", "status": "issued"});
        assert!(is_record_shape(Scope::Tickets, &ticket));

        assert!(!is_record_shape(Scope::Inventory, &json!({"id": "x"})));
        assert!(!is_record_shape(Scope::Inventory, &json!("not-an-object")));
        assert!(!is_record_shape(Scope::Inventory, &json!({"sku": "no-id"})));
    }

    #[test]
    fn item_roundtrip() {
        let item = InventoryItemRecord {
            id: "item-1".into(),
            sku: "PROP-SWORD".into(),
            name: Some("Stage sword".into()),
            quantity: 3,
            location: Some("props room B".into()),
            event_id: None,
            updated_at: None,
        };

        let json = serde_json::to_string(&item).unwrap();
        let parsed: InventoryItemRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn ticket_status_wire_form() {
        let json = serde_json::to_string(&TicketStatus::CheckedIn).unwrap();
        assert_eq!(json, r#""checkedIn""#);
    }
}
