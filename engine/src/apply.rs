//! Snapshot and delta application - the single convergence path.
//!
//! Bootstrap snapshots, flush acknowledgements, pull responses and realtime
//! envelopes all funnel through [`Applier`], so every way of hearing from
//! the server moves local state through identical code. The watermark only
//! ever advances (monotonic `max` rule), which makes redundant or reordered
//! deliveries safe to apply.

use crate::event::{AuditAction, ServerSyncEvent};
use crate::record;
use crate::store::{self, LocalStore};
use crate::{Result, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A full-replace payload: applying it clears and rewrites the entire local
/// table for the scope. Used only at bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub scope: Scope,
    pub records: Vec<serde_json::Value>,
    pub server_seq: i64,
    pub captured_at: DateTime<Utc>,
}

/// An incremental payload: upserts by primary key, removes by id, leaves
/// every other row untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub scope: Scope,
    pub server_seq: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upserts: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletes: Vec<String>,
}

impl Delta {
    pub fn empty(scope: Scope, server_seq: i64) -> Self {
        Self {
            scope,
            server_seq,
            upserts: Vec::new(),
            deletes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Applies snapshots and deltas to the local store.
#[derive(Debug, Clone)]
pub struct Applier {
    store: LocalStore,
}

impl Applier {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Replace the scope's table wholesale and set the snapshot baseline.
    pub async fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<usize> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        store::clear_records(&mut tx, snapshot.scope).await?;

        let mut written = 0usize;
        for value in &snapshot.records {
            if store::upsert_record(&mut tx, snapshot.scope, value, now).await? {
                written += 1;
            } else {
                tracing::warn!(scope = %snapshot.scope, "snapshot record without id skipped");
            }
        }

        let watermark = store::advance_watermark(
            &mut tx,
            snapshot.scope,
            snapshot.server_seq,
            Some(snapshot.captured_at),
            now,
        )
        .await?;

        store::insert_audit(
            &mut tx,
            snapshot.scope,
            AuditAction::Snapshot,
            &format!("snapshot of {written} record(s) at seq {}", snapshot.server_seq),
            json!({"records": written, "serverSeq": snapshot.server_seq}),
            now,
        )
        .await?;

        tx.commit().await?;
        tracing::info!(
            scope = %snapshot.scope,
            records = written,
            watermark,
            "snapshot applied"
        );
        Ok(written)
    }

    /// Apply an incremental delta. Returns the number of net changes.
    ///
    /// A delta carrying nothing newer is a no-op except that
    /// `sync_state.updated_at` is touched to record "checked, nothing new".
    pub async fn apply_delta(&self, delta: &Delta) -> Result<usize> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        if delta.is_empty() {
            let current = store::read_watermark(&mut tx, delta.scope).await?;
            if delta.server_seq <= current {
                store::touch_sync_state(&mut tx, delta.scope, now).await?;
                tx.commit().await?;
                return Ok(0);
            }
        }

        let mut changed = 0usize;
        for value in &delta.upserts {
            if store::upsert_record(&mut tx, delta.scope, value, now).await? {
                changed += 1;
            } else {
                tracing::warn!(scope = %delta.scope, "delta upsert without id skipped");
            }
        }
        for id in &delta.deletes {
            if store::delete_record(&mut tx, delta.scope, id).await? {
                changed += 1;
            }
        }

        store::advance_watermark(&mut tx, delta.scope, delta.server_seq, None, now).await?;

        store::insert_audit(
            &mut tx,
            delta.scope,
            AuditAction::Delta,
            &format!(
                "delta at seq {}: {} upsert(s), {} delete(s)",
                delta.server_seq,
                delta.upserts.len(),
                delta.deletes.len()
            ),
            json!({
                "serverSeq": delta.server_seq,
                "upserts": delta.upserts.len(),
                "deletes": delta.deletes.len(),
            }),
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(changed)
    }

    /// Derive a delta from canonical server events.
    ///
    /// Events of another scope, and events matching neither the upsert nor
    /// the delete rule, are ignored: this engine converges state, it is not
    /// a general event-log consumer.
    pub fn infer_delta(&self, scope: Scope, events: &[ServerSyncEvent], server_seq: i64) -> Delta {
        infer_delta(scope, events, server_seq)
    }
}

/// Build a delta from events using the ordered extraction rules. Removal
/// is checked first so a removing event whose payload still looks like a
/// full record does not get resurrected as an upsert.
pub fn infer_delta(scope: Scope, events: &[ServerSyncEvent], server_seq: i64) -> Delta {
    let mut delta = Delta::empty(scope, server_seq);
    for event in events {
        if event.scope != scope {
            continue;
        }
        if is_removal(scope, event) {
            if let Some(id) = removal_target(scope, event) {
                delta.deletes.push(id.to_owned());
            } else {
                tracing::trace!(kind = %event.kind, "removal without a target id, ignored");
            }
        } else if let Some(value) = extract_upsert(scope, event) {
            delta.upserts.push(value.clone());
        } else {
            tracing::trace!(kind = %event.kind, "event carries no record shape, ignored");
        }
    }
    delta
}

/// Ordered payload candidates: the conventional `record` key first, then
/// the scope alias (`item`/`ticket`), then the payload itself.
fn candidates<'e>(
    scope: Scope,
    event: &'e ServerSyncEvent,
) -> impl Iterator<Item = &'e serde_json::Value> {
    [
        event.payload.get("record"),
        event.payload.get(scope.record_alias()),
        Some(&event.payload),
    ]
    .into_iter()
    .flatten()
}

/// First structurally valid record among the candidates.
fn extract_upsert<'e>(scope: Scope, event: &'e ServerSyncEvent) -> Option<&'e serde_json::Value> {
    candidates(scope, event).find(|value| record::is_record_shape(scope, value))
}

/// A removal is signalled by a removing event type or an explicit
/// `deleted` flag on the payload or a nested candidate.
fn is_removal(scope: Scope, event: &ServerSyncEvent) -> bool {
    let removing_kind = matches!(
        event.kind.rsplit('.').next(),
        Some("delete" | "deleted" | "void" | "remove" | "removed")
    );
    removing_kind
        || candidates(scope, event)
            .any(|value| value.get("deleted").and_then(serde_json::Value::as_bool) == Some(true))
}

/// The id to remove: `id` or `recordId`, on the payload or a candidate.
fn removal_target<'e>(scope: Scope, event: &'e ServerSyncEvent) -> Option<&'e str> {
    candidates(scope, event).find_map(|value| {
        record::record_id(value).or_else(|| value.get("recordId").and_then(serde_json::Value::as_str))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use serde_json::json;

    fn server_event(scope: Scope, kind: &str, seq: i64, payload: serde_json::Value) -> ServerSyncEvent {
        ServerSyncEvent {
            id: format!("srv-{seq}"),
            scope,
            kind: kind.to_string(),
            payload,
            occurred_at: Utc::now(),
            server_seq: seq,
            client_id: "station-1".into(),
            dedupe_key: None,
        }
    }

    async fn test_applier() -> (LocalStore, Applier) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let applier = Applier::new(store.clone());
        (store, applier)
    }

    fn item(id: &str, quantity: i64) -> serde_json::Value {
        json!({"id": id, "sku": format!("SKU-{id}"), "quantity": quantity})
    }

    #[tokio::test]
    async fn snapshot_replaces_everything() {
        let (store, applier) = test_applier().await;

        applier
            .apply_snapshot(&Snapshot {
                scope: Scope::Inventory,
                records: vec![item("a", 1), item("b", 2)],
                server_seq: 10,
                captured_at: Utc::now(),
            })
            .await
            .unwrap();

        applier
            .apply_snapshot(&Snapshot {
                scope: Scope::Inventory,
                records: vec![item("c", 3)],
                server_seq: 20,
                captured_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(store.record_count(Scope::Inventory).await.unwrap(), 1);
        assert!(store.record(Scope::Inventory, "a").await.unwrap().is_none());
        assert!(store.record(Scope::Inventory, "c").await.unwrap().is_some());
        assert_eq!(store.last_server_seq(Scope::Inventory).await.unwrap(), 20);

        let state = store.sync_state(Scope::Inventory).await.unwrap().unwrap();
        assert!(state.last_snapshot_at.is_some());
    }

    #[tokio::test]
    async fn snapshot_is_idempotent() {
        let (store, applier) = test_applier().await;
        let snapshot = Snapshot {
            scope: Scope::Inventory,
            records: vec![item("a", 1), item("b", 2)],
            server_seq: 42,
            captured_at: Utc::now(),
        };

        applier.apply_snapshot(&snapshot).await.unwrap();
        let first = store.items().await.unwrap();

        applier.apply_snapshot(&snapshot).await.unwrap();
        let second = store.items().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.last_server_seq(Scope::Inventory).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn delta_upserts_and_deletes() {
        let (store, applier) = test_applier().await;

        applier
            .apply_snapshot(&Snapshot {
                scope: Scope::Inventory,
                records: vec![item("a", 1), item("b", 2)],
                server_seq: 10,
                captured_at: Utc::now(),
            })
            .await
            .unwrap();

        let changed = applier
            .apply_delta(&Delta {
                scope: Scope::Inventory,
                server_seq: 12,
                upserts: vec![item("a", 5), item("c", 7)],
                deletes: vec!["b".into(), "never-existed".into()],
            })
            .await
            .unwrap();

        // Two upserts plus one real delete; the phantom delete is not counted.
        assert_eq!(changed, 3);
        assert_eq!(store.record_count(Scope::Inventory).await.unwrap(), 2);
        let a = store.record(Scope::Inventory, "a").await.unwrap().unwrap();
        assert_eq!(a["quantity"], 5);
        assert_eq!(store.last_server_seq(Scope::Inventory).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn delta_never_moves_watermark_backward() {
        let (store, applier) = test_applier().await;

        applier
            .apply_delta(&Delta {
                scope: Scope::Tickets,
                server_seq: 30,
                upserts: vec![json!({"id": "t-1", "code": "GALA-1", "status": "issued"})],
                deletes: vec![],
            })
            .await
            .unwrap();

        // Older delta still applies its rows but cannot regress the watermark.
        applier
            .apply_delta(&Delta {
                scope: Scope::Tickets,
                server_seq: 20,
                upserts: vec![json!({"id": "t-2", "code": "GALA-2", "status": "issued"})],
                deletes: vec![],
            })
            .await
            .unwrap();

        assert_eq!(store.record_count(Scope::Tickets).await.unwrap(), 2);
        assert_eq!(store.last_server_seq(Scope::Tickets).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn empty_delta_only_touches_updated_at() {
        let (store, applier) = test_applier().await;

        applier
            .apply_delta(&Delta {
                scope: Scope::Inventory,
                server_seq: 5,
                upserts: vec![item("a", 1)],
                deletes: vec![],
            })
            .await
            .unwrap();
        let before = store.sync_state(Scope::Inventory).await.unwrap().unwrap();
        let audits_before = store.audits(Scope::Inventory, 50).await.unwrap().len();

        let changed = applier
            .apply_delta(&Delta::empty(Scope::Inventory, 5))
            .await
            .unwrap();

        assert_eq!(changed, 0);
        let after = store.sync_state(Scope::Inventory).await.unwrap().unwrap();
        assert_eq!(after.last_server_seq, before.last_server_seq);
        assert!(after.updated_at >= before.updated_at);
        // "checked, nothing new" leaves no audit row behind.
        let audits_after = store.audits(Scope::Inventory, 50).await.unwrap().len();
        assert_eq!(audits_after, audits_before);
    }

    #[test]
    fn inference_prefers_record_key_over_alias_and_payload() {
        let nested = server_event(
            Scope::Inventory,
            "inventory.upsert",
            1,
            json!({
                "record": {"id": "from-record", "sku": "R-1"},
                "item": {"id": "from-alias", "sku": "A-1"}
            }),
        );
        let aliased = server_event(
            Scope::Inventory,
            "inventory.upsert",
            2,
            json!({"item": {"id": "from-alias", "sku": "A-2"}}),
        );
        let bare = server_event(
            Scope::Inventory,
            "inventory.upsert",
            3,
            json!({"id": "bare", "sku": "B-1"}),
        );

        let delta = infer_delta(Scope::Inventory, &[nested, aliased, bare], 3);
        let ids: Vec<&str> = delta
            .upserts
            .iter()
            .map(|v| v["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["from-record", "from-alias", "bare"]);
    }

    #[test]
    fn inference_detects_deletes() {
        let flagged = server_event(
            Scope::Tickets,
            "ticket.updated",
            4,
            json!({"id": "t-1", "deleted": true}),
        );
        let by_kind = server_event(
            Scope::Tickets,
            "ticket.void",
            5,
            json!({"recordId": "t-2"}),
        );

        let delta = infer_delta(Scope::Tickets, &[flagged, by_kind], 5);
        assert!(delta.upserts.is_empty());
        assert_eq!(delta.deletes, vec!["t-1".to_string(), "t-2".to_string()]);
    }

    #[test]
    fn inference_ignores_foreign_scope_and_shapeless_events() {
        let foreign = server_event(
            Scope::Tickets,
            "ticket.issue",
            6,
            json!({"id": "t-1", "code": "GALA-1"}),
        );
        let shapeless = server_event(
            Scope::Inventory,
            "inventory.recounted",
            7,
            json!({"note": "full recount finished"}),
        );

        let delta = infer_delta(Scope::Inventory, &[foreign, shapeless], 7);
        assert!(delta.is_empty());
        assert_eq!(delta.server_seq, 7);
    }
}
