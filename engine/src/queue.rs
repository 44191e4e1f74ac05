//! Event queue - the durable outbox of locally originated mutations.
//!
//! Enqueued events wait here until a flush hands them to the server. Rapid
//! repeated edits to the same logical change collapse into one row via the
//! dedupe key, so the queue stays bounded no matter how fast the UI fires.

use crate::event::{AuditAction, EventInput, PendingEvent};
use crate::store::{self, LocalStore};
use crate::{Result, Scope};
use chrono::Utc;
use serde_json::json;

/// Queue operations over the local store.
#[derive(Debug, Clone)]
pub struct EventQueue {
    store: LocalStore,
}

impl EventQueue {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Enqueue a local mutation.
    ///
    /// If an unflushed row with the same dedupe key exists, its payload is
    /// overwritten in place (same id, same retry count) instead of appending.
    /// Returns the resulting, post-merge event.
    pub async fn enqueue(&self, input: EventInput) -> Result<PendingEvent> {
        let scope = input.event_type.scope();
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let existing = sqlx::query(
            "SELECT id, event_type, payload, created_at, retry_count, dedupe_key \
             FROM event_queue WHERE dedupe_key = ?",
        )
        .bind(&input.dedupe_key)
        .fetch_optional(&mut *tx)
        .await?;

        let event = match existing {
            Some(row) => {
                let mut event = store::row_to_pending(&row)?;
                sqlx::query("UPDATE event_queue SET event_type = ?, payload = ? WHERE id = ?")
                    .bind(input.event_type.as_str())
                    .bind(serde_json::to_string(&input.payload)?)
                    .bind(&event.id)
                    .execute(&mut *tx)
                    .await?;
                event.event_type = input.event_type;
                event.payload = input.payload;

                store::insert_audit(
                    &mut tx,
                    scope,
                    AuditAction::Queue,
                    &format!("merged with dedupe key {}", event.dedupe_key),
                    json!({"eventId": event.id, "type": event.event_type.as_str()}),
                    now,
                )
                .await?;
                event
            }
            None => {
                let event = PendingEvent {
                    id: uuid::Uuid::new_v4().to_string(),
                    event_type: input.event_type,
                    payload: input.payload,
                    created_at: now,
                    retry_count: 0,
                    dedupe_key: input.dedupe_key,
                };
                insert_row(&mut tx, scope, &event).await?;

                store::insert_audit(
                    &mut tx,
                    scope,
                    AuditAction::Queue,
                    &format!("queued {}", event.event_type.as_str()),
                    json!({"eventId": event.id, "dedupeKey": event.dedupe_key}),
                    now,
                )
                .await?;
                event
            }
        };

        tx.commit().await?;
        tracing::debug!(scope = %scope, event_id = %event.id, "event queued");
        Ok(event)
    }

    /// Dequeue up to `limit` events for a scope in `created_at` order.
    ///
    /// The read and the delete happen in one transaction: a crash or a
    /// racing caller can never lose a batch or hand it out twice. This is
    /// the only path that removes rows from the queue.
    pub async fn consume(&self, scope: Scope, limit: u32) -> Result<Vec<PendingEvent>> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let rows = sqlx::query(
            "SELECT id, event_type, payload, created_at, retry_count, dedupe_key \
             FROM event_queue WHERE scope = ? \
             ORDER BY created_at ASC, rowid ASC LIMIT ?",
        )
        .bind(scope.as_str())
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await?;

        let events: Vec<PendingEvent> = rows
            .iter()
            .map(store::row_to_pending)
            .collect::<Result<_>>()?;

        if events.is_empty() {
            return Ok(events);
        }

        for event in &events {
            sqlx::query("DELETE FROM event_queue WHERE id = ?")
                .bind(&event.id)
                .execute(&mut *tx)
                .await?;
        }

        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        store::insert_audit(
            &mut tx,
            scope,
            AuditAction::Dequeue,
            &format!("dequeued {} event(s) for flush", events.len()),
            json!({"eventIds": ids}),
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(events)
    }

    /// Put a failed flush batch back, preserving ids and original order and
    /// incrementing every retry count by one. A re-insert, not a merge: the
    /// rows no longer exist in the queue after `consume`.
    pub async fn reenqueue(&self, scope: Scope, events: &[PendingEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        for event in events {
            let retried = PendingEvent {
                retry_count: event.retry_count + 1,
                ..event.clone()
            };
            insert_row(&mut tx, retried.scope(), &retried).await?;
        }

        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        store::insert_audit(
            &mut tx,
            scope,
            AuditAction::Queue,
            &format!("re-queued {} event(s) after failed flush", events.len()),
            json!({"eventIds": ids}),
            now,
        )
        .await?;

        tx.commit().await?;
        tracing::debug!(scope = %scope, count = events.len(), "batch re-queued");
        Ok(())
    }
}

async fn insert_row(
    conn: &mut sqlx::SqliteConnection,
    scope: Scope,
    event: &PendingEvent,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO event_queue \
         (id, scope, event_type, payload, created_at, retry_count, dedupe_key) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.id)
    .bind(scope.as_str())
    .bind(event.event_type.as_str())
    .bind(serde_json::to_string(&event.payload)?)
    .bind(store::fmt_ts(event.created_at))
    .bind(i64::from(event.retry_count))
    .bind(&event.dedupe_key)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use serde_json::json;

    async fn test_queue() -> (LocalStore, EventQueue) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let queue = EventQueue::new(store.clone());
        (store, queue)
    }

    #[tokio::test]
    async fn enqueue_then_read_back() {
        let (store, queue) = test_queue().await;

        let event = queue
            .enqueue(EventInput::new(
                EventType::InventoryAdjustment,
                json!({"id": "item-1", "delta": 1}),
                "inventory:item-1",
            ))
            .await
            .unwrap();

        assert_eq!(event.retry_count, 0);
        assert_eq!(store.pending_count(Some(Scope::Inventory)).await.unwrap(), 1);

        let audits = store.audits(Scope::Inventory, 10).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].action, AuditAction::Queue);
    }

    #[tokio::test]
    async fn dedupe_merge_keeps_first_identity_and_last_payload() {
        let (store, queue) = test_queue().await;

        let first = queue
            .enqueue(EventInput::new(
                EventType::InventoryAdjustment,
                json!({"id": "item-x", "delta": 1}),
                "inventory:item-x",
            ))
            .await
            .unwrap();

        let merged = queue
            .enqueue(EventInput::new(
                EventType::InventoryAdjustment,
                json!({"id": "item-x", "delta": 3}),
                "inventory:item-x",
            ))
            .await
            .unwrap();

        // Exactly one row survives, id of the first call, payload of the second.
        assert_eq!(merged.id, first.id);
        assert_eq!(merged.retry_count, 0);
        assert_eq!(merged.payload["delta"], 3);
        assert_eq!(store.pending_count(None).await.unwrap(), 1);

        let pending = store.pending_events(Some(Scope::Inventory)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload["delta"], 3);
    }

    #[tokio::test]
    async fn consume_is_fifo_and_scope_filtered() {
        let (store, queue) = test_queue().await;

        let a = queue
            .enqueue(EventInput::new(
                EventType::InventoryAdjustment,
                json!({"id": "a"}),
                "inventory:a",
            ))
            .await
            .unwrap();
        let _t = queue
            .enqueue(EventInput::new(
                EventType::TicketCheckin,
                json!({"id": "t"}),
                "tickets:t",
            ))
            .await
            .unwrap();
        let b = queue
            .enqueue(EventInput::new(
                EventType::InventoryUpsert,
                json!({"id": "b"}),
                "inventory:b",
            ))
            .await
            .unwrap();

        let batch = queue.consume(Scope::Inventory, 50).await.unwrap();
        let ids: Vec<&str> = batch.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);

        // Ticket event untouched.
        assert_eq!(store.pending_count(Some(Scope::Tickets)).await.unwrap(), 1);
        assert_eq!(store.pending_count(Some(Scope::Inventory)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn consume_is_atomic_and_never_double_delivers() {
        let (store, queue) = test_queue().await;

        for n in 0..5 {
            queue
                .enqueue(EventInput::new(
                    EventType::InventoryAdjustment,
                    json!({"id": format!("item-{n}")}),
                    format!("inventory:item-{n}"),
                ))
                .await
                .unwrap();
        }

        let first = queue.consume(Scope::Inventory, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(store.pending_count(None).await.unwrap(), 2);

        let second = queue.consume(Scope::Inventory, 10).await.unwrap();
        assert_eq!(second.len(), 2);
        for event in &second {
            assert!(!first.iter().any(|e| e.id == event.id));
        }

        assert!(queue.consume(Scope::Inventory, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reenqueue_preserves_order_and_bumps_retry() {
        let (store, queue) = test_queue().await;

        queue
            .enqueue(EventInput::new(
                EventType::TicketCheckin,
                json!({"id": "t-1"}),
                "tickets:t-1",
            ))
            .await
            .unwrap();
        queue
            .enqueue(EventInput::new(
                EventType::TicketVoid,
                json!({"id": "t-2"}),
                "tickets:t-2",
            ))
            .await
            .unwrap();

        let batch = queue.consume(Scope::Tickets, 10).await.unwrap();
        assert_eq!(store.pending_count(None).await.unwrap(), 0);

        queue.reenqueue(Scope::Tickets, &batch).await.unwrap();

        let restored = store.pending_events(Some(Scope::Tickets)).await.unwrap();
        assert_eq!(restored.len(), 2);
        for (orig, back) in batch.iter().zip(&restored) {
            assert_eq!(back.id, orig.id);
            assert_eq!(back.created_at, orig.created_at);
            assert_eq!(back.retry_count, orig.retry_count + 1);
        }
    }
}
