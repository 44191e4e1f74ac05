//! Push handler - appends client events to the global log.

use chrono::Utc;
use greenroom_engine::{
    EventType, MutationReceipt, PushRequest, PushResponse, PushStatus, ServerSyncEvent,
};
use serde_json::json;

use crate::db::{self, Pool};
use crate::error::{AppError, Result};

/// Process a push request from a station.
///
/// The whole batch lands in one transaction: every event gets a sequence
/// number and its materialized record update, or nothing does. Events whose
/// id is already in the log are skipped, which makes retried batches safe.
pub async fn handle_push(pool: &Pool, request: PushRequest) -> Result<PushResponse> {
    let scope = request.scope;
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    // A replayed mutation gets its original answer without touching the
    // log. Echoing the stored seq (not the current head) keeps the client's
    // watermark from jumping past events pushed since the first delivery.
    if let Some(server_seq) = db::mutation_seq(&mut tx, &request.client_mutation_id).await? {
        tx.commit().await?;
        return Ok(PushResponse {
            status: PushStatus::Duplicate,
            server_seq,
            events: vec![],
            skipped: request.events.iter().map(|e| e.id.clone()).collect(),
            mutation: Some(MutationReceipt {
                client_mutation_id: request.client_mutation_id,
                processed_at: now,
            }),
        });
    }

    // A station that has not incorporated the scope's newest events must
    // pull before its writes are accepted.
    let scope_seq = db::scope_seq(&mut tx, scope).await?;
    if request.last_known_server_seq < scope_seq {
        return Err(AppError::Stale {
            scope,
            server_seq: scope_seq,
        });
    }

    let mut created: Vec<ServerSyncEvent> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();

    for event in &request.events {
        if db::event_exists(&mut tx, &event.id).await? {
            skipped.push(event.id.clone());
            continue;
        }

        // Canonical events nest the record under the scope's alias key.
        let kind = event.event_type.as_str();
        let canonical = json!({ scope.record_alias(): event.payload });
        let server_seq = db::insert_event(
            &mut tx,
            &event.id,
            scope,
            kind,
            &canonical,
            &request.client_id,
            Some(event.dedupe_key.as_str()),
            now,
        )
        .await?;

        match event.payload.get("id").and_then(serde_json::Value::as_str) {
            Some(record_id) if is_removal(event.event_type, &event.payload) => {
                db::delete_record(&mut tx, scope, record_id).await?;
            }
            Some(record_id) => {
                db::upsert_record(&mut tx, scope, record_id, &event.payload, now).await?;
            }
            None => {
                tracing::warn!(event_id = %event.id, "pushed event has no record id, logged only");
            }
        }

        created.push(ServerSyncEvent {
            id: event.id.clone(),
            scope,
            kind: kind.to_string(),
            payload: canonical,
            occurred_at: now,
            server_seq,
            client_id: request.client_id.clone(),
            dedupe_key: Some(event.dedupe_key.clone()),
        });
    }

    let status = if created.is_empty() && !request.events.is_empty() {
        PushStatus::Duplicate
    } else {
        PushStatus::Applied
    };
    let server_seq = db::latest_seq(&mut tx).await?;
    db::insert_mutation(
        &mut tx,
        &request.client_mutation_id,
        scope,
        status_label(status),
        server_seq,
        now,
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        scope = %scope,
        client = %request.client_id,
        accepted = created.len(),
        skipped = skipped.len(),
        server_seq,
        "push processed"
    );

    Ok(PushResponse {
        status,
        server_seq,
        events: created,
        skipped,
        mutation: Some(MutationReceipt {
            client_mutation_id: request.client_mutation_id,
            processed_at: now,
        }),
    })
}

fn is_removal(event_type: EventType, payload: &serde_json::Value) -> bool {
    matches!(event_type, EventType::InventoryDelete | EventType::TicketVoid)
        || payload.get("deleted").and_then(serde_json::Value::as_bool) == Some(true)
}

fn status_label(status: PushStatus) -> &'static str {
    match status {
        PushStatus::Applied => "applied",
        PushStatus::Duplicate => "duplicate",
        PushStatus::Stale => "stale",
    }
}
