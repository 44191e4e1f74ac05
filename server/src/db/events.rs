//! Event log persistence: the globally ordered stream of sync events.

use chrono::{DateTime, SecondsFormat, Utc};
use greenroom_engine::{Scope, ServerSyncEvent};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::Pool;
use crate::error::{AppError, Result};

/// A stored sync event row.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub server_seq: i64,
    pub event_id: String,
    pub scope: String,
    pub kind: String,
    pub payload: String,
    pub occurred_at: String,
    pub client_id: String,
    pub dedupe_key: Option<String>,
}

impl StoredEvent {
    fn from_row(row: &SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            server_seq: row.try_get("server_seq")?,
            event_id: row.try_get("event_id")?,
            scope: row.try_get("scope")?,
            kind: row.try_get("kind")?,
            payload: row.try_get("payload")?,
            occurred_at: row.try_get("occurred_at")?,
            client_id: row.try_get("client_id")?,
            dedupe_key: row.try_get("dedupe_key")?,
        })
    }

    /// Convert to the wire event shape.
    pub fn to_event(&self) -> Result<ServerSyncEvent> {
        let scope: Scope = self
            .scope
            .parse()
            .map_err(|_| AppError::Internal(format!("unknown scope '{}' in event log", self.scope)))?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| AppError::Internal(format!("corrupt event payload: {e}")))?;
        let occurred_at = DateTime::parse_from_rfc3339(&self.occurred_at)
            .map_err(|e| AppError::Internal(format!("corrupt event timestamp: {e}")))?
            .with_timezone(&Utc);
        Ok(ServerSyncEvent {
            id: self.event_id.clone(),
            scope,
            kind: self.kind.clone(),
            payload,
            occurred_at,
            server_seq: self.server_seq,
            client_id: self.client_id.clone(),
            dedupe_key: self.dedupe_key.clone(),
        })
    }
}

pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Highest sequence number in the whole log.
pub async fn latest_seq(conn: &mut SqliteConnection) -> Result<i64> {
    let row = sqlx::query("SELECT COALESCE(MAX(server_seq), 0) FROM sync_events")
        .fetch_one(conn)
        .await?;
    Ok(row.get(0))
}

/// Highest sequence number within one scope.
pub async fn scope_seq(conn: &mut SqliteConnection, scope: Scope) -> Result<i64> {
    let row = sqlx::query("SELECT COALESCE(MAX(server_seq), 0) FROM sync_events WHERE scope = ?")
        .bind(scope.as_str())
        .fetch_one(conn)
        .await?;
    Ok(row.get(0))
}

/// Whether an event with this id was already accepted.
pub async fn event_exists(conn: &mut SqliteConnection, event_id: &str) -> Result<bool> {
    let row = sqlx::query("SELECT COUNT(*) FROM sync_events WHERE event_id = ?")
        .bind(event_id)
        .fetch_one(conn)
        .await?;
    Ok(row.get::<i64, _>(0) > 0)
}

/// Append an event to the log. Returns the assigned sequence number.
pub async fn insert_event(
    conn: &mut SqliteConnection,
    event_id: &str,
    scope: Scope,
    kind: &str,
    payload: &serde_json::Value,
    client_id: &str,
    dedupe_key: Option<&str>,
    occurred_at: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO sync_events (event_id, scope, kind, payload, occurred_at, client_id, dedupe_key) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(event_id)
    .bind(scope.as_str())
    .bind(kind)
    .bind(serde_json::to_string(payload).map_err(|e| AppError::Internal(e.to_string()))?)
    .bind(fmt_ts(occurred_at))
    .bind(client_id)
    .bind(dedupe_key)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Events for a scope strictly after the given sequence number.
pub async fn events_since(
    pool: &Pool,
    scope: Scope,
    after_seq: i64,
    limit: i64,
) -> Result<Vec<StoredEvent>> {
    let rows = sqlx::query(
        "SELECT server_seq, event_id, scope, kind, payload, occurred_at, client_id, dedupe_key \
         FROM sync_events WHERE scope = ? AND server_seq > ? ORDER BY server_seq ASC LIMIT ?",
    )
    .bind(scope.as_str())
    .bind(after_seq)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| StoredEvent::from_row(row).map_err(AppError::from))
        .collect()
}

/// Look up a previously processed mutation.
pub async fn mutation_seq(
    conn: &mut SqliteConnection,
    client_mutation_id: &str,
) -> Result<Option<i64>> {
    let row = sqlx::query("SELECT server_seq FROM mutations WHERE client_mutation_id = ?")
        .bind(client_mutation_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|r| r.get(0)))
}

/// Record a processed mutation so a replay can be answered as a duplicate.
pub async fn insert_mutation(
    conn: &mut SqliteConnection,
    client_mutation_id: &str,
    scope: Scope,
    status: &str,
    server_seq: i64,
    processed_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO mutations (client_mutation_id, scope, status, server_seq, processed_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(client_mutation_id)
    .bind(scope.as_str())
    .bind(status)
    .bind(server_seq)
    .bind(fmt_ts(processed_at))
    .execute(conn)
    .await?;
    Ok(())
}
