//! Local store - the durable, transactional state container.
//!
//! Five logical tables back the engine: `items`, `tickets`, `event_queue`,
//! `sync_state` and `audits`. Every multi-table mutation (dequeue, snapshot,
//! delta) runs inside one SQLite transaction; partial application - events
//! removed but not acknowledged, or records replaced but the watermark not
//! advanced - is the correctness hazard the transaction boundary prevents.
//!
//! Records are stored opaque: a JSON blob keyed by `id`. Only the queue and
//! the applier write the record tables; the UI enqueues events and reads the
//! typed read models exposed here.

use crate::event::{AuditAction, AuditRecord, EventType, PendingEvent};
use crate::record::{self, InventoryItemRecord, TicketRecord};
use crate::{Result, Scope, SyncError};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::str::FromStr;

/// One row per scope tracking how far local state has incorporated the
/// server's event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub scope: Scope,
    /// Highest fully incorporated server sequence; never decreases.
    pub last_server_seq: i64,
    pub updated_at: DateTime<Utc>,
    /// When the last full bootstrap snapshot was captured, if any.
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

/// Handle to the local SQLite database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open (or create) the local store at the given SQLite URL.
    ///
    /// Fails with [`SyncError::Unsupported`] when persistent storage is
    /// unavailable in this environment.
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| SyncError::Unsupported(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| SyncError::Unsupported(e.to_string()))?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Open an in-memory store. Used by tests and as the degraded-mode
    /// fallback when no filesystem is available.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| SyncError::Unsupported(e.to_string()))?;
        Ok(())
    }

    /// The underlying pool, for callers wiring their own live queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // ---- read models ------------------------------------------------------

    /// All inventory items, ordered by id.
    pub async fn items(&self) -> Result<Vec<InventoryItemRecord>> {
        let rows = sqlx::query("SELECT record FROM items ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| record::decode(Scope::Inventory, row.get::<String, _>(0).as_str()))
            .collect()
    }

    /// All tickets, ordered by id.
    pub async fn tickets(&self) -> Result<Vec<TicketRecord>> {
        let rows = sqlx::query("SELECT record FROM tickets ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| record::decode(Scope::Tickets, row.get::<String, _>(0).as_str()))
            .collect()
    }

    /// A single opaque record by id, if present.
    pub async fn record(&self, scope: Scope, id: &str) -> Result<Option<serde_json::Value>> {
        let sql = format!("SELECT record FROM {} WHERE id = ?", scope.table());
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| Ok(serde_json::from_str(r.get::<String, _>(0).as_str())?))
            .transpose()
    }

    /// Number of records held for a scope.
    pub async fn record_count(&self, scope: Scope) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", scope.table());
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.get(0))
    }

    /// Queued events in FIFO order, optionally restricted to one scope.
    /// Read-only; consuming the queue goes through [`crate::EventQueue`].
    pub async fn pending_events(&self, scope: Option<Scope>) -> Result<Vec<PendingEvent>> {
        let rows = match scope {
            Some(scope) => {
                sqlx::query(
                    "SELECT id, event_type, payload, created_at, retry_count, dedupe_key \
                     FROM event_queue WHERE scope = ? ORDER BY created_at ASC, rowid ASC",
                )
                .bind(scope.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, event_type, payload, created_at, retry_count, dedupe_key \
                     FROM event_queue ORDER BY created_at ASC, rowid ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_pending).collect()
    }

    /// Count of not-yet-acknowledged mutations, the UI's "pending" badge.
    pub async fn pending_count(&self, scope: Option<Scope>) -> Result<i64> {
        let row = match scope {
            Some(scope) => {
                sqlx::query("SELECT COUNT(*) FROM event_queue WHERE scope = ?")
                    .bind(scope.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT COUNT(*) FROM event_queue")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(row.get(0))
    }

    /// The sync state row for a scope, if sync has ever touched it.
    pub async fn sync_state(&self, scope: Scope) -> Result<Option<SyncState>> {
        let row = sqlx::query(
            "SELECT last_server_seq, updated_at, last_snapshot_at \
             FROM sync_state WHERE scope = ?",
        )
        .bind(scope.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(SyncState {
                scope,
                last_server_seq: r.get(0),
                updated_at: parse_ts(r.get::<String, _>(1).as_str())?,
                last_snapshot_at: r
                    .get::<Option<String>, _>(2)
                    .as_deref()
                    .map(parse_ts)
                    .transpose()?,
            })
        })
        .transpose()
    }

    /// Current watermark for a scope (0 before any sync).
    pub async fn last_server_seq(&self, scope: Scope) -> Result<i64> {
        Ok(self.sync_state(scope).await?.map_or(0, |s| s.last_server_seq))
    }

    /// Most recent audit rows for a scope, newest first.
    pub async fn audits(&self, scope: Scope, limit: i64) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            "SELECT id, action, created_at, summary, metadata \
             FROM audits WHERE scope = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(scope.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let action: String = row.get(1);
                Ok(AuditRecord {
                    id: row.get(0),
                    scope,
                    action: AuditAction::parse(&action)
                        .ok_or_else(|| SyncError::Corrupt(format!("audit action: {action}")))?,
                    created_at: parse_ts(row.get::<String, _>(2).as_str())?,
                    summary: row.get(3),
                    metadata: serde_json::from_str(row.get::<String, _>(4).as_str())?,
                })
            })
            .collect()
    }
}

// ---- transaction-scoped helpers (queue & applier only) --------------------

pub(crate) fn row_to_pending(row: &SqliteRow) -> Result<PendingEvent> {
    let event_type: String = row.get(1);
    Ok(PendingEvent {
        id: row.get(0),
        event_type: EventType::parse(&event_type)
            .ok_or_else(|| SyncError::Corrupt(format!("event type: {event_type}")))?,
        payload: serde_json::from_str(row.get::<String, _>(2).as_str())?,
        created_at: parse_ts(row.get::<String, _>(3).as_str())?,
        retry_count: row.get::<i64, _>(4) as u32,
        dedupe_key: row.get(5),
    })
}

pub(crate) async fn upsert_record(
    conn: &mut SqliteConnection,
    scope: Scope,
    value: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(id) = record::record_id(value).map(str::to_owned) else {
        return Ok(false);
    };
    let sql = format!(
        "INSERT INTO {} (id, record, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
        scope.table()
    );
    sqlx::query(&sql)
        .bind(&id)
        .bind(serde_json::to_string(value)?)
        .bind(fmt_ts(now))
        .execute(&mut *conn)
        .await?;
    Ok(true)
}

pub(crate) async fn delete_record(
    conn: &mut SqliteConnection,
    scope: Scope,
    id: &str,
) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?", scope.table());
    let result = sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn clear_records(conn: &mut SqliteConnection, scope: Scope) -> Result<()> {
    let sql = format!("DELETE FROM {}", scope.table());
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

pub(crate) async fn read_watermark(conn: &mut SqliteConnection, scope: Scope) -> Result<i64> {
    let row = sqlx::query("SELECT last_server_seq FROM sync_state WHERE scope = ?")
        .bind(scope.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map_or(0, |r| r.get(0)))
}

/// Advance the watermark with the monotonic `max` rule; never backward.
/// Returns the effective watermark after the write.
pub(crate) async fn advance_watermark(
    conn: &mut SqliteConnection,
    scope: Scope,
    server_seq: i64,
    snapshot_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<i64> {
    sqlx::query(
        "INSERT INTO sync_state (scope, last_server_seq, updated_at, last_snapshot_at) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT(scope) DO UPDATE SET \
             last_server_seq = MAX(last_server_seq, excluded.last_server_seq), \
             updated_at = excluded.updated_at, \
             last_snapshot_at = COALESCE(excluded.last_snapshot_at, last_snapshot_at)",
    )
    .bind(scope.as_str())
    .bind(server_seq)
    .bind(fmt_ts(now))
    .bind(snapshot_at.map(fmt_ts))
    .execute(&mut *conn)
    .await?;

    read_watermark(conn, scope).await
}

/// Record "checked, nothing new" without moving the watermark.
pub(crate) async fn touch_sync_state(
    conn: &mut SqliteConnection,
    scope: Scope,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query("UPDATE sync_state SET updated_at = ? WHERE scope = ?")
        .bind(fmt_ts(now))
        .bind(scope.as_str())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        sqlx::query(
            "INSERT INTO sync_state (scope, last_server_seq, updated_at) VALUES (?, 0, ?)",
        )
        .bind(scope.as_str())
        .bind(fmt_ts(now))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub(crate) async fn insert_audit(
    conn: &mut SqliteConnection,
    scope: Scope,
    action: AuditAction,
    summary: &str,
    metadata: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO audits (id, scope, action, created_at, summary, metadata) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(scope.as_str())
    .bind(action.as_str())
    .bind(fmt_ts(now))
    .bind(summary)
    .bind(serde_json::to_string(&metadata)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Fixed-width RFC 3339 so lexicographic order matches chronological order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Corrupt(format!("timestamp '{raw}': {e}")))
}
