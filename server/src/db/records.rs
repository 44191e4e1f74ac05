//! Current record state, materialized per scope from the event log.

use chrono::{DateTime, Utc};
use greenroom_engine::Scope;
use sqlx::{Row, SqliteConnection};

use super::{events::fmt_ts, Pool};
use crate::error::{AppError, Result};

/// Upsert the materialized record for a scope.
pub async fn upsert_record(
    conn: &mut SqliteConnection,
    scope: Scope,
    id: &str,
    record: &serde_json::Value,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO records (scope, id, record, updated_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(scope, id) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
    )
    .bind(scope.as_str())
    .bind(id)
    .bind(serde_json::to_string(record).map_err(|e| AppError::Internal(e.to_string()))?)
    .bind(fmt_ts(updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

/// Remove the materialized record.
pub async fn delete_record(conn: &mut SqliteConnection, scope: Scope, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM records WHERE scope = ? AND id = ?")
        .bind(scope.as_str())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// One page of records for a scope, ordered by id. The cursor is the last
/// id of the previous page.
pub async fn records_page(
    pool: &Pool,
    scope: Scope,
    cursor: Option<&str>,
    limit: i64,
) -> Result<Vec<(String, serde_json::Value)>> {
    let rows = sqlx::query(
        "SELECT id, record FROM records WHERE scope = ? AND id > ? ORDER BY id ASC LIMIT ?",
    )
    .bind(scope.as_str())
    .bind(cursor.unwrap_or(""))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let id: String = row.get(0);
            let record = serde_json::from_str(row.get::<String, _>(1).as_str())
                .map_err(|e| AppError::Internal(format!("corrupt record '{id}': {e}")))?;
            Ok((id, record))
        })
        .collect()
}
