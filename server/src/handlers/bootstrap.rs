//! Bootstrap handler - serves full snapshots of a scope, paged by id.

use chrono::Utc;
use greenroom_engine::{BootstrapPage, Scope};

use crate::db::{self, Pool};
use crate::error::Result;

/// Serve one page of the scope's current records.
pub async fn handle_bootstrap(
    pool: &Pool,
    scope: Scope,
    cursor: Option<&str>,
    page_size: i64,
) -> Result<BootstrapPage> {
    let limit = page_size.max(1);
    let page = db::records_page(pool, scope, cursor, limit + 1).await?;

    let has_more = page.len() as i64 > limit;
    let rows: Vec<(String, serde_json::Value)> =
        page.into_iter().take(limit as usize).collect();
    let next_cursor = if has_more {
        rows.last().map(|(id, _)| id.clone())
    } else {
        None
    };

    let mut conn = pool.acquire().await?;
    let server_seq = db::scope_seq(&mut conn, scope).await?;

    Ok(BootstrapPage {
        records: rows.into_iter().map(|(_, record)| record).collect(),
        server_seq,
        captured_at: Utc::now(),
        has_more,
        next_cursor,
    })
}
