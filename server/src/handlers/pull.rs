//! Pull handler - serves events newer than a station's watermark.

use greenroom_engine::{PullRequest, PullResponse};

use crate::db::{self, Pool};
use crate::error::Result;

/// Process a pull request from a station.
pub async fn handle_pull(pool: &Pool, request: PullRequest, page_size: i64) -> Result<PullResponse> {
    let limit = page_size.max(1);

    // Fetch one more than requested to learn whether another page exists.
    let stored = db::events_since(pool, request.scope, request.last_server_seq, limit + 1).await?;
    let has_more = stored.len() as i64 > limit;

    let mut events = Vec::with_capacity(stored.len().min(limit as usize));
    for row in stored.into_iter().take(limit as usize) {
        events.push(row.to_event()?);
    }

    let mut conn = pool.acquire().await?;
    let server_seq = if has_more {
        // Report only as far as this page reaches, so the client's
        // watermark never claims events it has not been handed yet.
        events.last().map(|e| e.server_seq).unwrap_or(request.last_server_seq)
    } else {
        db::scope_seq(&mut conn, request.scope)
            .await?
            .max(request.last_server_seq)
    };

    Ok(PullResponse {
        events,
        server_seq,
        has_more,
    })
}
