//! Liveness endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::db;
use crate::error::Result;
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Head of the event log, so a probe can tell a frozen server
    /// from a quiet one by watching the number move.
    pub server_seq: i64,
    pub connections: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let mut conn = state.pool.acquire().await?;
    let server_seq = db::latest_seq(&mut conn).await?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        server_seq,
        connections: state.conn_manager.connection_count(),
    }))
}

async fn root() -> &'static str {
    concat!("greenroom-server ", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::websocket::ConnectionManager;
    use greenroom_engine::{EventType, PendingEvent, PushRequest, Scope};
    use std::sync::Arc;

    async fn test_state() -> AppState {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        AppState {
            pool,
            config: Arc::new(Config {
                host: "127.0.0.1".to_string(),
                port: 0,
                database_url: "sqlite::memory:".to_string(),
                auth_secret: None,
                pull_page_size: 500,
                bootstrap_page_size: 1000,
            }),
            conn_manager: ConnectionManager::new_shared(),
        }
    }

    #[tokio::test]
    async fn health_reports_the_log_head() {
        let state = test_state().await;
        let Json(before) = health_check(State(state.clone())).await.unwrap();
        assert_eq!(before.status, "ok");
        assert_eq!(before.server_seq, 0);

        crate::handlers::handle_push(
            &state.pool,
            PushRequest {
                scope: Scope::Tickets,
                client_id: "station-1".to_string(),
                client_mutation_id: "mut-1".to_string(),
                events: vec![PendingEvent {
                    id: "e-1".to_string(),
                    event_type: EventType::TicketIssue,
                    payload: serde_json::json!({"id": "t-1", "code": "GALA-1", "status": "issued"}),
                    created_at: chrono::Utc::now(),
                    retry_count: 0,
                    dedupe_key: "tickets:t-1".to_string(),
                }],
                last_known_server_seq: 0,
            },
        )
        .await
        .unwrap();

        let Json(after) = health_check(State(state)).await.unwrap();
        assert_eq!(after.server_seq, 1);
    }
}
