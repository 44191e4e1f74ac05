//! Sync endpoint routes.

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use greenroom_engine::{
    BootstrapPage, PullRequest, PullResponse, PushRequest, PushResponse, PushStatus,
    RealtimeEnvelope, Scope,
};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::handlers::{handle_bootstrap, handle_pull, handle_push, handle_websocket_connection};
use crate::websocket::ServerMessage;
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/sync/{scope}/bootstrap", get(bootstrap_handler))
        .route("/v1/sync/push", post(push_handler))
        .route("/v1/sync/pull", post(pull_handler))
        .route("/v1/sync/ws", get(ws_handler))
}

#[derive(Debug, Deserialize)]
struct BootstrapQuery {
    cursor: Option<String>,
}

/// GET /v1/sync/{scope}/bootstrap - One page of the scope's full state.
async fn bootstrap_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(scope): Path<String>,
    Query(query): Query<BootstrapQuery>,
) -> Result<Json<BootstrapPage>> {
    let scope = parse_scope(&scope)?;
    let page = handle_bootstrap(
        &state.pool,
        scope,
        query.cursor.as_deref(),
        state.config.bootstrap_page_size,
    )
    .await?;
    Ok(Json(page))
}

/// POST /v1/sync/push - Append a batch of client events.
async fn push_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    let client_id = request.client_id.clone();
    let scope = request.scope;
    let response = handle_push(&state.pool, request).await?;

    // Everyone else listening on this scope hears the new events now
    // instead of at their next pull.
    if response.status == PushStatus::Applied && !response.events.is_empty() {
        state.conn_manager.broadcast_scope(
            scope,
            Some(&client_id),
            ServerMessage::Sync {
                envelope: RealtimeEnvelope {
                    scope,
                    server_seq: Some(response.server_seq),
                    events: response.events.clone(),
                    delta: None,
                },
            },
        );
    }

    Ok(Json(response))
}

/// POST /v1/sync/pull - Events newer than the station's watermark.
async fn pull_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<PullRequest>,
) -> Result<Json<PullResponse>> {
    let response = handle_pull(&state.pool, request, state.config.pull_page_size).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQuery {
    client_id: String,
}

/// GET /v1/sync/ws - Upgrade to the realtime channel.
async fn ws_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, state.conn_manager.clone(), query.client_id)
    })
}

fn parse_scope(raw: &str) -> Result<Scope> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("unknown scope '{raw}'")))
}
