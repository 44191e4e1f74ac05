//! HTTP surface: liveness plus the sync protocol endpoints.

mod health;
mod sync;

use crate::AppState;
use axum::Router;

/// The full route tree, still wanting its state and middleware.
pub fn router() -> Router<AppState> {
    Router::new().merge(health::routes()).merge(sync::routes())
}
