// Route definitions for the livexec server

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::{AppState, handlers, ws};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(handlers::submit))
        .route(
            "/sessions/:id",
            get(handlers::session_info).delete(handlers::cancel_session),
        )
        .route("/sessions/:id/ws", get(ws::attach))
        .route("/run", post(handlers::run))
        .route("/status", get(handlers::status))
        .route("/health", get(handlers::health_check))
}
