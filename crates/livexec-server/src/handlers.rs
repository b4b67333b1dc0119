// HTTP route handlers for the livexec server

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use livexec::{
    ManagerStatus, RunError, RunResult, SessionId, SessionInfo, SessionTicket, SubmitError,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::AppState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("session {0} not found")]
    NotFound(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Submit(e) | ApiError::Run(RunError::Submit(e)) => submit_status(e),
            ApiError::Run(RunError::Timeout { .. }) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Run(RunError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Run(RunError::Process(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

fn submit_status(error: &SubmitError) -> StatusCode {
    match error {
        SubmitError::EmptySource => StatusCode::BAD_REQUEST,
        SubmitError::QueueFull { .. } | SubmitError::ShuttingDown => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SubmitError::Process(_) | SubmitError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
}

/// POST /sessions - Upload a program and start an interactive session
pub async fn submit(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SessionTicket>, ApiError> {
    let ticket = state.manager.submit(&body).await?;
    Ok(Json(ticket))
}

/// POST /run - Run a program to completion and return its output
pub async fn run(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<RunResult>, ApiError> {
    let result = state.manager.run(&body).await?;
    Ok(Json(result))
}

/// GET /sessions/:id - Inspect a session
pub async fn session_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    SessionId::parse(&id)
        .and_then(|id| state.manager.session(id))
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

/// DELETE /sessions/:id - Cancel a running session
pub async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match SessionId::parse(&id) {
        Some(session) if state.manager.cancel(session) => {
            info!(%session, "cancellation requested");
            Ok(StatusCode::ACCEPTED)
        }
        _ => Err(ApiError::NotFound(id)),
    }
}

/// GET /status - Admission figures
pub async fn status(State(state): State<Arc<AppState>>) -> Json<ManagerStatus> {
    Json(state.manager.status())
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            uptime_secs: state.started.elapsed().as_secs(),
        }),
    )
}
