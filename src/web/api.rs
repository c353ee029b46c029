//! HTTP handlers.
//!
//! - `POST /jobs` submits a target: 202 for a new job, 200 when the
//!   submission attached to an existing one, 400 for invalid targets.
//! - `GET /jobs` lists tracked jobs, `GET /jobs/{id}` returns one.
//! - `DELETE /jobs/{id}` cancels: 200 on acceptance, 409 once terminal.
//! - `GET /health` reports liveness and per-state job counts.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::AppState;
use crate::errors::{CancelError, SubmitError};
use crate::models::{JobState, JobView, SubmitRequest};

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    pub state: JobState,
}

pub async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    match state.scheduler.submit(payload).await {
        Ok(outcome) => {
            let status = if outcome.created {
                StatusCode::ACCEPTED
            } else {
                StatusCode::OK
            };
            (
                status,
                Json(SubmitResponse {
                    id: outcome.job.id,
                    state: outcome.job.state,
                }),
            )
                .into_response()
        }
        Err(error) => {
            let (status, code) = match &error {
                SubmitError::EmptyTarget => (StatusCode::BAD_REQUEST, "missing_url"),
                SubmitError::InvalidTarget { .. } => (StatusCode::BAD_REQUEST, "invalid_target"),
                SubmitError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
                SubmitError::Internal { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            };
            error_response(status, code, &error.to_string())
        }
    }
}

pub async fn get_job(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<JobView>, StatusCode> {
    match state.scheduler.status(id).await {
        Some(view) => Ok(Json(view)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobView>> {
    Json(state.scheduler.list().await)
}

pub async fn cancel_job(Path(id): Path<Uuid>, State(state): State<AppState>) -> Response {
    match state.scheduler.cancel(id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(CancelError::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(CancelError::AlreadyTerminal) => error_response(
            StatusCode::CONFLICT,
            "already_terminal",
            "job already reached a terminal state",
        ),
    }
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let counts = state.scheduler.stats().await;
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds();
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "jobs": counts,
    }))
}

fn error_response(status: StatusCode, code: &str, detail: &str) -> Response {
    (status, Json(json!({ "error": code, "detail": detail }))).into_response()
}
