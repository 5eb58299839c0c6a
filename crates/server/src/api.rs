//! HTTP handlers: each route maps to exactly one hub call, with request
//! validation and status mapping living here so the engine stays wire-free.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use spindle_core::{Job, DEFAULT_TIME_TO_RUN};
use spindle_wheel::WheelError;

use crate::state::AppState;

/// Reservation waits are capped server-side; callers wanting longer just
/// call again.
pub const MAX_RESERVE_TIMEOUT_MS: u64 = 30_000;

// ── Error plumbing ────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: msg.into() }),
    )
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn wheel_status(err: WheelError) -> ApiError {
    if !err.is_client_error() {
        warn!("engine error surfaced to a client: {err}");
    }
    let status = match &err {
        WheelError::DuplicateJob { .. } => StatusCode::CONFLICT,
        WheelError::TriggerOutOfRange { .. } => StatusCode::BAD_REQUEST,
        WheelError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

// ── Job views ─────────────────────────────────────────────────────

/// Wire representation of a job. Bodies cross the HTTP boundary as UTF-8
/// text; the engine itself never looks inside them.
#[derive(Serialize)]
pub struct JobView {
    pub id: String,
    pub trigger_at: DateTime<Utc>,
    pub body: String,
    pub priority: i32,
    pub time_to_run_ms: u64,
}

impl JobView {
    fn from_job(job: &Job) -> JobView {
        JobView {
            id: job.id().to_string(),
            trigger_at: job.trigger_at(),
            body: String::from_utf8_lossy(job.body()).into_owned(),
            priority: job.priority(),
            time_to_run_ms: job.time_to_run().as_millis() as u64,
        }
    }
}

// ── Enqueue ───────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub id: Option<String>,
    pub body: String,
    pub delay_ms: Option<i64>,
    pub trigger_at: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub time_to_run_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct EnqueueResponse {
    pub id: String,
    pub trigger_at: DateTime<Utc>,
}

pub async fn enqueue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let trigger_at = match (req.delay_ms, req.trigger_at) {
        (Some(_), Some(_)) => {
            return Err(bad_request("delay_ms and trigger_at are mutually exclusive"))
        }
        (Some(delay), None) => Utc::now()
            .checked_add_signed(chrono::Duration::milliseconds(delay))
            .ok_or_else(|| bad_request("delay_ms is out of range"))?,
        (None, Some(at)) => at,
        (None, None) => return Err(bad_request("one of delay_ms or trigger_at is required")),
    };

    let id = match req.id {
        Some(id) if id.trim().is_empty() => return Err(bad_request("id must not be blank")),
        Some(id) => id,
        None => state.hub.next_id(),
    };

    let job = Job::with_options(
        id.clone(),
        trigger_at,
        Bytes::from(req.body),
        req.priority.unwrap_or(0),
        req.time_to_run_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIME_TO_RUN),
    );

    // The fence can hold the caller for a while, so the whole admission
    // runs on the blocking pool.
    let hub = state.hub.clone();
    let monitor = state.monitor.clone();
    let added = tokio::task::spawn_blocking(move || {
        monitor.fence();
        hub.add_job(job)
    })
    .await
    .map_err(internal)?;

    match added {
        Ok(()) => Ok((
            StatusCode::CREATED,
            Json(EnqueueResponse { id, trigger_at }),
        )),
        Err(e) => Err(wheel_status(e)),
    }
}

// ── Reserve ───────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ReserveParams {
    pub timeout_ms: Option<u64>,
}

/// Pop the next ready job. With `timeout_ms` the call lingers until a job
/// becomes ready or the wait expires; either way an empty queue answers
/// 204, never an error.
pub async fn next_job(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReserveParams>,
) -> Result<Response, ApiError> {
    let wait = Duration::from_millis(params.timeout_ms.unwrap_or(0).min(MAX_RESERVE_TIMEOUT_MS));

    let hub = state.hub.clone();
    let outcome = tokio::task::spawn_blocking(move || hub.next_wait(wait))
        .await
        .map_err(internal)?;

    match outcome {
        Ok(job) => Ok((StatusCode::OK, Json(JobView::from_job(&job))).into_response()),
        Err(WheelError::Timeout { .. }) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(wheel_status(e)),
    }
}

// ── Cancel ────────────────────────────────────────────────────────

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.hub.cancel(&id) {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(wheel_status(e)),
    }
}

// ── Listing ───────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

/// Non-consuming peek at outstanding jobs, overdue work first.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Json<Vec<JobView>> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let jobs = state.hub.inspect(limit);
    Json(jobs.iter().map(JobView::from_job).collect())
}

// ── Health & Stats ────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub outstanding_jobs: u64,
    pub accepting: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        outstanding_jobs: state.hub.pending_count(),
        accepting: !state.monitor.breached(),
    })
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub jobs: spindle_wheel::HubStats,
    pub storage: String,
    pub uptime_s: i64,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        jobs: state.hub.stats(),
        storage: state.storage_name.clone(),
        uptime_s: (Utc::now() - state.started_at).num_seconds(),
    })
}

// ── Admin ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SnapshotResponse {
    pub jobs_considered: u64,
    pub errors: Vec<String>,
}

/// Write a snapshot now instead of waiting for shutdown. Per-job failures
/// are reported in the body; the cycle itself always runs to finalize.
pub async fn snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    let hub = state.hub.clone();
    let persister = state.persister.clone();
    let (jobs_considered, errors) = tokio::task::spawn_blocking(move || {
        let considered = hub.pending_count();
        let errors: Vec<String> = hub
            .persist(persister)
            .into_iter()
            .map(|e| e.to_string())
            .collect();
        (considered, errors)
    })
    .await
    .map_err(internal)?;

    if errors.is_empty() {
        info!(jobs = jobs_considered, "on-demand snapshot written");
    } else {
        warn!(failed = errors.len(), "on-demand snapshot finished with errors");
    }
    Ok(Json(SnapshotResponse {
        jobs_considered,
        errors,
    }))
}
