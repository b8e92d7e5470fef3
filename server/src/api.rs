//! HTTP surface over `SchedulerRegistry` (`SPEC_FULL.md` E.8): a direct
//! `axum` skin over the §4.1 operations, in the `Router`/`State`/
//! `IntoResponse` style of the teacher's `server/src/api.rs`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use scheduler_core::error::SchedulerError;
use scheduler_core::ids::{ProgramRef, ProgramType, ScheduleSpec};
use scheduler_core::registry::{ScheduleState, SchedulerRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Application state shared across all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SchedulerRegistry>,
}

/// Creates the API router and wires every `SPEC_FULL.md` E.8 route.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/schedules", post(create_schedule))
        .route(
            "/schedules/{ns}/{app}/{program_type}/{program}/{sched}/suspend",
            post(suspend_schedule),
        )
        .route(
            "/schedules/{ns}/{app}/{program_type}/{program}/{sched}/resume",
            post(resume_schedule),
        )
        .route(
            "/schedules/{ns}/{app}/{program_type}/{program}/{sched}/state",
            get(schedule_state),
        )
        .route(
            "/schedules/{ns}/{app}/{program_type}/{program}/{sched}",
            delete(delete_schedule),
        )
        .route(
            "/schedules/{ns}/{app}/{program_type}/{program}",
            get(list_schedule_ids).delete(delete_all_schedules),
        )
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct CreateScheduleRequest {
    namespace: String,
    application: String,
    program: String,
    program_type: String,
    stream_name: String,
    data_trigger_mb: u32,
    schedule_name: String,
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<StatusCode, ApiError> {
    let program = ProgramRef::new(req.namespace, req.application, req.program);
    let program_type = ProgramType(req.program_type);
    let spec = ScheduleSpec {
        stream_name: req.stream_name,
        data_trigger_mb: req.data_trigger_mb,
        schedule_name: req.schedule_name,
    };
    state.registry.schedule(program, program_type, spec).await?;
    Ok(StatusCode::CREATED)
}

async fn suspend_schedule(
    State(state): State<AppState>,
    Path((ns, app, program_type, program, sched)): Path<(String, String, String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let program_ref = ProgramRef::new(ns, app, program);
    state
        .registry
        .suspend(&program_ref, &ProgramType(program_type), &sched)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_schedule(
    State(state): State<AppState>,
    Path((ns, app, program_type, program, sched)): Path<(String, String, String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let program_ref = ProgramRef::new(ns, app, program);
    state
        .registry
        .resume(&program_ref, &ProgramType(program_type), &sched)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path((ns, app, program_type, program, sched)): Path<(String, String, String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let program_ref = ProgramRef::new(ns, app, program);
    state
        .registry
        .delete(&program_ref, &ProgramType(program_type), &sched)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct DeleteAllResponse {
    deleted: usize,
}

async fn delete_all_schedules(
    State(state): State<AppState>,
    Path((ns, app, program_type, program)): Path<(String, String, String, String)>,
) -> Result<Json<DeleteAllResponse>, ApiError> {
    let program_ref = ProgramRef::new(ns, app, program);
    let deleted = state
        .registry
        .delete_all(&program_ref, &ProgramType(program_type))
        .await?;
    Ok(Json(DeleteAllResponse { deleted }))
}

async fn list_schedule_ids(
    State(state): State<AppState>,
    Path((ns, app, program_type, program)): Path<(String, String, String, String)>,
) -> Json<Vec<String>> {
    let program_ref = ProgramRef::new(ns, app, program);
    let ids = state
        .registry
        .list_ids(&program_ref, &ProgramType(program_type))
        .await;
    Json(ids.into_iter().map(|id| id.to_string()).collect())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum ScheduleStateResponse {
    NotFound,
    Scheduled,
    Suspended,
}

impl From<ScheduleState> for ScheduleStateResponse {
    fn from(state: ScheduleState) -> Self {
        match state {
            ScheduleState::NotFound => Self::NotFound,
            ScheduleState::Scheduled => Self::Scheduled,
            ScheduleState::Suspended => Self::Suspended,
        }
    }
}

async fn schedule_state(
    State(state): State<AppState>,
    Path((ns, app, program_type, program, sched)): Path<(String, String, String, String, String)>,
) -> Json<ScheduleStateResponse> {
    let program_ref = ProgramRef::new(ns, app, program);
    let result = state
        .registry
        .state(&program_ref, &ProgramType(program_type), &sched)
        .await;
    Json(result.into())
}

/// Maps `SchedulerError`/transport failures onto HTTP status codes, in the
/// `ApiError` + `IntoResponse` style of the teacher's `server/src/api.rs`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(_) => ApiError::NotFound(err.to_string()),
            SchedulerError::InvalidArgument(_) => ApiError::BadRequest(err.to_string()),
            SchedulerError::AlreadyExists(_) => ApiError::Conflict(err.to_string()),
            SchedulerError::FeedError { .. }
            | SchedulerError::FeedNotFound(_)
            | SchedulerError::ProbeError { .. }
            | SchedulerError::DispatchError(..)
            | SchedulerError::DispatchRefireError(..) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        };

        let body = Json(serde_json::json!({
            "error": error_message,
            "details": self.to_string(),
        }));

        (status, body).into_response()
    }
}
