//! Build API handlers
//!
//! Submission, status query, log retrieval, and cancellation. Report
//! fields (errors, exit code, log) are exposed only once the build's
//! completion signal has fired; earlier reads are unsupported by the
//! core, so the API refuses rather than returning a racy snapshot.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use kiln_core::BuildStatus;
use serde::Serialize;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::registry::{BuildRequest, Registry};

/// Response to a build submission
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: Uuid,
}

/// Externally visible build state
#[derive(Debug, Serialize)]
pub struct BuildView {
    pub id: Uuid,
    pub status: BuildStatus,
    /// Failure descriptions, in the order encountered; empty while
    /// running and on success
    pub errors: Vec<String>,
    /// Exit code of the last subprocess that ran, once complete
    pub exit_code: Option<i32>,
}

/// POST /build/submit
/// Accepts a build request and returns the assigned id
pub async fn submit_build(
    State(registry): State<Arc<Registry>>,
    Json(request): Json<BuildRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.repo_url.is_empty() {
        return Err(ApiError::BadRequest("repo_url cannot be empty".to_string()));
    }
    if request.build_script.is_empty() {
        return Err(ApiError::BadRequest(
            "build_script cannot be empty".to_string(),
        ));
    }

    let id = registry
        .submit(request)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to start build: {e}")))?;

    Ok((StatusCode::CREATED, Json(SubmitResponse { id })))
}

/// GET /build/{id}
/// Reports the current state of a build
pub async fn get_build(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BuildView>> {
    let build = registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Build {id} not found")))?;

    let view = match build.report() {
        Some(report) => BuildView {
            id,
            status: report.status(),
            errors: report.errors.iter().map(ToString::to_string).collect(),
            exit_code: report.process_state.and_then(|s| s.code()),
        },
        None => BuildView {
            id,
            status: BuildStatus::Running,
            errors: Vec::new(),
            exit_code: None,
        },
    };

    Ok(Json(view))
}

/// GET /build/{id}/logs
/// Returns the combined build log once the build has completed
pub async fn get_build_logs(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<Uuid>,
) -> ApiResult<String> {
    let build = registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Build {id} not found")))?;

    let report = build
        .report()
        .ok_or_else(|| ApiError::Conflict(format!("Build {id} is still running")))?;

    Ok(String::from_utf8_lossy(&report.output).into_owned())
}

/// POST /build/{id}/cancel
/// Signals cooperative cancellation to the build
pub async fn cancel_build(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    if !registry.cancel(id).await {
        return Err(ApiError::NotFound(format!("Build {id} not found")));
    }

    Ok(StatusCode::ACCEPTED)
}
