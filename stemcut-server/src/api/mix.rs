//! Remix endpoints (spec §6): enqueue/join a remix request, poll its
//! status, download the result.

use axum::extract::{Path as AxPath, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::api::jobs::lookup_job;
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::models::{Job, JobStatus, MixSettings, MixStatus};
use crate::store::safe_filename;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct MixResponse {
    pub mix_id: String,
    pub status: MixStatus,
    pub progress: u8,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// POST /jobs/{id}/mix
pub async fn request_mix(
    State(state): State<AppState>,
    AxPath(job_id): AxPath<Uuid>,
    Json(settings): Json<MixSettings>,
) -> ApiResult<Response> {
    let job = lookup_job(&state, job_id)?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::new(ErrorCode::JobNotCompleted, "job has not completed"));
    }
    settings
        .validate()
        .map_err(|e| ApiError::new(ErrorCode::InvalidFormat, e))?;

    let outcome = state.remix.request(&job, settings).await;
    if outcome.should_run {
        let remix = state.remix.clone();
        tokio::spawn(async move {
            remix.run(&job, settings).await;
        });
    }

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(MixResponse {
            mix_id: outcome.mix_id,
            status: outcome.status,
            progress: outcome.progress,
            cached: outcome.cached,
            error_message: None,
        }),
    )
        .into_response())
}

/// GET /jobs/{id}/mix/{mix_id}
pub async fn mix_status(
    State(state): State<AppState>,
    AxPath((job_id, mix_id)): AxPath<(Uuid, String)>,
) -> ApiResult<Json<MixResponse>> {
    lookup_job(&state, job_id)?;

    if let Some(task) = state.remix.status(job_id, &mix_id) {
        return Ok(Json(MixResponse {
            mix_id,
            status: task.status,
            progress: task.progress,
            cached: false,
            error_message: task.error_message,
        }));
    }

    // No in-flight record (e.g. server restarted, or an older
    // request): the on-disk file is authoritative.
    if state
        .store
        .find_by_prefix(job_id, &format!("mix_{mix_id}."))
        .await
        .is_some()
    {
        return Ok(Json(MixResponse {
            mix_id,
            status: MixStatus::Completed,
            progress: 100,
            cached: true,
            error_message: None,
        }));
    }

    Err(ApiError::new(ErrorCode::MixNotFound, "mix not found"))
}

/// GET /jobs/{id}/mix/{mix_id}/download
pub async fn download_mix(
    State(state): State<AppState>,
    AxPath((job_id, mix_id)): AxPath<(Uuid, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let job = lookup_job(&state, job_id)?;
    let path = state
        .store
        .find_by_prefix(job_id, &format!("mix_{mix_id}."))
        .await
        .ok_or_else(|| ApiError::new(ErrorCode::MixNotFound, "mix not found"))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let mut response = crate::streaming::serve_file(&path, mime_for_extension(ext), &headers, false).await;
    response.headers_mut().insert(
        axum::http::header::CONTENT_DISPOSITION,
        crate::streaming::content_disposition_attachment(&download_name(&job, ext)),
    );
    Ok(response)
}

/// Pretty, sanitized download filename: job title (or id) plus the
/// mix's own extension (spec §6).
fn download_name(job: &Job, ext: &str) -> String {
    let stem = job.source_title.clone().unwrap_or_else(|| job.id.to_string());
    format!("{}.{ext}", safe_filename(&stem))
}
