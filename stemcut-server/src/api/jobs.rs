//! Job lifecycle endpoints: submit, list, inspect, delete, stream, and
//! download stems (spec §6).

use axum::extract::{Multipart, Path as AxPath, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::models::{Job, SourceType};
use crate::store::safe_filename;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub url: String,
}

fn client_ip(headers: &HeaderMap, addr: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
        .or_else(|| addr.map(|a| a.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn check_rate_limit(state: &AppState, ip: &str) -> ApiResult<()> {
    let decision = state.rate_limiter.check(ip);
    if !decision.allowed {
        return Err(ApiError::new(
            ErrorCode::RateLimitExceeded,
            format!("rate limit exceeded, retry in {}s", decision.reset_in_seconds),
        ));
    }
    Ok(())
}

fn admit_or_busy(state: &AppState) -> ApiResult<()> {
    if !state.registry.can_accept() {
        return Err(ApiError::new(
            ErrorCode::ServiceBusy,
            "too many jobs in progress, try again later".to_string(),
        ));
    }
    Ok(())
}

fn spawn_pipeline(state: AppState, job_id: Uuid) {
    tokio::spawn(async move {
        let pipeline = crate::pipeline::Pipeline {
            registry: state.registry.clone(),
            store: state.store.clone(),
            toolchain: state.toolchain.clone(),
            acquirer: state.acquirer.clone(),
            separator: state.separator.clone(),
        };
        pipeline.run(job_id).await;
    });
}

/// POST /jobs — submit a URL for acquisition and separation.
pub async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    Json(body): Json<CreateJobRequest>,
) -> ApiResult<Response> {
    let ip = client_ip(&headers, Some(addr));
    check_rate_limit(&state, &ip)?;

    if body.url.trim().is_empty() {
        return Err(ApiError::new(ErrorCode::MissingUrl, "url is required"));
    }
    if !crate::acquirer::is_allowed_url(&body.url) {
        return Err(ApiError::new(ErrorCode::InvalidUrl, "url is not a supported source"));
    }
    admit_or_busy(&state)?;

    let job = Job::new(SourceType::Url, body.url, ip);
    let job = state.registry.create(job);
    spawn_pipeline(state, job.id);

    Ok((axum::http::StatusCode::CREATED, Json(job)).into_response())
}

/// POST /jobs/upload — submit a locally-uploaded media file.
pub async fn upload_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let ip = client_ip(&headers, Some(addr));
    check_rate_limit(&state, &ip)?;
    admit_or_busy(&state)?;

    let mut saved_path = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(ErrorCode::InvalidFormat, e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(|s| s.to_string()).ok_or_else(|| {
            ApiError::new(ErrorCode::MissingFile, "uploaded field has no file name")
        })?;
        if !crate::acquirer::has_allowed_upload_extension(&filename) {
            return Err(ApiError::new(
                ErrorCode::InvalidFileType,
                "unsupported upload file type",
            ));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(ErrorCode::InvalidFormat, e.to_string()))?;
        let max_bytes = state.config.max_file_size_mb * 1024 * 1024;
        if bytes.len() as u64 > max_bytes {
            return Err(ApiError::new(ErrorCode::FileTooLarge, "uploaded file exceeds size limit"));
        }

        let job_id = Uuid::new_v4();
        let upload_dir = state.store.upload_dir(job_id);
        tokio::fs::create_dir_all(&upload_dir)
            .await
            .map_err(ApiError::from)?;
        let dest = upload_dir.join(safe_filename(&filename));
        tokio::fs::write(&dest, &bytes).await.map_err(ApiError::from)?;
        saved_path = Some((job_id, dest));
        break;
    }

    let (job_id, path) = saved_path.ok_or_else(|| ApiError::new(ErrorCode::MissingFile, "no file field found"))?;

    let mut job = Job::new(SourceType::Upload, path.display().to_string(), ip);
    job.id = job_id;
    let job = state.registry.create(job);
    spawn_pipeline(state, job.id);

    Ok((axum::http::StatusCode::CREATED, Json(job)).into_response())
}

/// GET /jobs — list active and completed jobs.
pub async fn list_jobs(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (completed, active) = state.registry.list_all();
    Json(serde_json::json!({ "jobs": completed, "processing": active }))
}

pub fn lookup_job(state: &AppState, job_id: Uuid) -> ApiResult<Job> {
    state
        .registry
        .get(job_id)
        .ok_or_else(|| ApiError::new(ErrorCode::JobNotFound, "job not found"))
}

/// GET /jobs/{id}
pub async fn get_job(State(state): State<AppState>, AxPath(job_id): AxPath<Uuid>) -> ApiResult<Json<Job>> {
    Ok(Json(lookup_job(&state, job_id)?))
}

/// DELETE /jobs/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    AxPath(job_id): AxPath<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    lookup_job(&state, job_id)?;
    state.registry.delete(job_id);
    state.store.delete_job(job_id).await.map_err(ApiError::from)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// GET /jobs/{id}/tracks — list available stem names for a completed job.
pub async fn list_tracks(
    State(state): State<AppState>,
    AxPath(job_id): AxPath<Uuid>,
) -> ApiResult<Json<Vec<&'static str>>> {
    let job = lookup_job(&state, job_id)?;
    if job.status != crate::models::JobStatus::Completed {
        return Err(ApiError::new(ErrorCode::JobNotCompleted, "job has not completed"));
    }
    if !job.stems.all_present() {
        return Err(ApiError::new(ErrorCode::NoTracks, "job produced no tracks"));
    }
    Ok(Json(crate::separator::STEM_NAMES.to_vec()))
}

fn track_path(job: &Job, name: &str) -> ApiResult<std::path::PathBuf> {
    let path = match name {
        "drums" => job.stems.drums.clone(),
        "bass" => job.stems.bass.clone(),
        "other" => job.stems.other.clone(),
        "vocals" => job.stems.vocals.clone(),
        _ => return Err(ApiError::new(ErrorCode::InvalidTrack, "unknown track name")),
    };
    path.ok_or_else(|| ApiError::new(ErrorCode::TrackNotFound, "track not available for this job"))
}

/// GET /jobs/{id}/tracks/{name} and HEAD variant.
pub async fn get_track(
    State(state): State<AppState>,
    AxPath((job_id, name)): AxPath<(Uuid, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_track(state, job_id, name, headers, false).await
}

pub async fn head_track(
    State(state): State<AppState>,
    AxPath((job_id, name)): AxPath<(Uuid, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_track(state, job_id, name, headers, true).await
}

async fn serve_track(
    state: AppState,
    job_id: Uuid,
    name: String,
    headers: HeaderMap,
    head_only: bool,
) -> ApiResult<Response> {
    let job = lookup_job(&state, job_id)?;
    let path = track_path(&job, &name)?;
    Ok(crate::streaming::serve_file(&path, "audio/wav", &headers, head_only).await)
}

fn default_mix_path_and_mime(job: &Job) -> ApiResult<(std::path::PathBuf, &'static str)> {
    let path = job
        .default_mix_path
        .clone()
        .ok_or_else(|| ApiError::new(ErrorCode::NoResult, "job has no default mix yet"))?;
    let mime = if path.extension().and_then(|e| e.to_str()) == Some("wav") {
        "audio/wav"
    } else {
        "video/mp4"
    };
    Ok((path, mime))
}

/// GET /jobs/{id}/download — the default instrumental mix, served as an
/// attachment.
pub async fn download_default_mix(
    State(state): State<AppState>,
    AxPath(job_id): AxPath<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let job = lookup_job(&state, job_id)?;
    let (path, mime) = default_mix_path_and_mime(&job)?;
    let mut response = crate::streaming::serve_file(&path, mime, &headers, false).await;
    response.headers_mut().insert(
        axum::http::header::CONTENT_DISPOSITION,
        crate::streaming::content_disposition_attachment(&download_name(&job, &path)),
    );
    Ok(response)
}

/// Pretty, sanitized download filename: job title (or id) plus the
/// artifact's own extension (spec §6).
fn download_name(job: &Job, path: &std::path::Path) -> String {
    let stem = job.source_title.clone().unwrap_or_else(|| job.id.to_string());
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
    format!("{}.{ext}", safe_filename(&stem))
}

/// GET /jobs/{id}/stream and HEAD variant — same artifact as download,
/// range-streamed for inline playback (no attachment disposition).
pub async fn stream_default_mix(
    State(state): State<AppState>,
    AxPath(job_id): AxPath<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let job = lookup_job(&state, job_id)?;
    let (path, mime) = default_mix_path_and_mime(&job)?;
    Ok(crate::streaming::serve_file(&path, mime, &headers, false).await)
}

pub async fn head_default_mix(
    State(state): State<AppState>,
    AxPath(job_id): AxPath<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let job = lookup_job(&state, job_id)?;
    let (path, mime) = default_mix_path_and_mime(&job)?;
    Ok(crate::streaming::serve_file(&path, mime, &headers, true).await)
}
