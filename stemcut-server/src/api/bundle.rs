//! Bundle export/import endpoints (spec §6, §4.9): build/download
//! archive bundles, import them with title-collision conflict
//! resolution.

use axum::extract::{Multipart, Path as AxPath, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::bundle::{BundleContents, StagedImport};
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::models::Job;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub job_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
struct ConflictView {
    conflict_id: Uuid,
    title: String,
}

/// POST /jobs/export
pub async fn export_jobs(
    State(state): State<AppState>,
    Json(body): Json<ExportRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.job_ids.is_empty() {
        return Err(ApiError::new(ErrorCode::BadBundle, "job_ids must not be empty"));
    }

    let mut jobs = Vec::with_capacity(body.job_ids.len());
    for id in &body.job_ids {
        let job = state
            .registry
            .get(*id)
            .ok_or_else(|| ApiError::new(ErrorCode::JobNotFound, format!("job {id} not found")))?;
        jobs.push(job);
    }

    let export_id = Uuid::new_v4();
    if jobs.len() == 1 {
        state.bundler.export_single(export_id, &jobs[0]).await
    } else {
        state.bundler.export_multi(export_id, &jobs).await
    }
    .map_err(|e| ApiError::new(ErrorCode::ExportFailed, e.to_string()))?;

    Ok(Json(json!({
        "download_url": format!("/api/v1/jobs/export/download/{export_id}"),
    })))
}

/// GET /jobs/export/download/{export_id}
pub async fn download_export(
    State(state): State<AppState>,
    AxPath(export_id): AxPath<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = state
        .store
        .find_export_file(export_id)
        .await
        .ok_or_else(|| ApiError::new(ErrorCode::ExportNotFound, "export not found"))?;
    Ok(crate::streaming::serve_file(&path, "application/zip", &headers, false).await)
}

async fn materialize_and_insert(
    state: &AppState,
    staged: StagedImport,
    title_override: Option<String>,
) -> Result<Job, String> {
    let job_id = Uuid::new_v4();
    let (stems, original_media_path) = state
        .bundler
        .materialize(job_id, &staged)
        .await
        .map_err(|e| e.to_string())?;

    let title = title_override.unwrap_or(staged.metadata.source_title);
    let mut job = Job::new_imported(
        title,
        staged.metadata.source_type,
        staged.metadata.original_duration,
        staged.metadata.sample_rate,
        stems,
        original_media_path,
    );
    job.id = job_id;
    Ok(state.registry.add_imported(job))
}

async fn stage_one(
    state: &AppState,
    staged: StagedImport,
    imported: &mut Vec<Job>,
    conflicts: &mut Vec<ConflictView>,
    errors: &mut Vec<String>,
) {
    if let Some(existing) = state.registry.find_by_title(&staged.metadata.source_title) {
        let conflict_id = Uuid::new_v4();
        let title = staged.metadata.source_title.clone();
        state
            .pending_imports
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                conflict_id,
                crate::PendingImport {
                    staged,
                    existing_job_id: existing.id,
                },
            );
        conflicts.push(ConflictView { conflict_id, title });
        return;
    }

    match materialize_and_insert(state, staged, None).await {
        Ok(job) => imported.push(job),
        Err(e) => errors.push(e),
    }
}

/// POST /jobs/import
pub async fn import_bundle(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut zip_bytes = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(ErrorCode::InvalidFormat, e.to_string()))?
    {
        if field.name() == Some("file") {
            zip_bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::new(ErrorCode::InvalidFormat, e.to_string()))?,
            );
            break;
        }
    }
    let bytes = zip_bytes.ok_or_else(|| ApiError::new(ErrorCode::InvalidFormat, "no file field found"))?;

    let tmp_file = tempfile::NamedTempFile::new().map_err(ApiError::from)?;
    tokio::fs::write(tmp_file.path(), &bytes).await.map_err(ApiError::from)?;

    let contents = state
        .bundler
        .import(tmp_file.path())
        .await
        .map_err(|e| ApiError::new(ErrorCode::BadBundle, e.to_string()))?;

    let staged_results: Vec<Result<StagedImport, String>> = match contents {
        BundleContents::Single(s) => vec![Ok(s)],
        BundleContents::Multi(v) => v,
    };

    let mut imported = Vec::new();
    let mut conflicts = Vec::new();
    let mut errors = Vec::new();

    for outcome in staged_results {
        match outcome {
            Err(e) => errors.push(e),
            Ok(staged) => stage_one(&state, staged, &mut imported, &mut conflicts, &mut errors).await,
        }
    }

    Ok(Json(json!({
        "imported": imported,
        "conflicts": conflicts,
        "errors": errors,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub action: String,
    pub new_title: Option<String>,
}

enum ResolveAction {
    Overwrite,
    Rename(String),
}

impl TryFrom<ResolveRequest> for ResolveAction {
    type Error = ApiError;

    fn try_from(req: ResolveRequest) -> Result<Self, ApiError> {
        match req.action.as_str() {
            "overwrite" => Ok(ResolveAction::Overwrite),
            "rename" => {
                let title = req
                    .new_title
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| ApiError::new(ErrorCode::MissingTitle, "new_title is required for rename"))?;
                Ok(ResolveAction::Rename(title))
            }
            other => Err(ApiError::new(ErrorCode::InvalidAction, format!("unknown action '{other}'"))),
        }
    }
}

/// POST /jobs/import/resolve/{conflict_id}
pub async fn resolve_conflict(
    State(state): State<AppState>,
    AxPath(conflict_id): AxPath<Uuid>,
    Json(body): Json<ResolveRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let action: ResolveAction = body.try_into()?;

    let pending = state
        .pending_imports
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .remove(&conflict_id)
        .ok_or_else(|| ApiError::new(ErrorCode::JobNotFound, "conflict not found"))?;

    let title_override = match &action {
        ResolveAction::Overwrite => None,
        ResolveAction::Rename(new_title) => {
            if state.registry.find_by_title(new_title).is_some() {
                return Err(ApiError::new(
                    ErrorCode::InvalidAction,
                    "new_title collides with an existing job",
                ));
            }
            Some(new_title.clone())
        }
    };

    if matches!(action, ResolveAction::Overwrite) {
        state.registry.delete(pending.existing_job_id);
        state
            .store
            .delete_job(pending.existing_job_id)
            .await
            .map_err(ApiError::from)?;
    }

    match materialize_and_insert(&state, pending.staged, title_override).await {
        Ok(job) => Ok(Json(json!({ "job": job }))),
        Err(e) => Ok(Json(json!({ "error": e }))),
    }
}
