//! stemcut-server: job orchestration and stem-mix cache for audio/video
//! stem separation (spec §1-§2).
//!
//! Grounded on `wkmp-ai`'s module layout (`api/`, `models/`, a shared
//! `AppState`) generalized from a MusicBrainz ingest microservice to
//! this crate's job/remix/bundle domain.

pub mod acquirer;
pub mod api;
pub mod bundle;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod registry;
pub mod remix;
pub mod separator;
pub mod store;
pub mod streaming;
pub mod toolchain;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use acquirer::Acquirer;
use bundle::{Bundler, StagedImport};
use rate_limit::RateLimiter;
use registry::Registry;
use remix::RemixEngine;
use separator::Separator;
use stemcut_common::config::AppConfig;
use store::Store;
use toolchain::Toolchain;

/// A staged bundle import awaiting a conflict-resolution decision
/// (spec §4.9): the decoded-but-not-yet-written job, plus the job it
/// collided with by title.
pub struct PendingImport {
    pub staged: StagedImport,
    pub existing_job_id: Uuid,
}

/// Process-wide state shared across handlers, built once at startup
/// and injected via axum's `State` extractor rather than module
/// globals (spec §9).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<Registry>,
    pub store: Arc<Store>,
    pub toolchain: Arc<Toolchain>,
    pub acquirer: Arc<Acquirer>,
    pub separator: Arc<Separator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub remix: Arc<RemixEngine>,
    pub bundler: Arc<Bundler>,
    pub pending_imports: Arc<Mutex<HashMap<Uuid, PendingImport>>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let store = Arc::new(Store::new(config.results_dir.clone(), config.uploads_dir.clone()));
        let toolchain = Arc::new(Toolchain::new(config.ffmpeg_bin.clone(), config.ffprobe_bin.clone()));
        AppState {
            registry: Arc::new(Registry::new(config.max_concurrent_jobs)),
            acquirer: Arc::new(Acquirer::new(
                config.downloader_bin.clone(),
                config.max_video_duration_seconds,
            )),
            separator: Arc::new(Separator::new(config.separator_bin.clone())),
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_window_seconds,
            )),
            remix: Arc::new(RemixEngine::new((*store).clone(), (*toolchain).clone())),
            bundler: Arc::new(Bundler::new((*store).clone())),
            store,
            toolchain,
            config: Arc::new(config),
            pending_imports: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Build the `/api/v1` router (spec §6).
pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = (state.config.max_file_size_mb as usize) * 1024 * 1024;

    let v1 = Router::new()
        .route("/jobs", post(api::jobs::create_job))
        .route("/jobs", get(api::jobs::list_jobs))
        .route(
            "/jobs/upload",
            post(api::jobs::upload_job).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .route("/jobs/export", post(api::bundle::export_jobs))
        .route("/jobs/export/download/:export_id", get(api::bundle::download_export))
        .route(
            "/jobs/import",
            post(api::bundle::import_bundle).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .route("/jobs/import/resolve/:conflict_id", post(api::bundle::resolve_conflict))
        .route(
            "/jobs/:id",
            get(api::jobs::get_job).delete(api::jobs::delete_job),
        )
        .route("/jobs/:id/download", get(api::jobs::download_default_mix))
        .route(
            "/jobs/:id/stream",
            get(api::jobs::stream_default_mix).head(api::jobs::head_default_mix),
        )
        .route("/jobs/:id/tracks", get(api::jobs::list_tracks))
        .route(
            "/jobs/:id/tracks/:name",
            get(api::jobs::get_track).head(api::jobs::head_track),
        )
        .route("/jobs/:id/mix", post(api::mix::request_mix))
        .route("/jobs/:id/mix/:mix_id", get(api::mix::mix_status))
        .route("/jobs/:id/mix/:mix_id/download", get(api::mix::download_mix));

    Router::new()
        .route("/health", get(api::health::health_check))
        .nest("/api/v1", v1)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
