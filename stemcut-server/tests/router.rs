//! Router-level integration tests (spec §8 end-to-end scenarios),
//! grounded on `wkmp-ai`'s dev-dependency set for exercising a built
//! `Router` via `tower::ServiceExt::oneshot` instead of a live server.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use stemcut_common::config::AppConfig;
use stemcut_server::models::{Job, JobStatus, SourceType};
use stemcut_server::{build_router, AppState};
use tower::ServiceExt;

fn test_config(dir: &tempfile::TempDir, max_concurrent_jobs: usize) -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        results_dir: dir.path().join("results"),
        uploads_dir: dir.path().join("uploads"),
        max_concurrent_jobs,
        max_video_duration_seconds: 600,
        max_file_size_mb: 500,
        rate_limit_requests: 12,
        rate_limit_window_seconds: 3600,
        ffmpeg_bin: "ffmpeg".to_string(),
        ffprobe_bin: "ffprobe".to_string(),
        separator_bin: "demucs".to_string(),
        downloader_bin: "yt-dlp".to_string(),
        log_level: "info".to_string(),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_reports_all_features_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, 2);
    config.ensure_directories().unwrap();
    let state = AppState::new(config);
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["features"]["remix"], true);
    assert_eq!(body["features"]["bundles"], true);
}

#[tokio::test]
async fn submitting_a_job_at_capacity_returns_service_busy() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, 1);
    config.ensure_directories().unwrap();
    let state = AppState::new(config);
    state.registry.create(Job::new(
        SourceType::Url,
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
        "10.0.0.1".to_string(),
    ));
    let app = build_router(state);

    let addr: std::net::SocketAddr = "10.0.0.2:1234".parse().unwrap();
    let mut request = Request::builder()
        .method("POST")
        .uri("/api/v1/jobs")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ" }).to_string(),
        ))
        .unwrap();
    request
        .extensions_mut()
        .insert(axum::extract::ConnectInfo(addr));

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["code"], "SERVICE_BUSY");
}

#[tokio::test]
async fn ranged_stream_of_a_completed_jobs_default_mix_returns_206() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, 2);
    config.ensure_directories().unwrap();
    let state = AppState::new(config);

    let mut job = Job::new(SourceType::Url, "https://example.com/v".to_string(), "10.0.0.1".to_string());
    job.status = JobStatus::Completed;
    job.progress = 100;
    let mix_path = dir.path().join("mix.mp4");
    std::fs::write(&mix_path, vec![7u8; 4096]).unwrap();
    job.default_mix_path = Some(mix_path);
    let job = state.registry.create(job);

    let app = build_router(state);
    let request = Request::builder()
        .uri(format!("/api/v1/jobs/{}/stream", job.id))
        .header("range", "bytes=0-99")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get("content-range").unwrap(),
        "bytes 0-99/4096"
    );
    assert_eq!(response.headers().get("content-length").unwrap(), "100");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), 100);
}

#[tokio::test]
async fn get_job_for_unknown_id_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, 2);
    config.ensure_directories().unwrap();
    let state = AppState::new(config);
    let app = build_router(state);

    let request = Request::builder()
        .uri(format!("/api/v1/jobs/{}", uuid::Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_jobs_uses_the_documented_jobs_processing_keys() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, 2);
    config.ensure_directories().unwrap();
    let state = AppState::new(config);
    state.registry.create(Job::new(
        SourceType::Url,
        "https://example.com/v".to_string(),
        "10.0.0.1".to_string(),
    ));
    let app = build_router(state);

    let request = Request::builder().uri("/api/v1/jobs").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body.get("jobs").is_some());
    assert!(body.get("processing").is_some());
    assert_eq!(body["processing"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn download_of_a_completed_jobs_default_mix_sets_attachment_disposition() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, 2);
    config.ensure_directories().unwrap();
    let state = AppState::new(config);

    let mut job = Job::new(SourceType::Url, "https://example.com/v".to_string(), "10.0.0.1".to_string());
    job.status = JobStatus::Completed;
    job.source_title = Some("My Song".to_string());
    let mix_path = dir.path().join("output.mp4");
    std::fs::write(&mix_path, vec![7u8; 16]).unwrap();
    job.default_mix_path = Some(mix_path);
    let job = state.registry.create(job);

    let app = build_router(state);
    let request = Request::builder()
        .uri(format!("/api/v1/jobs/{}/download", job.id))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(disposition, "attachment; filename*=UTF-8''My%20Song.mp4");
}
