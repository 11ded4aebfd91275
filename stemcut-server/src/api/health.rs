//! GET /health — liveness and advertised feature flags (spec §6).

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub features: Features,
}

#[derive(Debug, Serialize)]
pub struct Features {
    pub url_acquisition: bool,
    pub upload_acquisition: bool,
    pub remix: bool,
    pub bundles: bool,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        features: Features {
            url_acquisition: true,
            upload_acquisition: true,
            remix: true,
            bundles: true,
        },
    })
}
