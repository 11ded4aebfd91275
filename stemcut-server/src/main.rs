//! stemcut-server entry point: parse config, wire `AppState`, serve the
//! `/api/v1` router (spec §6).

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stemcut_common::config::{AppConfig, CliArgs};
use stemcut_server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();
    let config = AppConfig::resolve(&cli);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("stemcut_server={},tower_http=info", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting stemcut-server");
    config.ensure_directories()?;
    info!(
        results_dir = %config.results_dir.display(),
        uploads_dir = %config.uploads_dir.display(),
        max_concurrent_jobs = config.max_concurrent_jobs,
        "configuration resolved"
    );

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
