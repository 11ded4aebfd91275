//! Tiered configuration resolution: CLI/env (via clap) → TOML file →
//! compiled defaults.
//!
//! Mirrors the root-folder priority order used elsewhere in this
//! workspace (CLI > ENV > TOML > compiled default), minus the database
//! tier — this service keeps no database.

use crate::{Error, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "stemcut-server", about = "Stem separation job service")]
pub struct CliArgs {
    /// Path to a TOML config file. Defaults to the platform config dir.
    #[arg(long, env = "STEMCUT_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "STEMCUT_BIND_ADDR")]
    pub bind_addr: Option<String>,

    #[arg(long, env = "STEMCUT_RESULTS_DIR")]
    pub results_dir: Option<PathBuf>,

    #[arg(long, env = "STEMCUT_UPLOADS_DIR")]
    pub uploads_dir: Option<PathBuf>,

    #[arg(long, env = "STEMCUT_MAX_CONCURRENT_JOBS")]
    pub max_concurrent_jobs: Option<usize>,

    #[arg(long, env = "STEMCUT_MAX_VIDEO_DURATION_SECONDS")]
    pub max_video_duration_seconds: Option<u64>,

    #[arg(long, env = "STEMCUT_MAX_FILE_SIZE_MB")]
    pub max_file_size_mb: Option<u64>,

    #[arg(long, env = "STEMCUT_RATE_LIMIT_REQUESTS")]
    pub rate_limit_requests: Option<u32>,

    #[arg(long, env = "STEMCUT_RATE_LIMIT_WINDOW_SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    #[arg(long, env = "STEMCUT_FFMPEG_BIN")]
    pub ffmpeg_bin: Option<String>,

    #[arg(long, env = "STEMCUT_FFPROBE_BIN")]
    pub ffprobe_bin: Option<String>,

    #[arg(long, env = "STEMCUT_SEPARATOR_BIN")]
    pub separator_bin: Option<String>,

    #[arg(long, env = "STEMCUT_DOWNLOADER_BIN")]
    pub downloader_bin: Option<String>,

    #[arg(long, env = "STEMCUT_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Shape of the on-disk TOML config file. Every field optional so a
/// partial file is valid; absent fields fall through to compiled
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub bind_addr: Option<String>,
    pub results_dir: Option<PathBuf>,
    pub uploads_dir: Option<PathBuf>,
    pub max_concurrent_jobs: Option<usize>,
    pub max_video_duration_seconds: Option<u64>,
    pub max_file_size_mb: Option<u64>,
    pub rate_limit_requests: Option<u32>,
    pub rate_limit_window_seconds: Option<u64>,
    pub ffmpeg_bin: Option<String>,
    pub ffprobe_bin: Option<String>,
    pub separator_bin: Option<String>,
    pub downloader_bin: Option<String>,
    pub log_level: Option<String>,
}

/// Fully resolved configuration used by the rest of the service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub results_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    pub max_video_duration_seconds: u64,
    pub max_file_size_mb: u64,
    pub rate_limit_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub separator_bin: String,
    pub downloader_bin: String,
    pub log_level: String,
}

impl AppConfig {
    /// Resolve from CLI args (which already fold in ENV via clap),
    /// falling back to an on-disk TOML file, falling back to compiled
    /// defaults. Missing or unparsable TOML is a warning, not a fatal
    /// error.
    pub fn resolve(cli: &CliArgs) -> Self {
        let toml = load_toml_config(cli.config.as_deref()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to compiled defaults for config");
            TomlConfig::default()
        });

        AppConfig {
            bind_addr: cli
                .bind_addr
                .clone()
                .or(toml.bind_addr)
                .unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            results_dir: cli
                .results_dir
                .clone()
                .or(toml.results_dir)
                .unwrap_or_else(default_results_dir),
            uploads_dir: cli
                .uploads_dir
                .clone()
                .or(toml.uploads_dir)
                .unwrap_or_else(default_uploads_dir),
            max_concurrent_jobs: cli
                .max_concurrent_jobs
                .or(toml.max_concurrent_jobs)
                .unwrap_or(2),
            max_video_duration_seconds: cli
                .max_video_duration_seconds
                .or(toml.max_video_duration_seconds)
                .unwrap_or(600),
            max_file_size_mb: cli.max_file_size_mb.or(toml.max_file_size_mb).unwrap_or(500),
            rate_limit_requests: cli
                .rate_limit_requests
                .or(toml.rate_limit_requests)
                .unwrap_or(12),
            rate_limit_window_seconds: cli
                .rate_limit_window_seconds
                .or(toml.rate_limit_window_seconds)
                .unwrap_or(3600),
            ffmpeg_bin: cli
                .ffmpeg_bin
                .clone()
                .or(toml.ffmpeg_bin)
                .unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_bin: cli
                .ffprobe_bin
                .clone()
                .or(toml.ffprobe_bin)
                .unwrap_or_else(|| "ffprobe".to_string()),
            separator_bin: cli
                .separator_bin
                .clone()
                .or(toml.separator_bin)
                .unwrap_or_else(|| "demucs".to_string()),
            downloader_bin: cli
                .downloader_bin
                .clone()
                .or(toml.downloader_bin)
                .unwrap_or_else(|| "yt-dlp".to_string()),
            log_level: cli
                .log_level
                .clone()
                .or(toml.log_level)
                .unwrap_or_else(|| "info".to_string()),
        }
    }

    /// Create the results/uploads directories if they do not exist.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.results_dir)?;
        std::fs::create_dir_all(&self.uploads_dir)?;
        std::fs::create_dir_all(self.results_dir.join("exports"))?;
        Ok(())
    }
}

fn load_toml_config(explicit_path: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => default_config_path(),
    };

    if !path.exists() {
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("stemcut").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("stemcut.toml"))
}

fn default_results_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("stemcut").join("results"))
        .unwrap_or_else(|| PathBuf::from("./stemcut_data/results"))
}

fn default_uploads_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("stemcut").join("uploads"))
        .unwrap_or_else(|| PathBuf::from("./stemcut_data/uploads"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_toml_and_default() {
        let mut cli = CliArgs::default();
        cli.max_concurrent_jobs = Some(9);
        let cfg = AppConfig::resolve(&cli);
        assert_eq!(cfg.max_concurrent_jobs, 9);
    }

    #[test]
    fn defaults_fill_all_fields_when_nothing_set() {
        let cli = CliArgs::default();
        let cfg = AppConfig::resolve(&cli);
        assert_eq!(cfg.rate_limit_requests, 12);
        assert_eq!(cfg.rate_limit_window_seconds, 3600);
        assert_eq!(cfg.max_video_duration_seconds, 600);
        assert_eq!(cfg.ffmpeg_bin, "ffmpeg");
    }

    #[test]
    fn missing_toml_file_is_not_fatal() {
        let toml = load_toml_config(Some(Path::new("/nonexistent/stemcut-test.toml"))).unwrap();
        assert!(toml.bind_addr.is_none());
    }
}
