//! Acquirer (C3): URL-fetch and direct-upload acquisition.
//!
//! The URL-site extractor itself is an opaque external collaborator
//! (spec §1); grounded on `original_source/app/services/youtube.py`'s
//! URL-validation regex, pre-fetch duration probe, and yt-dlp-primary /
//! HTTP-API-fallback shape. The primary backend shells out to an
//! external downloader binary using the same subprocess pattern as
//! `toolchain.rs`; the fallback backend performs a streaming HTTP GET
//! via `reqwest`.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const ALLOWED_UPLOAD_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("invalid source URL")]
    InvalidUrl,

    #[error("video duration {actual}s exceeds limit {limit}s")]
    DurationExceeded { actual: u64, limit: u64 },

    #[error("acquisition failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct AcquiredMedia {
    pub path: PathBuf,
    pub title: Option<String>,
    pub duration_sec: Option<u64>,
    pub thumbnail: Option<String>,
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").expect("static pattern is valid")
    })
}

pub fn is_allowed_url(url: &str) -> bool {
    url_pattern().is_match(url)
}

/// Progress callback: `(percent, stage_label)`.
pub type ProgressCallback<'a> = Box<dyn FnMut(u8, &str) + Send + 'a>;

#[derive(Clone)]
pub struct Acquirer {
    downloader_bin: String,
    fallback_api_url: String,
    max_duration_sec: u64,
}

impl Acquirer {
    pub fn new(downloader_bin: impl Into<String>, max_duration_sec: u64) -> Self {
        Acquirer {
            downloader_bin: downloader_bin.into(),
            fallback_api_url: "https://api.cobalt.tools/api/json".to_string(),
            max_duration_sec,
        }
    }

    /// URL backend: validate, pre-probe duration, fetch to `output_dir`.
    pub async fn fetch_url(
        &self,
        url: &str,
        output_dir: &Path,
        mut progress: ProgressCallback<'_>,
    ) -> Result<AcquiredMedia, AcquisitionError> {
        if !is_allowed_url(url) {
            return Err(AcquisitionError::InvalidUrl);
        }

        progress(0, "probing source");
        if let Some(duration) = self.probe_duration(url).await {
            if duration > self.max_duration_sec {
                return Err(AcquisitionError::DurationExceeded {
                    actual: duration,
                    limit: self.max_duration_sec,
                });
            }
        }

        tokio::fs::create_dir_all(output_dir).await?;

        match self.download_with_primary(url, output_dir, &mut progress).await {
            Ok(media) => Ok(media),
            Err(primary_err) => {
                tracing::warn!(error = %primary_err, "primary acquisition backend failed, trying fallback");
                progress(5, "switching to fallback acquisition backend");
                self.download_with_fallback(url, output_dir, &mut progress)
                    .await
                    .map_err(|fallback_err| {
                        AcquisitionError::Failed(format!(
                            "primary: {primary_err}; fallback: {fallback_err}"
                        ))
                    })
            }
        }
    }

    /// Upload backend: the HTTP layer has already materialized the
    /// file in the uploads directory after extension/size validation;
    /// this just wraps it in the common `AcquiredMedia` shape.
    pub fn from_uploaded_file(path: PathBuf) -> AcquiredMedia {
        AcquiredMedia {
            path,
            title: None,
            duration_sec: None,
            thumbnail: None,
        }
    }

    async fn probe_duration(&self, url: &str) -> Option<u64> {
        let output = Command::new(&self.downloader_bin)
            .args(["--print", "%(duration)s", "--skip-download"])
            .arg(url)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .ok()
            .map(|d| d.round() as u64)
    }

    async fn download_with_primary(
        &self,
        url: &str,
        output_dir: &Path,
        progress: &mut ProgressCallback<'_>,
    ) -> Result<AcquiredMedia, AcquisitionError> {
        progress(10, "downloading via primary backend");
        let out_template = output_dir.join("%(id)s.%(ext)s");
        let mut cmd = Command::new(&self.downloader_bin);
        cmd.arg("-o").arg(&out_template).arg(url);

        let output = timeout(DOWNLOAD_TIMEOUT, cmd.output())
            .await
            .map_err(|_| AcquisitionError::Failed("primary backend timed out".to_string()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AcquisitionError::Failed(stderr.chars().take(200).collect()));
        }
        progress(95, "download complete");

        let downloaded = first_file_in(output_dir).await?;
        Ok(AcquiredMedia {
            path: downloaded,
            title: None,
            duration_sec: None,
            thumbnail: None,
        })
    }

    async fn download_with_fallback(
        &self,
        url: &str,
        output_dir: &Path,
        progress: &mut ProgressCallback<'_>,
    ) -> Result<AcquiredMedia, AcquisitionError> {
        let client = reqwest::Client::new();
        let resp = client
            .post(&self.fallback_api_url)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| AcquisitionError::Failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AcquisitionError::Failed(e.to_string()))?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AcquisitionError::Failed(e.to_string()))?;
        let download_url = json
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AcquisitionError::Failed("fallback API returned no url".to_string()))?;

        progress(30, "downloading via fallback backend");
        let mut stream = client
            .get(download_url)
            .send()
            .await
            .map_err(|e| AcquisitionError::Failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AcquisitionError::Failed(e.to_string()))?;

        let out_path = output_dir.join("fallback_download.mp4");
        let mut file = tokio::fs::File::create(&out_path).await?;
        while let Some(chunk) = stream
            .chunk()
            .await
            .map_err(|e| AcquisitionError::Failed(e.to_string()))?
        {
            file.write_all(&chunk).await?;
        }
        progress(95, "download complete");

        Ok(AcquiredMedia {
            path: out_path,
            title: None,
            duration_sec: None,
            thumbnail: None,
        })
    }
}

async fn first_file_in(dir: &Path) -> Result<PathBuf, AcquisitionError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            return Ok(entry.path());
        }
    }
    Err(AcquisitionError::Failed(
        "download backend produced no file".to_string(),
    ))
}

pub fn has_allowed_upload_extension(filename: &str) -> bool {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    matches!(ext, Some(e) if ALLOWED_UPLOAD_EXTENSIONS.contains(&e.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_urls() {
        assert!(is_allowed_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_allowed_url("not a url"));
        assert!(!is_allowed_url("ftp://example.com/video.mp4"));
    }

    #[test]
    fn validates_upload_extensions() {
        assert!(has_allowed_upload_extension("clip.mp4"));
        assert!(has_allowed_upload_extension("CLIP.MKV"));
        assert!(!has_allowed_upload_extension("notes.txt"));
        assert!(!has_allowed_upload_extension("no_extension"));
    }
}
