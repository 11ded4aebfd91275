//! Media Toolchain Adapter (C2): uniform interface over the external
//! transcoder/demuxer (ffmpeg/ffprobe).
//!
//! Grounded on `essentia_client.rs`'s subprocess-invocation shape
//! (spawn, bounded timeout, stderr captured on failure, temp files
//! removed on every exit path) and on
//! `original_source/app/services/merger.py` /
//! `app/api/v1/ffmpeg.py` for exact argument shapes.

use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::models::Container;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const REMUX_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Bytes of stderr surfaced in error messages.
const STDERR_SNIPPET_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("external tool failed: {0}")]
    ExternalToolError(String),

    #[error("external tool timed out after {0:?}")]
    ToolTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse probe output: {0}")]
    ProbeParse(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeResult {
    pub duration_sec: f64,
    pub has_video: bool,
    pub has_audio: bool,
}

#[derive(Clone)]
pub struct Toolchain {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl Toolchain {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Toolchain {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    /// Probe(path) → duration + stream presence, via `ffprobe -show_streams -show_format`.
    pub async fn probe(&self, path: &Path) -> Result<ProbeResult, ToolchainError> {
        let mut cmd = Command::new(&self.ffprobe_bin);
        cmd.args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path);

        let output = run_with_timeout(cmd, PROBE_TIMEOUT).await?;
        let json: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ToolchainError::ProbeParse(e.to_string()))?;

        let duration_sec = json
            .get("format")
            .and_then(|f| f.get("duration"))
            .and_then(|d| d.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        let streams = json.get("streams").and_then(|s| s.as_array());
        let has_video = streams
            .map(|s| s.iter().any(|st| st.get("codec_type").and_then(|c| c.as_str()) == Some("video")))
            .unwrap_or(false);
        let has_audio = streams
            .map(|s| s.iter().any(|st| st.get("codec_type").and_then(|c| c.as_str()) == Some("audio")))
            .unwrap_or(false);

        Ok(ProbeResult {
            duration_sec,
            has_video,
            has_audio,
        })
    }

    /// ExtractAudio(video_path, out_wav_path): 44.1kHz stereo 16-bit PCM WAV.
    pub async fn extract_audio(
        &self,
        video_path: &Path,
        out_wav_path: &Path,
    ) -> Result<(), ToolchainError> {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-y", "-i"])
            .arg(video_path)
            .args(["-vn", "-ar", "44100", "-ac", "2", "-acodec", "pcm_s16le"])
            .arg(out_wav_path);

        run_and_cleanup_on_error(cmd, EXTRACT_TIMEOUT, &[out_wav_path]).await?;
        Ok(())
    }

    /// Remux(video_path, new_audio_path, out_path, container): copy video
    /// stream verbatim, encode replacement audio, truncate to shorter input.
    pub async fn remux(
        &self,
        video_path: &Path,
        new_audio_path: &Path,
        out_path: &Path,
        container: Container,
    ) -> Result<(), ToolchainError> {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-y", "-i"])
            .arg(video_path)
            .arg("-i")
            .arg(new_audio_path);

        match container {
            Container::Video => {
                cmd.args([
                    "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-b:a",
                    "192k", "-shortest",
                ]);
            }
            Container::Aac => {
                cmd.args(["-map", "1:a:0", "-vn", "-c:a", "aac", "-b:a", "192k"]);
            }
            Container::Mp3 => {
                cmd.args(["-map", "1:a:0", "-vn", "-c:a", "libmp3lame", "-b:a", "192k"]);
            }
            Container::Wav => {
                cmd.args(["-map", "1:a:0", "-vn", "-c:a", "pcm_s16le"]);
            }
        }
        cmd.arg(out_path);

        run_and_cleanup_on_error(cmd, REMUX_TIMEOUT, &[out_path]).await?;
        Ok(())
    }

    /// Encode an audio-only buffer already on disk (as a WAV) directly
    /// to the target container, without a video track. Used by the
    /// Remix Engine for audio-only containers.
    pub async fn encode_audio_only(
        &self,
        wav_path: &Path,
        out_path: &Path,
        container: Container,
    ) -> Result<(), ToolchainError> {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-y", "-i"]).arg(wav_path);
        match container {
            Container::Aac => {
                cmd.args(["-c:a", "aac", "-b:a", "192k"]);
            }
            Container::Mp3 => {
                cmd.args(["-c:a", "libmp3lame", "-b:a", "192k"]);
            }
            Container::Wav => {
                cmd.args(["-c:a", "pcm_s16le"]);
            }
            Container::Video => {
                return Err(ToolchainError::ExternalToolError(
                    "encode_audio_only called with video container".to_string(),
                ));
            }
        }
        cmd.arg(out_path);
        run_and_cleanup_on_error(cmd, REMUX_TIMEOUT, &[out_path]).await?;
        Ok(())
    }
}

async fn run_with_timeout(
    mut cmd: Command,
    bound: Duration,
) -> Result<std::process::Output, ToolchainError> {
    let output = timeout(bound, cmd.output())
        .await
        .map_err(|_| ToolchainError::ToolTimeout(bound))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let snippet: String = stderr.chars().take(STDERR_SNIPPET_LEN).collect();
        return Err(ToolchainError::ExternalToolError(snippet));
    }
    Ok(output)
}

/// Run a subprocess and, on failure (non-zero exit or timeout), remove
/// any partial output files before returning the error.
async fn run_and_cleanup_on_error(
    cmd: Command,
    bound: Duration,
    outputs_on_failure: &[&Path],
) -> Result<std::process::Output, ToolchainError> {
    match run_with_timeout(cmd, bound).await {
        Ok(out) => Ok(out),
        Err(e) => {
            for path in outputs_on_failure {
                let _ = tokio::fs::remove_file(path).await;
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_reports_external_tool_error_for_missing_binary() {
        let toolchain = Toolchain::new("ffmpeg-does-not-exist", "ffprobe-does-not-exist");
        let result = toolchain.probe(Path::new("/nonexistent.mp4")).await;
        assert!(result.is_err());
    }
}
