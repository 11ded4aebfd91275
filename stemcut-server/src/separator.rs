//! Separator Adapter (C4): opaque interface to the stem-separation
//! model (spec §1 names this an external collaborator not specified
//! beyond its contract).
//!
//! Grounded on `original_source/app/services/separator.py` (four
//! fixed output names, lazy model load, `background = drums+bass+other`)
//! and on the subprocess-adapter shape of `toolchain.rs`/`essentia_client.rs`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

const SEPARATE_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const STDERR_SNIPPET_LEN: usize = 200;

pub const STEM_NAMES: [&str; 4] = ["drums", "bass", "other", "vocals"];

#[derive(Debug, Error)]
pub enum SeparationError {
    #[error("separation tool failed: {0}")]
    ToolError(String),

    #[error("separation timed out after {0:?}")]
    Timeout(Duration),

    #[error("separator produced no output for stem {0}")]
    MissingStem(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SeparationResult {
    pub drums: PathBuf,
    pub bass: PathBuf,
    pub other: PathBuf,
    pub vocals: PathBuf,
    pub sample_rate: u32,
}

impl SeparationResult {
    /// Sum of the three non-vocal stems, i.e. the default instrumental
    /// mix (spec §4.6 stage 4, §9 Open Question resolved: produced by
    /// re-running the mixer rather than a fifth separator output —
    /// see DESIGN.md).
    pub fn background(&self) -> [&Path; 3] {
        [&self.drums, &self.bass, &self.other]
    }
}

/// Progress callback: `(percent, stage_label)`, percent non-decreasing.
pub type ProgressCallback<'a> = Box<dyn FnMut(u8, &str) + Send + 'a>;

#[derive(Clone)]
pub struct Separator {
    binary: String,
}

impl Separator {
    pub fn new(binary: impl Into<String>) -> Self {
        Separator {
            binary: binary.into(),
        }
    }

    /// Given an input WAV and an output directory, produce the four
    /// named stems at the input's sample rate.
    ///
    /// Resource discipline: the model may be GPU-resident; callers are
    /// expected to serialize separation runs via the pipeline's
    /// admission bound rather than this adapter enforcing it itself.
    pub async fn separate(
        &self,
        input_wav: &Path,
        output_dir: &Path,
        sample_rate: u32,
        mut progress: ProgressCallback<'_>,
    ) -> Result<SeparationResult, SeparationError> {
        tokio::fs::create_dir_all(output_dir).await?;
        progress(0, "loading separation model");

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--out").arg(output_dir).arg(input_wav);

        let output = timeout(SEPARATE_TIMEOUT, cmd.output())
            .await
            .map_err(|_| SeparationError::Timeout(SEPARATE_TIMEOUT))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let snippet: String = stderr.chars().take(STDERR_SNIPPET_LEN).collect();
            return Err(SeparationError::ToolError(snippet));
        }
        progress(100, "separation complete");

        let mut paths = Vec::with_capacity(4);
        for name in STEM_NAMES {
            let path = output_dir.join(format!("{name}.wav"));
            if !path.exists() {
                return Err(SeparationError::MissingStem(name));
            }
            paths.push(path);
        }

        Ok(SeparationResult {
            drums: paths.remove(0),
            bass: paths.remove(0),
            other: paths.remove(0),
            vocals: paths.remove(0),
            sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_surfaces_as_tool_error() {
        let separator = Separator::new("no-such-separator-binary");
        let tmp = tempfile::tempdir().unwrap();
        let result = separator
            .separate(
                Path::new("/nonexistent.wav"),
                tmp.path(),
                44100,
                Box::new(|_, _| {}),
            )
            .await;
        assert!(result.is_err());
    }
}
