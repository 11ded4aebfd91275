//! Job data model.
//!
//! Grounded on `original_source/app/models/job.py`, adapted to the
//! status model of spec §3 (the Python model's extra `MIXING` value is
//! not adopted — see DESIGN.md).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Url,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Downloading,
    Separating,
    Merging,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Stem file paths for a completed (or imported) job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StemPaths {
    pub drums: Option<PathBuf>,
    pub bass: Option<PathBuf>,
    pub other: Option<PathBuf>,
    pub vocals: Option<PathBuf>,
}

impl StemPaths {
    pub fn all_present(&self) -> bool {
        self.drums.is_some() && self.bass.is_some() && self.other.is_some() && self.vocals.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub source_type: SourceType,
    /// URL for `SourceType::Url`, stored input path for `SourceType::Upload`.
    pub source_locator: String,
    pub source_title: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub current_stage: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Client IP used for rate-limit accounting (spec §3).
    pub client_ip: String,
    pub original_duration_seconds: Option<u32>,
    pub sample_rate: Option<u32>,
    pub stems: StemPaths,
    pub original_media_path: Option<PathBuf>,
    pub default_mix_path: Option<PathBuf>,
}

impl Job {
    pub fn new(source_type: SourceType, source_locator: String, client_ip: String) -> Self {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            source_type,
            source_locator,
            source_title: None,
            status: JobStatus::Pending,
            progress: 0,
            current_stage: "queued".to_string(),
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            client_ip,
            original_duration_seconds: None,
            sample_rate: None,
            stems: StemPaths::default(),
            original_media_path: None,
            default_mix_path: None,
        }
    }

    /// Build a job already in `COMPLETED` status, as produced by bundle import.
    pub fn new_imported(
        source_title: String,
        source_type: SourceType,
        original_duration_seconds: Option<u32>,
        sample_rate: Option<u32>,
        stems: StemPaths,
        original_media_path: Option<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            source_type,
            source_locator: String::new(),
            source_title: Some(source_title),
            status: JobStatus::Completed,
            progress: 100,
            current_stage: "imported".to_string(),
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
            client_ip: String::new(),
            original_duration_seconds,
            sample_rate,
            stems,
            original_media_path,
            default_mix_path: None,
        }
    }
}
