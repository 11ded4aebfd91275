//! Bundle metadata schema (spec §3, §4.9), grounded on
//! `original_source/app/services/exporter.py`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub version: u32,
    pub source_title: String,
    pub source_type: super::job::SourceType,
    pub source_url: Option<String>,
    pub original_duration: Option<u32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub sample_rate: Option<u32>,
}

pub const BUNDLE_METADATA_VERSION: u32 = 1;
