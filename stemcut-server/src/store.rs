//! Artifact Store (C1): on-disk layout for per-job inputs, stems,
//! re-mux outputs, and remix outputs.
//!
//! Grounded on `original_source/app/services/exporter.py`'s
//! `_safe_filename` sanitization and on the fixed on-disk layout
//! described in spec §4.1/§6.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use stemcut_common::Result;

/// Characters forbidden in filenames across common filesystems.
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone)]
pub struct Store {
    results_dir: PathBuf,
    uploads_dir: PathBuf,
}

impl Store {
    pub fn new(results_dir: PathBuf, uploads_dir: PathBuf) -> Self {
        Store {
            results_dir,
            uploads_dir,
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Directory holding all artifacts for one job. Created lazily by callers.
    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.results_dir.join(job_id.to_string())
    }

    /// Path for a named artifact within a job's directory. `name` is a
    /// bare filename supplied by internal callers, never an absolute
    /// path or one containing traversal components — this is the only
    /// way callers reach the filesystem, so no path coming from an
    /// external caller can escape `results_dir`.
    pub fn result_path(&self, job_id: Uuid, name: &str) -> PathBuf {
        debug_assert!(!name.contains(".."), "artifact name must not traverse");
        self.job_dir(job_id).join(name)
    }

    pub fn upload_dir(&self, job_id: Uuid) -> PathBuf {
        self.uploads_dir.join(job_id.to_string())
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.results_dir.join("exports")
    }

    pub fn export_dir(&self, export_id: Uuid) -> PathBuf {
        self.exports_dir().join(export_id.to_string())
    }

    pub async fn ensure_job_dir(&self, job_id: Uuid) -> Result<PathBuf> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub async fn ensure_export_dir(&self, export_id: Uuid) -> Result<PathBuf> {
        let dir = self.export_dir(export_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Scratch directory a pending bundle import is staged into while
    /// awaiting conflict resolution.
    pub fn import_staging_dir(&self, staging_id: Uuid) -> PathBuf {
        self.uploads_dir.join("imports").join(staging_id.to_string())
    }

    pub async fn ensure_import_staging_dir(&self, staging_id: Uuid) -> Result<PathBuf> {
        let dir = self.import_staging_dir(staging_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub async fn delete_import_staging_dir(&self, staging_id: Uuid) -> Result<()> {
        let dir = self.import_staging_dir(staging_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Recursively remove a job's directory. Idempotent: removing an
    /// already-absent directory is not an error.
    pub async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        let dir = self.job_dir(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    /// Find a job artifact whose filename starts with `prefix` (used to
    /// recover a remix output by cache key alone, without knowing the
    /// container extension).
    pub async fn find_by_prefix(&self, job_id: Uuid, prefix: &str) -> Option<PathBuf> {
        let dir = self.job_dir(job_id);
        let mut entries = tokio::fs::read_dir(&dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(prefix) {
                return Some(entry.path());
            }
        }
        None
    }

    /// The single `.zip` file under an export directory, if any.
    pub async fn find_export_file(&self, export_id: Uuid) -> Option<PathBuf> {
        let dir = self.export_dir(export_id);
        let mut entries = tokio::fs::read_dir(&dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(".zip") {
                return Some(entry.path());
            }
        }
        None
    }

    pub async fn size_of(&self, path: &Path) -> Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }
}

/// Sanitize a user-supplied title for use as a filename: strip
/// characters forbidden across common filesystems, truncate to 100
/// code points, fall back to `untitled` if the result is empty.
pub fn safe_filename(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let truncated: String = cleaned.chars().take(100).collect();
    let trimmed = truncated.trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_forbidden_characters() {
        assert_eq!(safe_filename("a/b:c*d?"), "a_b_c_d_");
    }

    #[test]
    fn falls_back_to_untitled_when_empty() {
        assert_eq!(safe_filename(""), "untitled");
        assert_eq!(safe_filename("   "), "untitled");
        assert_eq!(safe_filename("///"), "___");
    }

    #[test]
    fn truncates_to_100_code_points() {
        let long = "x".repeat(250);
        assert_eq!(safe_filename(&long).chars().count(), 100);
    }

    #[tokio::test]
    async fn delete_job_is_idempotent_on_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().join("results"), tmp.path().join("uploads"));
        store.delete_job(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn job_dir_round_trips_through_ensure_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().join("results"), tmp.path().join("uploads"));
        let job_id = Uuid::new_v4();
        let dir = store.ensure_job_dir(job_id).await.unwrap();
        assert!(dir.exists());
        store.delete_job(job_id).await.unwrap();
        assert!(!dir.exists());
    }
}
