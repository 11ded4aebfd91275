//! Bundle Exporter/Importer (C9): zip archives carrying a job's stems,
//! original media, and metadata; multi-job bundles nest single-job
//! zips.
//!
//! Grounded on `original_source/app/services/exporter.py` /
//! `importer.py` for the metadata.json shape and the single-vs-multi
//! detection rule; the `zip` crate itself has no counterpart in the
//! teacher's dependency stack, so it is imported per
//! `other_examples/muyuanjin-ffui` and
//! `other_examples/wingedonezero-Video-Sync-GUI`, the pack's examples
//! of archive I/O.

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::models::{BundleMetadata, Job, StemPaths, BUNDLE_METADATA_VERSION};
use crate::store::{safe_filename, Store};

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not a recognized bundle: {0}")]
    BadBundle(String),

    #[error(transparent)]
    Store(#[from] stemcut_common::Error),
}

/// A job's contents extracted from an archive, staged on disk, ready
/// to be turned into a `Job` once any title conflict is resolved.
#[derive(Debug, Clone)]
pub struct StagedImport {
    pub staging_id: Uuid,
    pub metadata: BundleMetadata,
    pub stems: StemPaths,
    pub original_media_path: Option<PathBuf>,
}

pub enum BundleContents {
    Single(StagedImport),
    /// One entry per nested archive; a parse failure in one song does
    /// not abort the rest of the batch (spec §4.9).
    Multi(Vec<Result<StagedImport, String>>),
}

pub struct Bundler {
    store: Store,
}

impl Bundler {
    pub fn new(store: Store) -> Self {
        Bundler { store }
    }

    pub async fn export_single(&self, export_id: Uuid, job: &Job) -> Result<PathBuf, BundleError> {
        let dir = self.store.ensure_export_dir(export_id).await?;
        let title = job.source_title.clone().unwrap_or_else(|| job.id.to_string());
        let out_path = dir.join(format!("{}.zip", safe_filename(&title)));

        let job = job.clone();
        let bytes = tokio::task::spawn_blocking(move || build_single_zip_bytes(&job))
            .await
            .expect("zip-writer task panicked")?;
        tokio::fs::write(&out_path, bytes).await?;
        Ok(out_path)
    }

    pub async fn export_multi(&self, export_id: Uuid, jobs: &[Job]) -> Result<PathBuf, BundleError> {
        let dir = self.store.ensure_export_dir(export_id).await?;
        let out_path = dir.join("bundle.zip");

        let jobs = jobs.to_vec();
        let bytes = tokio::task::spawn_blocking(move || build_multi_zip_bytes(&jobs))
            .await
            .expect("zip-writer task panicked")?;
        tokio::fs::write(&out_path, bytes).await?;
        Ok(out_path)
    }

    /// Read an archive and stage its contents under a fresh staging
    /// directory, without touching the registry. The caller decides
    /// whether any staged title collides with an existing job.
    pub async fn import(&self, zip_path: &Path) -> Result<BundleContents, BundleError> {
        let bytes = tokio::fs::read(zip_path).await?;
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || read_bundle(&bytes, &store))
            .await
            .expect("zip-reader task panicked")
    }

    /// Copy a staged import's files from its staging directory into a
    /// job's permanent directory, then remove the staging directory.
    pub async fn materialize(
        &self,
        job_id: Uuid,
        staged: &StagedImport,
    ) -> Result<(StemPaths, Option<PathBuf>), BundleError> {
        self.store.ensure_job_dir(job_id).await?;

        let mut stems = StemPaths::default();
        for (src, dest_name, dest_field) in [
            (&staged.stems.drums, "drums.wav", &mut stems.drums),
            (&staged.stems.bass, "bass.wav", &mut stems.bass),
            (&staged.stems.other, "other.wav", &mut stems.other),
            (&staged.stems.vocals, "vocals.wav", &mut stems.vocals),
        ] {
            if let Some(src) = src {
                let dest = self.store.result_path(job_id, dest_name);
                tokio::fs::copy(src, &dest).await?;
                *dest_field = Some(dest);
            }
        }

        let original_media_path = match &staged.original_media_path {
            Some(src) => {
                let dest = self.store.result_path(job_id, "original.mp4");
                tokio::fs::copy(src, &dest).await?;
                Some(dest)
            }
            None => None,
        };

        self.store.delete_import_staging_dir(staged.staging_id).await?;
        Ok((stems, original_media_path))
    }

    /// Discard a staged import's on-disk files without materializing
    /// them (e.g. the pending conflict was never resolved).
    pub async fn discard_staged(&self, staged: &StagedImport) -> Result<(), BundleError> {
        self.store.delete_import_staging_dir(staged.staging_id).await?;
        Ok(())
    }
}

fn build_single_zip_bytes(job: &Job) -> Result<Vec<u8>, BundleError> {
    let mut cursor = Cursor::new(Vec::new());
    write_single_zip_entries(&mut cursor, job)?;
    Ok(cursor.into_inner())
}

fn write_single_zip_entries<W: Write + std::io::Seek>(writer: W, job: &Job) -> Result<(), BundleError> {
    let mut zip = ZipWriter::new(writer);
    let options: FileOptions = FileOptions::default();

    let metadata = BundleMetadata {
        version: BUNDLE_METADATA_VERSION,
        source_title: job.source_title.clone().unwrap_or_else(|| job.id.to_string()),
        source_type: job.source_type,
        source_url: (job.source_type == crate::models::SourceType::Url)
            .then(|| job.source_locator.clone()),
        original_duration: job.original_duration_seconds,
        created_at: job.created_at,
        sample_rate: job.sample_rate,
    };
    zip.start_file("metadata.json", options)?;
    zip.write_all(serde_json::to_string_pretty(&metadata)?.as_bytes())?;

    for (name, path) in [
        ("stems/drums.wav", &job.stems.drums),
        ("stems/bass.wav", &job.stems.bass),
        ("stems/other.wav", &job.stems.other),
        ("stems/vocals.wav", &job.stems.vocals),
    ] {
        if let Some(path) = path {
            let contents = std::fs::read(path)?;
            zip.start_file(name, options)?;
            zip.write_all(&contents)?;
        }
    }

    if let Some(video_path) = &job.original_media_path {
        let contents = std::fs::read(video_path)?;
        zip.start_file("video.mp4", options)?;
        zip.write_all(&contents)?;
    }

    zip.finish()?;
    Ok(())
}

fn build_multi_zip_bytes(jobs: &[Job]) -> Result<Vec<u8>, BundleError> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut outer = ZipWriter::new(&mut cursor);
        let options: FileOptions = FileOptions::default();
        for job in jobs {
            let inner_bytes = build_single_zip_bytes(job)?;
            let title = job.source_title.clone().unwrap_or_else(|| job.id.to_string());
            outer.start_file(format!("{}.zip", safe_filename(&title)), options)?;
            outer.write_all(&inner_bytes)?;
        }
        outer.finish()?;
    }
    Ok(cursor.into_inner())
}

fn read_bundle(bytes: &[u8], store: &Store) -> Result<BundleContents, BundleError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let has_top_level_metadata = (0..archive.len()).any(|i| {
        archive
            .by_index(i)
            .map(|f| f.name() == "metadata.json")
            .unwrap_or(false)
    });

    if has_top_level_metadata {
        let staged = stage_single_from_archive(&mut archive, store)?;
        return Ok(BundleContents::Single(staged));
    }

    let nested_names: Vec<String> = (0..archive.len())
        .filter_map(|i| {
            archive
                .by_index(i)
                .ok()
                .map(|f| f.name().to_string())
                .filter(|n| n.ends_with(".zip"))
        })
        .collect();

    if nested_names.is_empty() {
        return Err(BundleError::BadBundle(
            "archive contains neither metadata.json nor nested .zip entries".to_string(),
        ));
    }

    let mut staged_imports = Vec::with_capacity(nested_names.len());
    for name in nested_names {
        let outcome = (|| -> Result<StagedImport, BundleError> {
            let mut inner_bytes = Vec::new();
            archive.by_name(&name)?.read_to_end(&mut inner_bytes)?;
            let mut inner_archive = ZipArchive::new(Cursor::new(inner_bytes))?;
            stage_single_from_archive(&mut inner_archive, store)
        })();
        staged_imports.push(outcome.map_err(|e| format!("{name}: {e}")));
    }
    Ok(BundleContents::Multi(staged_imports))
}

fn stage_single_from_archive<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    store: &Store,
) -> Result<StagedImport, BundleError> {
    let mut metadata_bytes = Vec::new();
    archive
        .by_name("metadata.json")?
        .read_to_end(&mut metadata_bytes)?;
    let metadata: BundleMetadata = serde_json::from_slice(&metadata_bytes)?;

    let staging_id = Uuid::new_v4();
    let staging_dir = store.import_staging_dir(staging_id);
    std::fs::create_dir_all(&staging_dir)?;

    let mut stems = StemPaths::default();
    for (entry_name, field) in [
        ("stems/drums.wav", &mut stems.drums),
        ("stems/bass.wav", &mut stems.bass),
        ("stems/other.wav", &mut stems.other),
        ("stems/vocals.wav", &mut stems.vocals),
    ] {
        if let Ok(mut file) = archive.by_name(entry_name) {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            let out = staging_dir.join(entry_name.rsplit('/').next().unwrap());
            std::fs::write(&out, buf)?;
            *field = Some(out);
        }
    }

    let original_media_path = if let Ok(mut file) = archive.by_name("video.mp4") {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let out = staging_dir.join("video.mp4");
        std::fs::write(&out, buf)?;
        Some(out)
    } else {
        None
    };

    Ok(StagedImport {
        staging_id,
        metadata,
        stems,
        original_media_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, SourceType};

    fn sample_job(tmp: &Path) -> Job {
        let mut job = Job::new(SourceType::Url, "https://example.com/v".to_string(), "1.2.3.4".to_string());
        job.source_title = Some("My Song".to_string());
        job.sample_rate = Some(44100);

        let drums = tmp.join("drums.wav");
        std::fs::write(&drums, b"fake-wav-bytes").unwrap();
        job.stems.drums = Some(drums);
        job
    }

    #[test]
    fn single_export_round_trips_through_import() {
        let tmp = tempfile::tempdir().unwrap();
        let job = sample_job(tmp.path());

        let bytes = build_single_zip_bytes(&job).unwrap();
        let store = Store::new(tmp.path().join("results"), tmp.path().join("uploads"));
        let contents = read_bundle(&bytes, &store).unwrap();

        match contents {
            BundleContents::Single(staged) => {
                assert_eq!(staged.metadata.source_title, "My Song");
                assert!(staged.stems.drums.is_some());
                assert!(staged.stems.bass.is_none());
            }
            BundleContents::Multi(_) => panic!("expected a single-job bundle"),
        }
    }

    #[test]
    fn multi_export_round_trips_each_job() {
        let tmp = tempfile::tempdir().unwrap();
        let mut job_a = sample_job(tmp.path());
        job_a.source_title = Some("Song A".to_string());
        let mut job_b = sample_job(tmp.path());
        job_b.source_title = Some("Song B".to_string());

        let bytes = build_multi_zip_bytes(&[job_a, job_b]).unwrap();
        let store = Store::new(tmp.path().join("results"), tmp.path().join("uploads"));
        let contents = read_bundle(&bytes, &store).unwrap();

        match contents {
            BundleContents::Multi(staged) => {
                assert_eq!(staged.len(), 2);
                assert!(staged.iter().all(|s| s.is_ok()));
            }
            BundleContents::Single(_) => panic!("expected a multi-job bundle"),
        }
    }

    #[test]
    fn unrecognized_archive_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().join("results"), tmp.path().join("uploads"));
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            zip.start_file("readme.txt", FileOptions::default()).unwrap();
            zip.write_all(b"not a bundle").unwrap();
            zip.finish().unwrap();
        }
        assert!(read_bundle(&cursor.into_inner(), &store).is_err());
    }
}
