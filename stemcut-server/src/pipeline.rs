//! Job Pipeline (C6): drives one job through Acquire → Extract →
//! Separate → Re-mux → Complete, updating the registry as it goes.
//!
//! Grounded on `original_source/app/workers/tasks.py`'s
//! `process_youtube_job`/`process_upload_job` stage math and
//! temp-dir-cleanup-in-`finally` shape, adapted to a `tokio::spawn`ed
//! task instead of an RQ worker.

use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::acquirer::Acquirer;
use crate::models::{Job, JobStatus, SourceType, StemPaths};
use crate::registry::Registry;
use crate::remix;
use crate::separator::Separator;
use crate::store::Store;
use crate::toolchain::Toolchain;

/// Map an inner stage percent (0-100) onto the job's outer progress range.
fn stage_progress(outer_base: u8, span: u8, inner_percent: u8) -> u8 {
    outer_base + ((inner_percent as u32 * span as u32) / 100) as u8
}

pub struct Pipeline {
    pub registry: Arc<Registry>,
    pub store: Arc<Store>,
    pub toolchain: Arc<Toolchain>,
    pub acquirer: Arc<Acquirer>,
    pub separator: Arc<Separator>,
}

impl Pipeline {
    /// Run one job to completion (or failure), cleaning up its temp
    /// directory on every exit path. Intended to be `tokio::spawn`ed.
    pub async fn run(&self, job_id: Uuid) {
        let job = match self.registry.get(job_id) {
            Some(j) => j,
            None => return,
        };

        let work_dir = match tempfile::Builder::new()
            .prefix(&format!("stemcut-job-{job_id}-"))
            .tempdir()
        {
            Ok(d) => d,
            Err(e) => {
                self.registry.fail(job_id, format!("could not allocate working directory: {e}"));
                return;
            }
        };

        if let Err(e) = self.run_inner(&job, work_dir.path().to_path_buf()).await {
            tracing::warn!(job_id = %job_id, error = %e, "job pipeline failed");
            self.registry.fail(job_id, e);
        }
        // `work_dir` drops here, removing the temp directory regardless
        // of which branch above ran.
    }

    async fn run_inner(&self, job: &Job, work_dir: PathBuf) -> Result<(), String> {
        let job_id = job.id;
        let is_upload = job.source_type == SourceType::Upload;

        // Stage: Acquire (0→20 url-path; instant for uploads).
        self.registry
            .update_progress(job_id, 0, "acquiring source", Some(JobStatus::Downloading));

        let acquired_path = if is_upload {
            let path = PathBuf::from(&job.source_locator);
            self.registry.update_progress(job_id, 20, "source ready", None);
            path
        } else {
            let registry = &self.registry;
            let progress = Box::new(move |pct: u8, stage: &str| {
                registry.update_progress(job_id, stage_progress(0, 20, pct), stage, None);
            });
            let acquired = self
                .acquirer
                .fetch_url(&job.source_locator, &work_dir, progress)
                .await
                .map_err(|e| e.to_string())?;
            self.registry
                .set_original_duration(job_id, acquired.duration_sec.map(|d| d as u32), acquired.title.clone());
            self.registry.update_progress(job_id, 20, "source acquired", None);
            acquired.path
        };

        // Stage: Extract (20→30 url-path; folded into the 20→70 span for uploads).
        let extracted_wav = work_dir.join("extracted.wav");
        self.toolchain
            .extract_audio(&acquired_path, &extracted_wav)
            .await
            .map_err(|e| e.to_string())?;
        let extract_outer = if is_upload { 20 } else { 30 };
        self.registry
            .update_progress(job_id, extract_outer, "extracting audio", Some(JobStatus::Separating));

        // Stage: Separate (30→70 url-path; 20→70 upload-path).
        let (separate_base, separate_span) = if is_upload { (20, 50) } else { (30, 40) };
        let probe = self.toolchain.probe(&acquired_path).await.ok();
        let sample_rate = 44100;
        let separate_dir = work_dir.join("stems");
        let registry = &self.registry;
        let progress = Box::new(move |pct: u8, stage: &str| {
            registry.update_progress(
                job_id,
                stage_progress(separate_base, separate_span, pct),
                stage,
                None,
            );
        });
        let separation = self
            .separator
            .separate(&extracted_wav, &separate_dir, sample_rate, progress)
            .await
            .map_err(|e| e.to_string())?;
        self.registry
            .update_progress(job_id, 70, "separation complete", Some(JobStatus::Merging));

        // Stage: Re-mux (70→95): produce the default instrumental mix
        // (drums+bass+other, no pitch shift) and copy artifacts into
        // permanent storage.
        self.store.ensure_job_dir(job_id).await.map_err(|e| e.to_string())?;
        let has_video = probe.map(|p| p.has_video).unwrap_or(false);

        let stems = StemPaths {
            drums: Some(self.store.result_path(job_id, "drums.wav")),
            bass: Some(self.store.result_path(job_id, "bass.wav")),
            other: Some(self.store.result_path(job_id, "other.wav")),
            vocals: Some(self.store.result_path(job_id, "vocals.wav")),
        };
        tokio::fs::copy(&separation.drums, stems.drums.as_ref().unwrap())
            .await
            .map_err(|e| e.to_string())?;
        tokio::fs::copy(&separation.bass, stems.bass.as_ref().unwrap())
            .await
            .map_err(|e| e.to_string())?;
        tokio::fs::copy(&separation.other, stems.other.as_ref().unwrap())
            .await
            .map_err(|e| e.to_string())?;
        tokio::fs::copy(&separation.vocals, stems.vocals.as_ref().unwrap())
            .await
            .map_err(|e| e.to_string())?;

        let original_media_path = if has_video {
            let dest = self.store.result_path(job_id, "original.mp4");
            tokio::fs::copy(&acquired_path, &dest).await.map_err(|e| e.to_string())?;
            Some(dest)
        } else {
            None
        };

        let default_mix_path = self
            .build_default_instrumental_mix(job_id, &separation, sample_rate, original_media_path.as_deref())
            .await
            .map_err(|e| e.to_string())?;

        self.registry.update_progress(job_id, 95, "re-muxing", None);

        self.registry.complete(
            job_id,
            stems,
            sample_rate,
            original_media_path,
            default_mix_path,
        );

        Ok(())
    }

    /// Sum the three background stems (no vocals, no pitch shift) and
    /// encode to the job's native container. Resolves spec's default-
    /// instrumental-mix Open Question by re-running the mixer rather
    /// than treating it as a fifth separator output (see DESIGN.md).
    async fn build_default_instrumental_mix(
        &self,
        job_id: Uuid,
        separation: &crate::separator::SeparationResult,
        sample_rate: u32,
        original_media_path: Option<&std::path::Path>,
    ) -> Result<PathBuf, remix::RemixError> {
        let drums = remix::read_wav(&separation.drums)?;
        let bass = remix::read_wav(&separation.bass)?;
        let other = remix::read_wav(&separation.other)?;
        let min_len = [drums.len(), bass.len(), other.len()].into_iter().min().unwrap_or(0);
        let mut mixed = vec![0.0f32; min_len];
        for i in 0..min_len {
            mixed[i] = drums[i] + bass[i] + other[i];
        }

        match original_media_path {
            Some(video) => {
                let out_path = self.store.result_path(job_id, "output.mp4");
                let tmp_wav = out_path.with_extension("tmp.wav");
                remix::write_wav(&tmp_wav, &mixed, sample_rate)?;
                let result = self
                    .toolchain
                    .remux(video, &tmp_wav, &out_path, crate::models::Container::Video)
                    .await;
                let _ = tokio::fs::remove_file(&tmp_wav).await;
                result?;
                Ok(out_path)
            }
            None => {
                let out_path = self.store.result_path(job_id, "output.wav");
                remix::write_wav(&out_path, &mixed, sample_rate)?;
                Ok(out_path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_progress_maps_inner_percent_onto_outer_span() {
        assert_eq!(stage_progress(30, 40, 0), 30);
        assert_eq!(stage_progress(30, 40, 50), 50);
        assert_eq!(stage_progress(30, 40, 100), 70);
        assert_eq!(stage_progress(70, 25, 100), 95);
    }
}
