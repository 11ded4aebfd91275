//! Job Registry (C5): in-memory catalog of jobs keyed by opaque ID.
//!
//! Grounded on `original_source/app/services/job_manager.py`'s
//! single-map-behind-a-lock shape, adapted from Redis to an in-process
//! `Mutex<HashMap>` per spec §9's Open Question resolution.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{Job, JobStatus};

pub struct Registry {
    jobs: Mutex<HashMap<Uuid, Job>>,
    max_concurrent_jobs: usize,
}

impl Registry {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Registry {
            jobs: Mutex::new(HashMap::new()),
            max_concurrent_jobs,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn create(&self, job: Job) -> Job {
        let mut jobs = self.lock();
        jobs.insert(job.id, job.clone());
        job
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.lock().get(&id).cloned()
    }

    pub fn delete(&self, id: Uuid) -> Option<Job> {
        self.lock().remove(&id)
    }

    /// Admission check: true iff fewer than `max_concurrent_jobs` jobs
    /// are in a non-terminal status.
    pub fn can_accept(&self) -> bool {
        let jobs = self.lock();
        let active = jobs.values().filter(|j| !j.status.is_terminal()).count();
        active < self.max_concurrent_jobs
    }

    /// Progress updates on a terminal job are silently dropped.
    pub fn update_progress(&self, id: Uuid, progress: u8, stage: &str, status: Option<JobStatus>) {
        let mut jobs = self.lock();
        if let Some(job) = jobs.get_mut(&id) {
            if job.status.is_terminal() {
                return;
            }
            job.progress = job.progress.max(progress);
            job.current_stage = stage.to_string();
            if let Some(status) = status {
                job.status = status;
            }
            job.updated_at = Utc::now();
        }
    }

    pub fn set_original_duration(&self, id: Uuid, duration: Option<u32>, title: Option<String>) {
        let mut jobs = self.lock();
        if let Some(job) = jobs.get_mut(&id) {
            if duration.is_some() {
                job.original_duration_seconds = duration;
            }
            if title.is_some() {
                job.source_title = title;
            }
            job.updated_at = Utc::now();
        }
    }

    pub fn complete(
        &self,
        id: Uuid,
        stems: crate::models::StemPaths,
        sample_rate: u32,
        original_media_path: Option<std::path::PathBuf>,
        default_mix_path: std::path::PathBuf,
    ) {
        let mut jobs = self.lock();
        if let Some(job) = jobs.get_mut(&id) {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.current_stage = "completed".to_string();
            job.stems = stems;
            job.sample_rate = Some(sample_rate);
            job.original_media_path = original_media_path;
            job.default_mix_path = Some(default_mix_path);
            let now = Utc::now();
            job.updated_at = now;
            job.completed_at = Some(now);
        }
    }

    pub fn fail(&self, id: Uuid, message: impl Into<String>) {
        let mut jobs = self.lock();
        if let Some(job) = jobs.get_mut(&id) {
            job.status = JobStatus::Failed;
            job.error_message = Some(message.into());
            let now = Utc::now();
            job.updated_at = now;
            job.completed_at = Some(now);
        }
    }

    pub fn add_imported(&self, job: Job) -> Job {
        self.create(job)
    }

    /// Partition by status, each sorted by `created_at` descending.
    pub fn list_all(&self) -> (Vec<Job>, Vec<Job>) {
        let jobs = self.lock();
        let mut completed: Vec<Job> = jobs
            .values()
            .filter(|j| j.status.is_terminal())
            .cloned()
            .collect();
        let mut active: Vec<Job> = jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect();
        completed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        (completed, active)
    }

    pub fn find_by_title(&self, title: &str) -> Option<Job> {
        self.lock()
            .values()
            .find(|j| j.source_title.as_deref() == Some(title))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn new_job() -> Job {
        Job::new(SourceType::Url, "https://example.com/v".to_string(), "1.2.3.4".to_string())
    }

    #[test]
    fn admission_respects_max_concurrent_jobs() {
        let registry = Registry::new(1);
        assert!(registry.can_accept());
        let job = registry.create(new_job());
        assert!(!registry.can_accept());
        registry.fail(job.id, "boom");
        assert!(registry.can_accept());
    }

    #[test]
    fn progress_updates_are_dropped_on_terminal_jobs() {
        let registry = Registry::new(5);
        let job = registry.create(new_job());
        registry.fail(job.id, "boom");
        registry.update_progress(job.id, 99, "ignored", None);
        let reloaded = registry.get(job.id).unwrap();
        assert_eq!(reloaded.progress, 0);
    }

    #[test]
    fn progress_is_monotonic_non_decreasing() {
        let registry = Registry::new(5);
        let job = registry.create(new_job());
        registry.update_progress(job.id, 40, "separating", None);
        registry.update_progress(job.id, 10, "stale update", None);
        let reloaded = registry.get(job.id).unwrap();
        assert_eq!(reloaded.progress, 40);
    }

    #[test]
    fn find_by_title_locates_collisions() {
        let registry = Registry::new(5);
        let mut job = new_job();
        job.source_title = Some("My Song".to_string());
        registry.create(job.clone());
        assert!(registry.find_by_title("My Song").is_some());
        assert!(registry.find_by_title("Other Song").is_none());
    }

    #[test]
    fn list_all_partitions_by_terminal_status() {
        let registry = Registry::new(5);
        let active = registry.create(new_job());
        let completed = registry.create(new_job());
        registry.fail(completed.id, "done failing");
        let (done, running) = registry.list_all();
        assert_eq!(done.len(), 1);
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, active.id);
    }
}
