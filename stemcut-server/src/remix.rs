//! Remix Engine (C7): mixes cached stems with per-stem gains, optional
//! pitch shift, and a target container; deterministic cache key;
//! single-flight per key.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Container, Job, MixSettings, MixStatus, MixTask};
use crate::store::Store;
use crate::toolchain::Toolchain;

#[derive(Debug, Error)]
pub enum RemixError {
    #[error("job has no stems available")]
    NoStems,

    #[error("failed to read stem: {0}")]
    StemRead(String),

    #[error("encode failed: {0}")]
    Encode(#[from] crate::toolchain::ToolchainError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Deterministic key over `(job_id, rounded gains, pitch, container)`.
pub fn mix_key(job_id: Uuid, settings: &MixSettings) -> String {
    let (d, b, o, v) = settings.rounded_gains();
    let mut hasher = Sha256::new();
    hasher.update(job_id.as_bytes());
    hasher.update(d.to_le_bytes());
    hasher.update(b.to_le_bytes());
    hasher.update(o.to_le_bytes());
    hasher.update(v.to_le_bytes());
    hasher.update(settings.pitch_semitones.to_le_bytes());
    hasher.update([settings.container as u8]);
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

pub struct RemixEngine {
    store: Store,
    toolchain: Toolchain,
    in_flight: Mutex<HashMap<String, MixTask>>,
}

pub struct MixOutcome {
    pub mix_id: String,
    pub status: MixStatus,
    pub progress: u8,
    pub cached: bool,
    /// True iff this call created the in-flight entry, i.e. the caller
    /// owns starting the worker. A joining concurrent request sees
    /// `false` and must not spawn a second worker for the same key.
    pub should_run: bool,
}

impl RemixEngine {
    pub fn new(store: Store, toolchain: Toolchain) -> Self {
        RemixEngine {
            store,
            toolchain,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn flight_key(job_id: Uuid, key: &str) -> String {
        format!("{job_id}:{key}")
    }

    pub fn output_path(&self, job_id: Uuid, key: &str, container: Container) -> PathBuf {
        self.store
            .result_path(job_id, &format!("mix_{key}.{}", container.extension()))
    }

    /// Enqueue (or join) a remix request. Returns immediately with the
    /// key and current status; the actual mix runs on a spawned task.
    pub async fn request(&self, job: &Job, settings: MixSettings) -> MixOutcome {
        let key = mix_key(job.id, &settings);
        let out_path = self.output_path(job.id, &key, settings.container);

        if self.store.exists(&out_path).await {
            return MixOutcome {
                mix_id: key,
                status: MixStatus::Completed,
                progress: 100,
                cached: true,
                should_run: false,
            };
        }

        let flight_key = Self::flight_key(job.id, &key);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(task) = in_flight.get(&flight_key) {
            return MixOutcome {
                mix_id: key,
                status: task.status,
                progress: task.progress,
                cached: false,
                should_run: false,
            };
        }

        in_flight.insert(
            flight_key,
            MixTask {
                mix_key: key.clone(),
                job_id: job.id,
                status: MixStatus::Processing,
                progress: 0,
                error_message: None,
                output_path: None,
            },
        );

        MixOutcome {
            mix_id: key,
            status: MixStatus::Processing,
            progress: 0,
            cached: false,
            should_run: true,
        }
    }

    pub fn status(&self, job_id: Uuid, key: &str) -> Option<MixTask> {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&Self::flight_key(job_id, key))
            .cloned()
    }

    fn set_progress(&self, job_id: Uuid, key: &str, progress: u8) {
        if let Some(task) = self
            .in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(&Self::flight_key(job_id, key))
        {
            task.progress = progress;
        }
    }

    fn finish_ok(&self, job_id: Uuid, key: &str, path: PathBuf) {
        if let Some(task) = self
            .in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(&Self::flight_key(job_id, key))
        {
            task.status = MixStatus::Completed;
            task.progress = 100;
            task.output_path = Some(path);
        }
    }

    async fn finish_err(&self, job_id: Uuid, key: &str, message: String, partial: &Path) {
        let _ = tokio::fs::remove_file(partial).await;
        if let Some(task) = self
            .in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(&Self::flight_key(job_id, key))
        {
            task.status = MixStatus::Failed;
            task.error_message = Some(message);
        }
    }

    /// Perform the actual mix. Intended to run on a spawned task after
    /// `request` has registered the in-flight entry.
    pub async fn run(&self, job: &Job, settings: MixSettings) {
        let key = mix_key(job.id, &settings);
        let out_path = self.output_path(job.id, &key, settings.container);

        if let Err(e) = self.mix_and_encode(job, &settings, &out_path).await {
            tracing::warn!(job_id = %job.id, mix_key = %key, error = %e, "remix failed");
            self.finish_err(job.id, &key, e.to_string(), &out_path).await;
            return;
        }
        self.finish_ok(job.id, &key, out_path);
    }

    async fn mix_and_encode(
        &self,
        job: &Job,
        settings: &MixSettings,
        out_path: &Path,
    ) -> Result<(), RemixError> {
        let key = mix_key(job.id, settings);
        self.set_progress(job.id, &key, 5);

        if !job.stems.all_present() {
            return Err(RemixError::NoStems);
        }

        let drums = read_wav(job.stems.drums.as_ref().unwrap())?;
        let bass = read_wav(job.stems.bass.as_ref().unwrap())?;
        let other = read_wav(job.stems.other.as_ref().unwrap())?;
        let vocals = read_wav(job.stems.vocals.as_ref().unwrap())?;
        self.set_progress(job.id, &key, 30);

        let sample_rate = job.sample_rate.unwrap_or(44100);
        let min_len = [&drums, &bass, &other, &vocals]
            .iter()
            .map(|s| s.len())
            .min()
            .unwrap_or(0);

        let mut mixed = vec![0.0f32; min_len];
        for i in 0..min_len {
            mixed[i] = drums[i] * settings.drums
                + bass[i] * settings.bass
                + other[i] * settings.other
                + vocals[i] * settings.vocals;
        }
        self.set_progress(job.id, &key, 50);

        if settings.pitch_semitones != 0 {
            mixed = pitch_shift(&mixed, sample_rate, settings.pitch_semitones);
        }
        self.set_progress(job.id, &key, 70);

        tokio::fs::create_dir_all(out_path.parent().unwrap_or(Path::new("."))).await?;

        match settings.container {
            Container::Wav => {
                write_wav(out_path, &mixed, sample_rate)?;
            }
            Container::Mp3 | Container::Aac => {
                let tmp_wav = out_path.with_extension("tmp.wav");
                write_wav(&tmp_wav, &mixed, sample_rate)?;
                let result = self
                    .toolchain
                    .encode_audio_only(&tmp_wav, out_path, settings.container)
                    .await;
                let _ = tokio::fs::remove_file(&tmp_wav).await;
                result?;
            }
            Container::Video => {
                let original = job
                    .original_media_path
                    .as_ref()
                    .ok_or(RemixError::NoStems)?;
                let tmp_wav = out_path.with_extension("tmp.wav");
                write_wav(&tmp_wav, &mixed, sample_rate)?;
                let result = self
                    .toolchain
                    .remux(original, &tmp_wav, out_path, Container::Video)
                    .await;
                let _ = tokio::fs::remove_file(&tmp_wav).await;
                result?;
            }
        }
        self.set_progress(job.id, &key, 95);
        Ok(())
    }
}

pub(crate) fn read_wav(path: &Path) -> Result<Vec<f32>, RemixError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| RemixError::StemRead(e.to_string()))?;
    let spec = reader.spec();
    let samples: Result<Vec<f32>, _> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
        hound::SampleFormat::Int => {
            // hound sign-extends to i32 at the file's native bit depth,
            // it does not rescale to i32's own range. Scale by the
            // format's own max magnitude (i16::MAX for 16-bit),
            // mirroring write_wav's inverse multiplication.
            let scale = ((1i64 << (spec.bits_per_sample - 1)) - 1) as f32;
            reader.samples::<i32>().map(|s| s.map(|v| v as f32 / scale)).collect()
        }
    };
    samples.map_err(|e| RemixError::StemRead(e.to_string()))
}

pub(crate) fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), RemixError> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| RemixError::StemRead(e.to_string()))?;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer
            .write_sample((clamped * i16::MAX as f32) as i16)
            .map_err(|e| RemixError::StemRead(e.to_string()))?;
    }
    writer.finalize().map_err(|e| RemixError::StemRead(e.to_string()))?;
    Ok(())
}

const PITCH_HOP: usize = 128;

/// Pitch shift in semitones with tempo preserved: each channel runs
/// through its own STFT phase-vocoder shifter in fixed 128-sample
/// hops, `out_samples` pinned to the hop size so the speed factor
/// (`hop / out_samples`) stays 1.0 and only pitch moves.
fn pitch_shift(interleaved: &[f32], sample_rate: u32, semitones: i32) -> Vec<f32> {
    let frames = interleaved.len() / 2;
    let mut left = vec![0.0f32; frames];
    let mut right = vec![0.0f32; frames];
    for i in 0..frames {
        left[i] = interleaved[i * 2];
        right[i] = interleaved[i * 2 + 1];
    }

    let left = shift_channel(&left, sample_rate, semitones);
    let right = shift_channel(&right, sample_rate, semitones);

    let mut out = vec![0.0f32; frames * 2];
    for i in 0..frames {
        out[i * 2] = left[i];
        out[i * 2 + 1] = right[i];
    }
    out
}

fn shift_channel(mono: &[f32], sample_rate: u32, semitones: i32) -> Vec<f32> {
    use pitch_shift::{Shifter, TOTAL_F32};

    let state: Box<[f32; TOTAL_F32]> = vec![0.0f32; TOTAL_F32].into_boxed_slice().try_into().unwrap();
    let mut shifter = Shifter::new(state);

    let mut out = Vec::with_capacity(mono.len() + PITCH_HOP);
    let mut pos = 0;
    while pos < mono.len() {
        let mut chunk = [0.0f32; PITCH_HOP];
        let take = (mono.len() - pos).min(PITCH_HOP);
        chunk[..take].copy_from_slice(&mono[pos..pos + take]);
        let shifted = shifter.shift(&chunk, semitones as f32, PITCH_HOP, sample_rate as f32);
        out.extend_from_slice(shifted);
        pos += PITCH_HOP;
    }
    out.truncate(mono.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn settings(container: Container) -> MixSettings {
        MixSettings {
            drums: 1.0,
            bass: 1.0,
            other: 1.0,
            vocals: 0.0,
            pitch_semitones: 0,
            container,
        }
    }

    #[test]
    fn mix_key_is_stable_for_identical_settings() {
        let job_id = Uuid::new_v4();
        let a = mix_key(job_id, &settings(Container::Video));
        let b = mix_key(job_id, &settings(Container::Video));
        assert_eq!(a, b);
    }

    #[test]
    fn mix_key_changes_with_any_input() {
        let job_id = Uuid::new_v4();
        let base = mix_key(job_id, &settings(Container::Video));
        let mut changed = settings(Container::Video);
        changed.vocals = 0.5;
        assert_ne!(base, mix_key(job_id, &changed));

        let mut changed_container = settings(Container::Mp3);
        changed_container.vocals = 0.0;
        assert_ne!(base, mix_key(job_id, &changed_container));

        assert_ne!(base, mix_key(Uuid::new_v4(), &settings(Container::Video)));
    }

    #[test]
    fn rounding_collapses_near_identical_gains() {
        let job_id = Uuid::new_v4();
        let mut a = settings(Container::Video);
        a.drums = 1.001;
        let mut b = settings(Container::Video);
        b.drums = 1.004;
        assert_eq!(mix_key(job_id, &a), mix_key(job_id, &b));
    }

    #[tokio::test]
    async fn request_reports_cached_when_output_already_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().join("results"), tmp.path().join("uploads"));
        let toolchain = Toolchain::new("ffmpeg", "ffprobe");
        let engine = RemixEngine::new(store.clone(), toolchain);

        let job = Job::new(SourceType::Url, "https://x".to_string(), "1.1.1.1".to_string());
        let settings = settings(Container::Wav);
        let key = mix_key(job.id, &settings);
        let out_path = engine.output_path(job.id, &key, settings.container);
        tokio::fs::create_dir_all(out_path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&out_path, b"fake").await.unwrap();

        let outcome = engine.request(&job, settings).await;
        assert!(outcome.cached);
        assert_eq!(outcome.status, MixStatus::Completed);
    }

    #[tokio::test]
    async fn concurrent_requests_for_same_key_share_one_in_flight_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().join("results"), tmp.path().join("uploads"));
        let toolchain = Toolchain::new("ffmpeg", "ffprobe");
        let engine = RemixEngine::new(store, toolchain);
        let job = Job::new(SourceType::Url, "https://x".to_string(), "1.1.1.1".to_string());
        let settings = settings(Container::Wav);

        let first = engine.request(&job, settings).await;
        let second = engine.request(&job, settings).await;
        assert_eq!(first.mix_id, second.mix_id);
        assert!(!second.cached);
        assert_eq!(second.status, MixStatus::Processing);
    }

    #[test]
    fn reading_a_16_bit_stem_does_not_collapse_to_silence() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stem.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(10_000i16).unwrap();
        writer.write_sample(-10_000i16).unwrap();
        writer.write_sample(i16::MAX).unwrap();
        writer.finalize().unwrap();

        let samples = read_wav(&path).unwrap();
        assert!((samples[0] - 10_000.0 / i16::MAX as f32).abs() < 1e-6);
        assert!((samples[1] + 10_000.0 / i16::MAX as f32).abs() < 1e-6);
        assert!((samples[2] - 1.0).abs() < 1e-6);
    }
}
