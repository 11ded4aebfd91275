//! Remix settings and remix task status (spec §3, §4.7).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    /// video+audio: re-mux the original video with the mixed audio.
    Video,
    /// audio-lossy-mp3
    Mp3,
    /// audio-aac
    Aac,
    /// audio-wav
    Wav,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Container::Video => "mp4",
            Container::Mp3 => "mp3",
            Container::Aac => "m4a",
            Container::Wav => "wav",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Container::Video => "video/mp4",
            Container::Mp3 => "audio/mpeg",
            Container::Aac => "audio/mp4",
            Container::Wav => "audio/wav",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixSettings {
    #[serde(default = "default_gain")]
    pub drums: f32,
    #[serde(default = "default_gain")]
    pub bass: f32,
    #[serde(default = "default_gain")]
    pub other: f32,
    /// Vocals default to 0 (instrumental/karaoke mix).
    #[serde(default)]
    pub vocals: f32,
    #[serde(default)]
    pub pitch_semitones: i32,
    pub container: Container,
}

fn default_gain() -> f32 {
    1.0
}

impl Default for MixSettings {
    fn default() -> Self {
        MixSettings {
            drums: 1.0,
            bass: 1.0,
            other: 1.0,
            vocals: 0.0,
            pitch_semitones: 0,
            container: Container::Video,
        }
    }
}

impl MixSettings {
    pub fn validate(&self) -> Result<(), String> {
        for (name, g) in [
            ("drums", self.drums),
            ("bass", self.bass),
            ("other", self.other),
            ("vocals", self.vocals),
        ] {
            if !(0.0..=2.0).contains(&g) {
                return Err(format!("{name} gain must be within [0, 2], got {g}"));
            }
        }
        if !(-12..=12).contains(&self.pitch_semitones) {
            return Err(format!(
                "pitch_semitones must be within [-12, 12], got {}",
                self.pitch_semitones
            ));
        }
        Ok(())
    }

    /// Gains rounded to two decimal places, per spec §4.7, so that UI
    /// rounding jitter does not multiply cache entries.
    pub fn rounded_gains(&self) -> (i32, i32, i32, i32) {
        let round = |g: f32| (g * 100.0).round() as i32;
        (
            round(self.drums),
            round(self.bass),
            round(self.other),
            round(self.vocals),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct MixTask {
    pub mix_key: String,
    pub job_id: uuid::Uuid,
    pub status: MixStatus,
    pub progress: u8,
    pub error_message: Option<String>,
    pub output_path: Option<std::path::PathBuf>,
}
