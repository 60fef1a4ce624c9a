//! Tunables for queue limits, pacing and output.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

const DEFAULT_AUDIO_HIGH_WATERMARK: usize = 5 * 16 * 1024;
const DEFAULT_VIDEO_HIGH_WATERMARK: usize = 5 * 256 * 1024;
const DEFAULT_INITIAL_DELAY_MS: u64 = 40;
const DEFAULT_INITIAL_FRAME_DELAY: f64 = 40e-3;
const DEFAULT_AUDIO_BUFFER_FRAMES: usize = 1024;
const DEFAULT_MAX_AUDIO_FRAME_SAMPLES: usize = 192_000;
const DEFAULT_BACKPRESSURE_WAIT_MS: u64 = 100;
const DEFAULT_IDLE_WAIT_MS: u64 = 10;
const DEFAULT_VOLUME: f32 = 0.7;
const DEFAULT_DISCONTINUITY_THRESHOLD: f64 = 1.0;

/// Session configuration. Every field is optional in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Demux stalls while the audio queue holds more than this many bytes.
    #[serde(alias = "max_audio_size")]
    pub audio_high_watermark_bytes: usize,
    /// Demux stalls while the video queue holds more than this many bytes.
    #[serde(alias = "max_video_size")]
    pub video_high_watermark_bytes: usize,
    pub initial_delay_ms: u64,
    pub initial_frame_delay: f64,
    /// Frames requested per audio device callback.
    pub audio_buffer_frames: usize,
    /// Initial capacity of the decoded-sample staging buffer.
    pub max_audio_frame_samples: usize,
    pub backpressure_wait_ms: u64,
    pub idle_wait_ms: u64,
    pub volume: f32,
    /// Frame intervals at or above this many seconds count as discontinuities.
    pub discontinuity_threshold: f64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            audio_high_watermark_bytes: DEFAULT_AUDIO_HIGH_WATERMARK,
            video_high_watermark_bytes: DEFAULT_VIDEO_HIGH_WATERMARK,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            initial_frame_delay: DEFAULT_INITIAL_FRAME_DELAY,
            audio_buffer_frames: DEFAULT_AUDIO_BUFFER_FRAMES,
            max_audio_frame_samples: DEFAULT_MAX_AUDIO_FRAME_SAMPLES,
            backpressure_wait_ms: DEFAULT_BACKPRESSURE_WAIT_MS,
            idle_wait_ms: DEFAULT_IDLE_WAIT_MS,
            volume: DEFAULT_VOLUME,
            discontinuity_threshold: DEFAULT_DISCONTINUITY_THRESHOLD,
        }
    }
}

impl PlaybackSettings {
    /// Parse settings from a JSON string, filling gaps with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        Ok(settings.sanitized())
    }

    /// Load settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    fn sanitized(mut self) -> Self {
        self.volume = self.volume.clamp(0.0, 1.0);
        self.audio_buffer_frames = self.audio_buffer_frames.max(1);
        self.max_audio_frame_samples = self.max_audio_frame_samples.max(1);
        if !self.initial_frame_delay.is_finite() || self.initial_frame_delay <= 0.0 {
            self.initial_frame_delay = DEFAULT_INITIAL_FRAME_DELAY;
        }
        if !self.discontinuity_threshold.is_finite() || self.discontinuity_threshold <= 0.0 {
            self.discontinuity_threshold = DEFAULT_DISCONTINUITY_THRESHOLD;
        }
        self
    }

    /// Configure the audio queue's high-water mark (bytes).
    pub fn set_audio_high_watermark_bytes(&mut self, bytes: usize) {
        self.audio_high_watermark_bytes = bytes;
    }

    /// Configure the video queue's high-water mark (bytes).
    pub fn set_video_high_watermark_bytes(&mut self, bytes: usize) {
        self.video_high_watermark_bytes = bytes;
    }

    /// Configure how long demux waits on a full queue before re-checking (ms).
    pub fn set_backpressure_wait_ms(&mut self, ms: u64) {
        self.backpressure_wait_ms = ms.max(1);
    }

    /// Configure the idle poll interval used while draining at end of stream (ms).
    pub fn set_idle_wait_ms(&mut self, ms: u64) {
        self.idle_wait_ms = ms.max(1);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn backpressure_wait(&self) -> Duration {
        Duration::from_millis(self.backpressure_wait_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}
