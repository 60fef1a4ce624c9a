//! Audio/video clock pair and the adaptive presentation-delay algorithm.
//!
//! Each clock has a single writer: the audio clock belongs to the audio pull
//! stage, the video clock and frame-timing history to the video pace stage.
//! Values live in atomics so cross-thread reads never tear. A reader may see a
//! value up to one scheduler tick old; the pacing correction tolerates that.

use std::sync::atomic::{AtomicU64, Ordering};

/// `f64` stored as raw bits in an [`AtomicU64`].
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Nominal interval of one decoded frame, stretched for repeated fields.
pub fn nominal_frame_delay(time_base_seconds: f64, repeat_count: u32) -> f64 {
    time_base_seconds * (1.0 + 0.5 * repeat_count as f64)
}

/// Interval since the previous frame, falling back to `last_delay` across
/// discontinuities (non-positive, or at least `threshold` seconds).
pub fn frame_delay(video_pts: f64, last_pts: f64, last_delay: f64, threshold: f64) -> f64 {
    let delay = video_pts - last_pts;
    if delay <= 0.0 || delay >= threshold {
        last_delay
    } else {
        delay
    }
}

/// Shrink or stretch `delay` so video converges on the audio master.
///
/// `diff` is `video - audio` in seconds.
pub fn correct_delay(delay: f64, diff: f64) -> f64 {
    if diff <= -delay {
        delay / 2.0
    } else if diff >= delay {
        delay * 2.0
    } else {
        delay
    }
}

/// Round a delay in seconds to whole scheduler milliseconds.
pub fn delay_to_ms(delay: f64) -> u64 {
    (delay * 1000.0).round().max(0.0) as u64
}

/// Shared audio/video clocks plus the pacing state derived from them.
#[derive(Debug)]
pub struct ClockPair {
    audio_clock: AtomicF64,
    video_clock: AtomicF64,
    frame_last_pts: AtomicF64,
    frame_last_delay: AtomicF64,
    delay_ms: AtomicU64,
    discontinuity_threshold: f64,
}

impl ClockPair {
    pub fn new(initial_frame_delay: f64, initial_delay_ms: u64, discontinuity_threshold: f64) -> Self {
        Self {
            audio_clock: AtomicF64::new(0.0),
            video_clock: AtomicF64::new(0.0),
            frame_last_pts: AtomicF64::new(0.0),
            frame_last_delay: AtomicF64::new(initial_frame_delay),
            delay_ms: AtomicU64::new(initial_delay_ms),
            discontinuity_threshold,
        }
    }

    pub fn audio_clock(&self) -> f64 {
        self.audio_clock.load()
    }

    /// Reset the audio clock from an explicit packet timestamp.
    pub fn set_audio_clock(&self, seconds: f64) {
        self.audio_clock.store(seconds);
    }

    /// Advance the audio clock by the duration of decoded samples.
    pub fn advance_audio_clock(&self, seconds: f64) {
        self.audio_clock.store(self.audio_clock.load() + seconds);
    }

    pub fn video_clock(&self) -> f64 {
        self.video_clock.load()
    }

    pub fn set_video_clock(&self, seconds: f64) {
        self.video_clock.store(seconds);
    }

    /// Zero the video clock after a successful seek.
    pub fn reset_video_clock(&self) {
        self.video_clock.store(0.0);
    }

    pub fn frame_last_pts(&self) -> f64 {
        self.frame_last_pts.load()
    }

    pub fn frame_last_delay(&self) -> f64 {
        self.frame_last_delay.load()
    }

    /// Current scheduler interval in milliseconds.
    pub fn scheduler_delay_ms(&self) -> u64 {
        self.delay_ms.load(Ordering::Acquire)
    }

    pub fn set_scheduler_delay_ms(&self, delay_ms: u64) {
        self.delay_ms.store(delay_ms, Ordering::Release);
    }

    /// Resolve the presentation time of a decoded frame and advance the
    /// video clock by its nominal interval.
    ///
    /// A frame with an explicit `pts` pins the clock to it; a frame without
    /// one is presented at the clock as extrapolated by the previous frame.
    pub fn synchronize_video(&self, pts: Option<f64>, nominal_delay: f64) -> f64 {
        let frame_pts = match pts {
            Some(pts) => {
                self.video_clock.store(pts);
                pts
            }
            None => self.video_clock.load(),
        };
        self.video_clock.store(frame_pts + nominal_delay);
        frame_pts
    }

    /// Derive the next presentation delay against the audio master clock.
    ///
    /// Updates `frame_last_pts`/`frame_last_delay` and the scheduler interval,
    /// and returns the corrected delay in seconds.
    pub fn pace(&self, video_pts: f64) -> f64 {
        let delay = frame_delay(
            video_pts,
            self.frame_last_pts.load(),
            self.frame_last_delay.load(),
            self.discontinuity_threshold,
        );
        self.frame_last_delay.store(delay);
        self.frame_last_pts.store(video_pts);

        let diff = video_pts - self.audio_clock.load();
        let corrected = correct_delay(delay, diff);
        self.set_scheduler_delay_ms(delay_to_ms(corrected));
        corrected
    }

    /// Video is its own master: fixed frame-rate interval, clock taken from
    /// the packet when present.
    pub fn pace_free_running(&self, pts: Option<f64>, frame_rate: f64) -> f64 {
        if let Some(pts) = pts {
            self.video_clock.store(pts);
        }
        let delay = if frame_rate > 0.0 {
            1.0 / frame_rate
        } else {
            self.frame_last_delay.load()
        };
        self.set_scheduler_delay_ms(delay_to_ms(delay));
        delay
    }

    /// Audio minus video, in seconds. Positive when video lags.
    pub fn drift(&self) -> f64 {
        self.audio_clock.load() - self.video_clock.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn clocks() -> ClockPair {
        ClockPair::new(0.04, 40, 1.0)
    }

    #[test]
    fn in_range_interval_passes_through() {
        let delay = frame_delay(10.05, 10.00, 0.04, 1.0);
        assert!((delay - 0.05).abs() < 1e-9);
    }

    #[test]
    fn discontinuity_reuses_last_delay() {
        assert_eq!(frame_delay(9.0, 10.0, 0.04, 1.0), 0.04);
        assert_eq!(frame_delay(10.0, 10.0, 0.04, 1.0), 0.04);
        assert_eq!(frame_delay(11.5, 10.0, 0.04, 1.0), 0.04);
    }

    #[test]
    fn video_ahead_doubles_delay() {
        let diff = 10.20 - 10.00;
        assert!((correct_delay(0.04, diff) - 0.08).abs() < EPS);
    }

    #[test]
    fn video_behind_halves_delay() {
        let diff = 9.70 - 10.00;
        assert!((correct_delay(0.04, diff) - 0.02).abs() < EPS);
    }

    #[test]
    fn small_drift_keeps_delay() {
        assert_eq!(correct_delay(0.04, 0.01), 0.04);
        assert_eq!(correct_delay(0.04, -0.039), 0.04);
    }

    #[test]
    fn nominal_delay_stretches_for_repeats() {
        assert!((nominal_frame_delay(0.04, 0) - 0.04).abs() < EPS);
        assert!((nominal_frame_delay(0.04, 1) - 0.06).abs() < EPS);
        assert!((nominal_frame_delay(0.04, 2) - 0.08).abs() < EPS);
    }

    #[test]
    fn pace_updates_history_and_scheduler_interval() {
        let clocks = clocks();
        clocks.set_audio_clock(10.04);
        clocks.frame_last_pts.store(10.0);

        let delay = clocks.pace(10.05);
        assert!((delay - 0.05).abs() < 1e-9);
        assert!((clocks.frame_last_delay() - 0.05).abs() < 1e-9);
        assert_eq!(clocks.frame_last_pts(), 10.05);
        assert_eq!(clocks.scheduler_delay_ms(), 50);
    }

    #[test]
    fn pace_doubles_when_video_runs_ahead() {
        let clocks = clocks();
        clocks.set_audio_clock(10.0);
        clocks.frame_last_pts.store(10.16);
        let delay = clocks.pace(10.20);
        assert!((delay - 0.08).abs() < 1e-9);
        assert_eq!(clocks.scheduler_delay_ms(), 80);
    }

    #[test]
    fn pace_halves_when_video_lags() {
        let clocks = clocks();
        clocks.set_audio_clock(10.0);
        clocks.frame_last_pts.store(9.66);
        let delay = clocks.pace(9.70);
        assert!((delay - 0.02).abs() < 1e-9);
        assert_eq!(clocks.scheduler_delay_ms(), 20);
    }

    #[test]
    fn synchronize_video_pins_or_extrapolates() {
        let clocks = clocks();
        let pts = clocks.synchronize_video(Some(5.0), 0.04);
        assert_eq!(pts, 5.0);
        assert!((clocks.video_clock() - 5.04).abs() < EPS);

        let pts = clocks.synchronize_video(None, 0.04);
        assert!((pts - 5.04).abs() < EPS);
        assert!((clocks.video_clock() - 5.08).abs() < EPS);
    }

    #[test]
    fn explicit_zero_pts_is_honoured() {
        let clocks = clocks();
        clocks.set_video_clock(3.0);
        assert_eq!(clocks.synchronize_video(Some(0.0), 0.04), 0.0);
    }

    #[test]
    fn free_running_uses_frame_rate() {
        let clocks = clocks();
        let delay = clocks.pace_free_running(Some(2.5), 25.0);
        assert!((delay - 0.04).abs() < EPS);
        assert_eq!(clocks.video_clock(), 2.5);
        assert_eq!(clocks.scheduler_delay_ms(), 40);

        clocks.pace_free_running(None, 30.0);
        assert_eq!(clocks.video_clock(), 2.5);
        assert_eq!(clocks.scheduler_delay_ms(), 33);
    }

    #[test]
    fn audio_clock_set_then_advance() {
        let clocks = clocks();
        clocks.advance_audio_clock(0.5);
        clocks.set_audio_clock(20.0);
        clocks.advance_audio_clock(1024.0 / 48_000.0);
        assert!((clocks.audio_clock() - (20.0 + 1024.0 / 48_000.0)).abs() < EPS);
    }
}
