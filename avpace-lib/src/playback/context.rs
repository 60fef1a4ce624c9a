//! Explicit per-session state shared by every stage.

use crate::backend::StreamInfo;
use crate::packet::TimeBase;

use super::clock::ClockPair;
use super::queue::PacketQueue;
use super::seek::SeekController;
use super::settings::PlaybackSettings;
use super::state::SessionFlags;

/// Stream selected for playback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveStream {
    pub index: usize,
    pub time_base: TimeBase,
    pub frame_rate: Option<f64>,
}

impl ActiveStream {
    /// Nominal seconds per frame: the declared rate, else one time-base tick.
    pub fn frame_interval(&self) -> f64 {
        match self.frame_rate {
            Some(rate) if rate > 0.0 => 1.0 / rate,
            _ => self.time_base.seconds(),
        }
    }
}

impl From<&StreamInfo> for ActiveStream {
    fn from(info: &StreamInfo) -> Self {
        Self {
            index: info.index,
            time_base: info.time_base,
            frame_rate: info.frame_rate,
        }
    }
}

/// Queues, clocks and control flags of one open session.
///
/// Created once per open container, handed to each stage behind an `Arc`.
#[derive(Debug)]
pub struct SessionContext {
    pub settings: PlaybackSettings,
    pub audio_queue: PacketQueue,
    pub video_queue: PacketQueue,
    pub clocks: ClockPair,
    pub seek: SeekController,
    pub flags: SessionFlags,
    pub audio_stream: Option<ActiveStream>,
    pub video_stream: Option<ActiveStream>,
}

impl SessionContext {
    pub fn new(
        settings: PlaybackSettings,
        audio_stream: Option<ActiveStream>,
        video_stream: Option<ActiveStream>,
    ) -> Self {
        let clocks = ClockPair::new(
            settings.initial_frame_delay,
            settings.initial_delay_ms,
            settings.discontinuity_threshold,
        );
        Self {
            audio_queue: PacketQueue::new("audio"),
            video_queue: PacketQueue::new("video"),
            clocks,
            seek: SeekController::new(),
            flags: SessionFlags::new(true),
            audio_stream,
            video_stream,
            settings,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio_stream.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video_stream.is_some()
    }

    /// Queue that receives packets of `stream_index`, if it is tracked.
    pub fn queue_for(&self, stream_index: usize) -> Option<&PacketQueue> {
        match (self.audio_stream, self.video_stream) {
            (Some(audio), _) if audio.index == stream_index => Some(&self.audio_queue),
            (_, Some(video)) if video.index == stream_index => Some(&self.video_queue),
            _ => None,
        }
    }

    /// Queues of the active streams paired with their high-water marks.
    pub fn active_queues(&self) -> Vec<(&PacketQueue, usize)> {
        let mut queues = Vec::with_capacity(2);
        if self.has_audio() {
            queues.push((&self.audio_queue, self.settings.audio_high_watermark_bytes));
        }
        if self.has_video() {
            queues.push((&self.video_queue, self.settings.video_high_watermark_bytes));
        }
        queues
    }

    /// Stream used to express seek targets: video when present, else audio.
    pub fn seek_stream(&self) -> Option<ActiveStream> {
        self.video_stream.or(self.audio_stream)
    }

    /// Close both queues so blocked producers and consumers return.
    pub fn close_queues(&self) {
        self.audio_queue.close();
        self.video_queue.close();
    }

    /// Raise the stop flag, wake everything waiting on the session and
    /// release queued packets.
    pub fn shutdown(&self) {
        self.flags.stop();
        self.close_queues();
        self.audio_queue.flush();
        self.video_queue.flush();
    }
}
