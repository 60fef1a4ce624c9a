//! Deterministic in-memory media: a container, matching codecs and two audio
//! devices. Drives the engine without files or sound hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::{
    AudioCallback, AudioDecoder, AudioDevice, AudioFrame, AudioSpec, CodecFactory,
    ContainerBackend, DecodeOutcome, PixelFormat, ReadOutcome, SeekFlags, StreamInfo,
    VideoDecoder, VideoFrame,
};
use crate::error::BackendError;
use crate::packet::{MediaPacket, StreamKind, TimeBase};

pub const AUDIO_CODEC: &str = "synthetic-pcm";
pub const VIDEO_CODEC: &str = "synthetic-raw";

const CORRUPT: u8 = 0xFF;
const TONE_HZ: f64 = 440.0;

/// Shape of the generated source.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub seconds: f64,
    pub fps: f64,
    pub audio: bool,
    pub video: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub audio_packet_frames: u32,
    pub width: u32,
    pub height: u32,
    pub keyframe_interval: u64,
    /// Stamp video packets with a pts. Without it only dts is set.
    pub video_pts: bool,
    /// Interleave packets of a third, untracked stream.
    pub extra_stream: bool,
    pub seekable: bool,
    pub report_duration: bool,
    /// Fail every read after this many packets.
    pub fail_read_after: Option<usize>,
    /// Chance that a packet is marked undecodable.
    pub corrupt_probability: f64,
    /// Up to this many random bytes appended to each payload.
    pub payload_jitter: usize,
    pub seed: u64,
    pub video_codec: String,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seconds: 10.0,
            fps: 25.0,
            audio: true,
            video: true,
            sample_rate: 48_000,
            channels: 2,
            audio_packet_frames: 1024,
            width: 64,
            height: 36,
            keyframe_interval: 12,
            video_pts: true,
            extra_stream: false,
            seekable: true,
            report_duration: true,
            fail_read_after: None,
            corrupt_probability: 0.0,
            payload_jitter: 0,
            seed: 7,
            video_codec: VIDEO_CODEC.to_string(),
        }
    }
}

/// The audio and video stream descriptions a config produces.
#[derive(Debug, Clone)]
pub struct SyntheticStreams {
    pub audio: Option<StreamInfo>,
    pub video: Option<StreamInfo>,
}

/// Generated A/V container. Packets come out in presentation order.
pub struct SyntheticContainer {
    config: SyntheticConfig,
    streams: Vec<StreamInfo>,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    extra_index: Option<usize>,
    total_frames: u64,
    total_samples: u64,
    video_frame: u64,
    audio_sample: u64,
    extra_pending: bool,
    reads: usize,
    rng: StdRng,
}

impl SyntheticContainer {
    pub fn new(config: SyntheticConfig) -> Self {
        let mut streams = Vec::new();
        let mut video_index = None;
        let mut audio_index = None;
        let mut extra_index = None;

        if config.video {
            let index = streams.len();
            let mut info = StreamInfo::new(
                index,
                StreamKind::Video,
                TimeBase::new(1000, (config.fps * 1000.0).round().max(1.0) as u32),
                config.video_codec.clone(),
            );
            info.width = Some(config.width);
            info.height = Some(config.height);
            info.frame_rate = Some(config.fps);
            info.duration = Some(config.seconds);
            streams.push(info);
            video_index = Some(index);
        }
        if config.audio {
            let index = streams.len();
            let mut info = StreamInfo::new(
                index,
                StreamKind::Audio,
                TimeBase::new(1, config.sample_rate),
                AUDIO_CODEC,
            );
            info.sample_rate = Some(config.sample_rate);
            info.channels = Some(config.channels);
            info.duration = Some(config.seconds);
            streams.push(info);
            audio_index = Some(index);
        }
        if config.extra_stream {
            let index = streams.len();
            streams.push(StreamInfo::new(
                index,
                StreamKind::Other,
                TimeBase::new(1, 1000),
                "synthetic-data",
            ));
            extra_index = Some(index);
        }

        Self {
            total_frames: (config.seconds * config.fps).floor().max(0.0) as u64,
            total_samples: (config.seconds * config.sample_rate as f64).floor().max(0.0) as u64,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            streams,
            video_index,
            audio_index,
            extra_index,
            video_frame: 0,
            audio_sample: 0,
            extra_pending: false,
            reads: 0,
        }
    }

    pub fn streams_info(&self) -> SyntheticStreams {
        SyntheticStreams {
            audio: self.audio_index.map(|index| self.streams[index].clone()),
            video: self.video_index.map(|index| self.streams[index].clone()),
        }
    }

    fn payload(&mut self, len: usize) -> Vec<u8> {
        let jitter = if self.config.payload_jitter > 0 {
            self.rng.gen_range(0..=self.config.payload_jitter)
        } else {
            0
        };
        let mut data = vec![0u8; len.max(1) + jitter];
        let p = self.config.corrupt_probability.clamp(0.0, 1.0);
        if p > 0.0 && self.rng.gen_bool(p) {
            data[0] = CORRUPT;
        }
        data
    }

    fn next_video(&mut self, index: usize) -> MediaPacket {
        let frame = self.video_frame;
        self.video_frame += 1;
        let len = (self.config.width as usize * self.config.height as usize / 4).max(64);
        let mut packet = MediaPacket::new(index, self.payload(len))
            .with_dts(frame as i64)
            .with_duration(1)
            .keyframe(frame % self.config.keyframe_interval.max(1) == 0);
        if self.config.video_pts {
            packet = packet.with_pts(frame as i64);
        }
        self.extra_pending = self.extra_index.is_some();
        packet
    }

    fn next_audio(&mut self, index: usize) -> MediaPacket {
        let offset = self.audio_sample;
        let frames = (self.config.audio_packet_frames as u64).min(self.total_samples - offset);
        self.audio_sample += frames;
        let len = frames as usize * self.config.channels as usize * 2;
        MediaPacket::new(index, self.payload(len))
            .with_pts(offset as i64)
            .with_dts(offset as i64)
            .with_duration(frames as i64)
            .keyframe(true)
    }
}

impl ContainerBackend for SyntheticContainer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<ReadOutcome, BackendError> {
        if let Some(limit) = self.config.fail_read_after {
            if self.reads >= limit {
                return Err(BackendError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "synthetic read failure",
                )));
            }
        }
        self.reads += 1;

        if self.extra_pending {
            self.extra_pending = false;
            if let Some(index) = self.extra_index {
                return Ok(ReadOutcome::Packet(MediaPacket::new(index, vec![0u8; 16])));
            }
        }

        let video_time = self
            .video_index
            .filter(|_| self.video_frame < self.total_frames)
            .map(|index| (index, self.video_frame as f64 / self.config.fps));
        let audio_time = self
            .audio_index
            .filter(|_| self.audio_sample < self.total_samples)
            .map(|index| (index, self.audio_sample as f64 / self.config.sample_rate as f64));

        let packet = match (video_time, audio_time) {
            (None, None) => return Ok(ReadOutcome::EndOfStream),
            (Some((_, video)), Some((audio_index, audio))) if audio < video => {
                self.next_audio(audio_index)
            }
            (Some((video_index, _)), _) => self.next_video(video_index),
            (None, Some((audio_index, _))) => self.next_audio(audio_index),
        };
        Ok(ReadOutcome::Packet(packet))
    }

    fn seek(&mut self, stream: usize, timestamp: i64, flags: SeekFlags) -> Result<(), BackendError> {
        if !self.config.seekable {
            return Err(BackendError::Seek("source is not seekable".to_string()));
        }
        let info = self
            .streams
            .get(stream)
            .ok_or_else(|| BackendError::Seek(format!("unknown stream {}", stream)))?;
        let target = info.time_base.to_seconds(timestamp).max(0.0);
        if target > self.config.seconds {
            return Err(BackendError::Seek(format!(
                "{:.3}s is past the end of the source",
                target
            )));
        }

        let mut landed = target;
        if self.video_index.is_some() {
            let interval = self.config.keyframe_interval.max(1);
            let frame = (target * self.config.fps).floor() as u64;
            let mut key = frame - frame % interval;
            if !flags.backward && key < frame {
                key += interval;
            }
            if key >= self.total_frames && flags.any_frame {
                key = frame.min(self.total_frames);
            }
            self.video_frame = key;
            landed = key as f64 / self.config.fps;
        }
        let packet_frames = (self.config.audio_packet_frames as u64).max(1);
        let sample = (landed * self.config.sample_rate as f64).floor() as u64;
        self.audio_sample = (sample / packet_frames) * packet_frames;
        self.extra_pending = false;
        debug!("synthetic seek landed at {:.3}s", landed);
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.config.report_duration.then_some(self.config.seconds)
    }
}

/// Decoders for [`SyntheticContainer`] streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticCodecs;

impl CodecFactory for SyntheticCodecs {
    fn open_audio(&mut self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>, BackendError> {
        if stream.codec != AUDIO_CODEC {
            return Err(BackendError::Unsupported(format!("audio codec {}", stream.codec)));
        }
        Ok(Box::new(ToneDecoder {
            sample_rate: stream.sample_rate.unwrap_or(48_000),
            channels: stream.channels.unwrap_or(2).max(1),
        }))
    }

    fn open_video(&mut self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>, BackendError> {
        if stream.codec != VIDEO_CODEC {
            return Err(BackendError::Unsupported(format!("video codec {}", stream.codec)));
        }
        Ok(Box::new(PatternDecoder {
            width: stream.width.unwrap_or(64),
            height: stream.height.unwrap_or(36),
        }))
    }
}

/// Renders a quiet sine tone positioned by packet pts.
struct ToneDecoder {
    sample_rate: u32,
    channels: u16,
}

impl AudioDecoder for ToneDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<DecodeOutcome<AudioFrame>, BackendError> {
        if packet.data.first() == Some(&CORRUPT) {
            return Err(BackendError::Decode("corrupt audio packet".to_string()));
        }
        let frames = packet.duration.unwrap_or(0).max(0) as usize;
        if frames == 0 {
            return Ok(DecodeOutcome::NeedMoreInput);
        }
        let start = packet.pts.unwrap_or(0);
        let step = std::f64::consts::TAU * TONE_HZ / self.sample_rate as f64;
        let mut samples = Vec::with_capacity(frames * self.channels as usize);
        for i in 0..frames {
            let value = ((start + i as i64) as f64 * step).sin() as f32 * 0.1;
            samples.extend(std::iter::repeat(value).take(self.channels as usize));
        }
        Ok(DecodeOutcome::Frame(AudioFrame {
            samples,
            channels: self.channels,
            sample_rate: self.sample_rate,
        }))
    }

    fn flush(&mut self) {}
}

/// Emits flat grey pictures whose luma follows the decode timestamp.
struct PatternDecoder {
    width: u32,
    height: u32,
}

impl VideoDecoder for PatternDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<DecodeOutcome<VideoFrame>, BackendError> {
        if packet.data.first() == Some(&CORRUPT) {
            return Err(BackendError::Decode("corrupt video packet".to_string()));
        }
        let luma = (packet.dts.unwrap_or(0).rem_euclid(256)) as u8;
        let format = PixelFormat::Yuv420p;
        Ok(DecodeOutcome::Frame(VideoFrame {
            width: self.width,
            height: self.height,
            format,
            pts: packet.pts,
            repeat_count: 0,
            data: vec![luma; format.buffer_len(self.width, self.height)],
        }))
    }

    fn flush(&mut self) {}
}

struct ManualState {
    callback: Option<AudioCallback>,
    spec: Option<AudioSpec>,
    active: bool,
    volume: f32,
}

/// Test-side view of a [`ManualAudioDevice`].
#[derive(Clone)]
pub struct ManualAudioHandle {
    state: Arc<Mutex<ManualState>>,
}

impl ManualAudioHandle {
    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one device pull of `frames` frames.
    ///
    /// Returns `None` while the device is closed or paused.
    pub fn pull(&self, frames: usize) -> Option<Vec<f32>> {
        let mut state = self.lock();
        if !state.active {
            return None;
        }
        let channels = state.spec?.channels as usize;
        let callback = state.callback.as_mut()?;
        let mut buffer = vec![0.0f32; frames * channels];
        callback(&mut buffer);
        Some(buffer)
    }

    pub fn is_open(&self) -> bool {
        self.lock().callback.is_some()
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume
    }

    pub fn spec(&self) -> Option<AudioSpec> {
        self.lock().spec
    }
}

/// Audio device that only pulls when the test asks it to.
pub struct ManualAudioDevice {
    handle: ManualAudioHandle,
    fail_open: bool,
}

impl ManualAudioDevice {
    pub fn new() -> Self {
        Self {
            handle: ManualAudioHandle {
                state: Arc::new(Mutex::new(ManualState {
                    callback: None,
                    spec: None,
                    active: false,
                    volume: 1.0,
                })),
            },
            fail_open: false,
        }
    }

    /// A device whose `open` always fails.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    pub fn handle(&self) -> ManualAudioHandle {
        self.handle.clone()
    }
}

impl Default for ManualAudioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for ManualAudioDevice {
    fn open(&mut self, spec: AudioSpec, callback: AudioCallback) -> Result<AudioSpec, BackendError> {
        if self.fail_open {
            return Err(BackendError::Device("no audio device available".to_string()));
        }
        let mut state = self.handle.lock();
        state.callback = Some(callback);
        state.spec = Some(spec);
        state.active = false;
        Ok(spec)
    }

    fn pause(&mut self, paused: bool) {
        let mut state = self.handle.lock();
        state.active = !paused && state.callback.is_some();
    }

    fn is_active(&self) -> bool {
        self.handle.lock().active
    }

    fn set_volume(&mut self, volume: f32) {
        self.handle.lock().volume = volume;
    }

    fn close(&mut self) {
        let mut state = self.handle.lock();
        state.callback = None;
        state.active = false;
    }
}

/// Audio device that consumes and discards samples in real time.
pub struct ClockedAudioDevice {
    active: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    volume: f32,
    thread_handle: Option<JoinHandle<()>>,
}

impl ClockedAudioDevice {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            volume: 1.0,
            thread_handle: None,
        }
    }
}

impl Default for ClockedAudioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for ClockedAudioDevice {
    fn open(&mut self, spec: AudioSpec, mut callback: AudioCallback) -> Result<AudioSpec, BackendError> {
        if spec.sample_rate == 0 || spec.channels == 0 {
            return Err(BackendError::Config(format!("invalid audio spec {:?}", spec)));
        }
        let spec = AudioSpec {
            buffer_frames: spec.buffer_frames.max(1),
            ..spec
        };
        let period = Duration::from_secs_f64(spec.buffer_frames as f64 / spec.sample_rate as f64);
        let active = self.active.clone();
        let closed = self.closed.clone();
        let mut buffer = vec![0.0f32; spec.buffer_frames * spec.channels as usize];
        let handle = thread::Builder::new()
            .name("avpace-clocked-audio".to_string())
            .spawn(move || {
                while !closed.load(Ordering::Relaxed) {
                    if active.load(Ordering::Relaxed) {
                        callback(&mut buffer);
                    }
                    thread::sleep(period);
                }
            })
            .map_err(|err| BackendError::Device(err.to_string()))?;
        self.thread_handle = Some(handle);
        Ok(spec)
    }

    fn pause(&mut self, paused: bool) {
        let running = self.thread_handle.is_some();
        self.active.store(!paused && running, Ordering::Relaxed);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn close(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        self.closed.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::warn!("clocked audio thread panicked during join");
            }
        }
    }
}

impl Drop for ClockedAudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(container: &mut SyntheticContainer) -> Vec<MediaPacket> {
        let mut packets = Vec::new();
        while let Ok(ReadOutcome::Packet(packet)) = container.read_packet() {
            packets.push(packet);
        }
        packets
    }

    #[test]
    fn emits_every_frame_and_sample_then_ends() {
        let mut container = SyntheticContainer::new(SyntheticConfig {
            seconds: 1.0,
            ..SyntheticConfig::default()
        });
        let packets = drain(&mut container);
        let video = packets.iter().filter(|p| p.stream_index == 0).count();
        let samples: i64 = packets
            .iter()
            .filter(|p| p.stream_index == 1)
            .filter_map(|p| p.duration)
            .sum();
        assert_eq!(video, 25);
        assert_eq!(samples, 48_000);
        assert!(matches!(container.read_packet(), Ok(ReadOutcome::EndOfStream)));
    }

    #[test]
    fn seek_lands_on_preceding_keyframe() {
        let mut container = SyntheticContainer::new(SyntheticConfig::default());
        let tb = container.streams()[0].time_base;
        let flags = SeekFlags {
            backward: true,
            any_frame: true,
        };
        container.seek(0, tb.to_native(2.0), flags).unwrap();
        let first_video = drain(&mut container)
            .into_iter()
            .find(|p| p.stream_index == 0)
            .unwrap();
        assert_eq!(first_video.pts, Some(48));
        assert!(first_video.keyframe);
    }

    #[test]
    fn seek_past_end_fails() {
        let mut container = SyntheticContainer::new(SyntheticConfig {
            seconds: 1.0,
            ..SyntheticConfig::default()
        });
        let tb = container.streams()[0].time_base;
        assert!(container.seek(0, tb.to_native(5.0), SeekFlags::default()).is_err());
    }

    #[test]
    fn corrupt_packets_fail_to_decode() {
        let mut container = SyntheticContainer::new(SyntheticConfig {
            corrupt_probability: 1.0,
            ..SyntheticConfig::default()
        });
        let streams = container.streams_info();
        let mut codecs = SyntheticCodecs;
        let mut decoder = codecs.open_video(streams.video.as_ref().unwrap()).unwrap();
        let packet = drain(&mut container)
            .into_iter()
            .find(|p| p.stream_index == 0)
            .unwrap();
        assert!(decoder.decode(&packet).is_err());
    }

    #[test]
    fn unknown_codec_is_unsupported() {
        let container = SyntheticContainer::new(SyntheticConfig {
            video_codec: "mystery".to_string(),
            ..SyntheticConfig::default()
        });
        let video = container.streams_info().video.unwrap();
        assert!(matches!(
            SyntheticCodecs.open_video(&video),
            Err(BackendError::Unsupported(_))
        ));
    }

    #[test]
    fn manual_device_pulls_only_while_active() {
        let mut device = ManualAudioDevice::new();
        let handle = device.handle();
        device
            .open(
                AudioSpec::new(48_000, 2).with_buffer_frames(4),
                Box::new(|buffer: &mut [f32]| buffer.fill(0.5)),
            )
            .unwrap();
        assert!(handle.pull(4).is_none());
        device.pause(false);
        assert_eq!(handle.pull(4), Some(vec![0.5; 8]));
        device.close();
        assert!(handle.pull(4).is_none());
    }
}
