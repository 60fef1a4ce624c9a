//! Capability contracts the engine consumes from its collaborators.
//!
//! Container parsing, decoding, resampling, pixel conversion, presentation and
//! audio output are all opaque to the playback stages. Each lives behind one of
//! the traits below; concrete implementations sit in the submodules.

pub mod headless;
pub mod rodio;
pub mod symphonia;
pub mod synthetic;

use crate::error::BackendError;
use crate::packet::{MediaPacket, StreamKind, TimeBase};

/// Static description of one elementary stream in a container.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub time_base: TimeBase,
    pub codec: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    /// Declared stream duration in seconds.
    pub duration: Option<f64>,
}

impl StreamInfo {
    pub fn new(index: usize, kind: StreamKind, time_base: TimeBase, codec: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            time_base,
            codec: codec.into(),
            sample_rate: None,
            channels: None,
            width: None,
            height: None,
            frame_rate: None,
            duration: None,
        }
    }
}

/// Result of a container read.
#[derive(Debug)]
pub enum ReadOutcome {
    Packet(MediaPacket),
    EndOfStream,
}

/// Positioning flags for [`ContainerBackend::seek`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekFlags {
    /// Land on the nearest keyframe at or before the target.
    pub backward: bool,
    /// Accept a non-keyframe when no keyframe qualifies.
    pub any_frame: bool,
}

/// Demultiplexer over one opened source.
pub trait ContainerBackend: Send {
    fn streams(&self) -> &[StreamInfo];

    fn read_packet(&mut self) -> Result<ReadOutcome, BackendError>;

    /// Reposition so the next read returns data at or before `timestamp`,
    /// expressed in `stream`'s time base.
    fn seek(&mut self, stream: usize, timestamp: i64, flags: SeekFlags) -> Result<(), BackendError>;

    /// Container-level duration in seconds, if the format reports one.
    fn duration(&self) -> Option<f64>;

    fn close(&mut self) {}
}

/// Outcome of feeding one packet to a decoder.
#[derive(Debug)]
pub enum DecodeOutcome<T> {
    Frame(T),
    NeedMoreInput,
}

/// Decoded PCM, interleaved `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Samples per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn spec(&self) -> AudioSpec {
        AudioSpec::new(self.sample_rate, self.channels)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Yuv420p,
    Rgb24,
    Rgba,
}

impl PixelFormat {
    /// Bytes needed for one `width x height` picture.
    pub fn buffer_len(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Yuv420p => pixels + 2 * (pixels.div_ceil(4)),
            PixelFormat::Rgb24 => pixels * 3,
            PixelFormat::Rgba => pixels * 4,
        }
    }
}

/// Decoded picture.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Presentation timestamp in the stream's time base.
    pub pts: Option<i64>,
    /// Extra field repeats signalled by the codec.
    pub repeat_count: u32,
    pub data: Vec<u8>,
}

pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &MediaPacket) -> Result<DecodeOutcome<AudioFrame>, BackendError>;
    /// Drop buffered state after a seek.
    fn flush(&mut self);
}

pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: &MediaPacket) -> Result<DecodeOutcome<VideoFrame>, BackendError>;
    fn flush(&mut self);
}

/// Opens decoders for container streams.
pub trait CodecFactory: Send {
    fn open_audio(&mut self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>, BackendError>;
    fn open_video(&mut self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>, BackendError>;
}

/// PCM layout exchanged with the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per device pull.
    pub buffer_frames: usize,
}

impl AudioSpec {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            buffer_frames: 0,
        }
    }

    pub fn with_buffer_frames(mut self, buffer_frames: usize) -> Self {
        self.buffer_frames = buffer_frames;
        self
    }

    /// Whether two specs describe the same sample stream, ignoring pull size.
    pub fn same_layout(&self, other: &AudioSpec) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }
}

pub trait Resampler: Send {
    fn configure(&mut self, source: AudioSpec, target: AudioSpec) -> Result<(), BackendError>;
    /// Convert one frame into the configured target layout.
    fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<f32>, BackendError>;
}

/// Picture geometry and pixel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Converted picture ready for presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

pub trait Scaler: Send {
    fn configure(&mut self, source: VideoSpec, target: VideoSpec) -> Result<(), BackendError>;
    fn convert(&mut self, frame: &VideoFrame) -> Result<PixelBuffer, BackendError>;
}

/// Destination rectangle on a presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest rectangle with the frame's aspect ratio that fits the surface,
/// centred on it.
pub fn fit_rect(frame_width: u32, frame_height: u32, surface_width: u32, surface_height: u32) -> Rect {
    if frame_width == 0 || frame_height == 0 || surface_width == 0 || surface_height == 0 {
        return Rect::default();
    }
    let aspect = frame_width as f64 / frame_height as f64;
    let mut height = surface_height;
    let mut width = ((height as f64 * aspect).round() as u32) & !1;
    if width > surface_width {
        width = surface_width;
        height = ((width as f64 / aspect).round() as u32) & !1;
    }
    Rect {
        x: (surface_width - width) / 2,
        y: (surface_height - height) / 2,
        width,
        height,
    }
}

pub trait Surface: Send {
    fn create(&mut self, width: u32, height: u32) -> Result<(), BackendError>;
    fn size(&self) -> (u32, u32);
    /// Blit `buffer` into `dest` and flip.
    fn present(&mut self, buffer: &PixelBuffer, dest: Rect) -> Result<(), BackendError>;
}

/// Fill callback handed to an [`AudioDevice`]. Must fill the whole slice.
pub type AudioCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

pub trait AudioDevice: Send {
    /// Start pulling through `callback`. Returns the spec actually obtained.
    ///
    /// Devices open paused.
    fn open(&mut self, spec: AudioSpec, callback: AudioCallback) -> Result<AudioSpec, BackendError>;
    fn pause(&mut self, paused: bool);
    /// Whether the device is currently consuming samples.
    fn is_active(&self) -> bool;
    fn set_volume(&mut self, volume: f32);
    fn close(&mut self);
}

/// Everything a session needs from the outside world.
pub struct Backends {
    pub container: Box<dyn ContainerBackend>,
    pub codecs: Box<dyn CodecFactory>,
    pub resampler: Box<dyn Resampler>,
    pub scaler: Box<dyn Scaler>,
    pub surface: Box<dyn Surface>,
    pub audio_device: Box<dyn AudioDevice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_rect_letterboxes_wide_frames() {
        let rect = fit_rect(1920, 800, 640, 480);
        assert_eq!(rect.width, 640);
        assert_eq!(rect.height, 266);
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 107);
    }

    #[test]
    fn fit_rect_pillarboxes_tall_frames() {
        let rect = fit_rect(480, 640, 640, 480);
        assert_eq!(rect.height, 480);
        assert_eq!(rect.width, 360);
        assert_eq!(rect.x, 140);
        assert_eq!(rect.y, 0);
    }

    #[test]
    fn fit_rect_handles_empty_geometry() {
        assert_eq!(fit_rect(0, 10, 640, 480), Rect::default());
        assert_eq!(fit_rect(10, 10, 0, 480), Rect::default());
    }

    #[test]
    fn yuv_buffer_len_counts_chroma_planes() {
        assert_eq!(PixelFormat::Yuv420p.buffer_len(4, 4), 16 + 8);
        assert_eq!(PixelFormat::Rgb24.buffer_len(2, 2), 12);
    }

    #[test]
    fn audio_frame_counts_frames_per_channel() {
        let frame = AudioFrame {
            samples: vec![0.0; 8],
            channels: 2,
            sample_rate: 48_000,
        };
        assert_eq!(frame.frames(), 4);
        assert!(frame.spec().same_layout(&AudioSpec::new(48_000, 2)));
    }
}
