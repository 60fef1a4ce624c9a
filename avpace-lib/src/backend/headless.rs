//! Pass-through conversion and an off-screen presentation surface.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{
    AudioFrame, AudioSpec, PixelBuffer, Rect, Resampler, Scaler, Surface, VideoFrame, VideoSpec,
};
use crate::error::BackendError;

/// Scaler that accepts frames already in the target layout.
#[derive(Debug, Default)]
pub struct PassthroughScaler {
    target: Option<VideoSpec>,
}

impl Scaler for PassthroughScaler {
    fn configure(&mut self, source: VideoSpec, target: VideoSpec) -> Result<(), BackendError> {
        if source.format != target.format {
            return Err(BackendError::Unsupported(format!(
                "pixel conversion {:?} -> {:?}",
                source.format, target.format
            )));
        }
        self.target = Some(target);
        Ok(())
    }

    fn convert(&mut self, frame: &VideoFrame) -> Result<PixelBuffer, BackendError> {
        let target = self
            .target
            .ok_or_else(|| BackendError::Config("scaler used before configure".to_string()))?;
        if frame.format != target.format {
            return Err(BackendError::Unsupported(format!("frame format {:?}", frame.format)));
        }
        if frame.data.len() < frame.format.buffer_len(frame.width, frame.height) {
            return Err(BackendError::Decode("short picture buffer".to_string()));
        }
        Ok(PixelBuffer {
            width: frame.width,
            height: frame.height,
            format: frame.format,
            data: frame.data.clone(),
        })
    }
}

/// Resampler for sources that already match the device layout.
#[derive(Debug, Default)]
pub struct PassthroughResampler {
    target: Option<AudioSpec>,
}

impl Resampler for PassthroughResampler {
    fn configure(&mut self, source: AudioSpec, target: AudioSpec) -> Result<(), BackendError> {
        if !source.same_layout(&target) {
            return Err(BackendError::Unsupported(format!(
                "resampling {}Hz/{}ch -> {}Hz/{}ch",
                source.sample_rate, source.channels, target.sample_rate, target.channels
            )));
        }
        self.target = Some(target);
        Ok(())
    }

    fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<f32>, BackendError> {
        match self.target {
            Some(target) if target.same_layout(&frame.spec()) => Ok(frame.samples.clone()),
            Some(_) => Err(BackendError::Unsupported("frame layout changed".to_string())),
            None => Err(BackendError::Config("resampler used before configure".to_string())),
        }
    }
}

/// Counters shared between a [`HeadlessSurface`] and whoever inspects it.
#[derive(Debug, Clone, Default)]
pub struct SurfaceStats {
    presented: Arc<AtomicUsize>,
    last_rect: Arc<Mutex<Option<Rect>>>,
}

impl SurfaceStats {
    pub fn presented(&self) -> usize {
        self.presented.load(Ordering::Relaxed)
    }

    pub fn last_rect(&self) -> Option<Rect> {
        *self.last_rect.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Surface that records presents instead of drawing them.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    size: Option<(u32, u32)>,
    stats: SurfaceStats,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surface with a fixed size that ignores the size requested by `create`.
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            size: Some((width, height)),
            ..Self::default()
        }
    }

    pub fn stats(&self) -> SurfaceStats {
        self.stats.clone()
    }
}

impl Surface for HeadlessSurface {
    fn create(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::Config(format!("surface size {}x{}", width, height)));
        }
        self.size.get_or_insert((width, height));
        Ok(())
    }

    fn size(&self) -> (u32, u32) {
        self.size.unwrap_or((0, 0))
    }

    fn present(&mut self, buffer: &PixelBuffer, dest: Rect) -> Result<(), BackendError> {
        if self.size.is_none() {
            return Err(BackendError::Config("surface presented before create".to_string()));
        }
        if buffer.data.is_empty() {
            return Err(BackendError::Other("empty pixel buffer".to_string()));
        }
        self.stats.presented.fetch_add(1, Ordering::Relaxed);
        *self
            .stats
            .last_rect
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(dest);
        Ok(())
    }
}
