//! Audio output and resampling on rodio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, warn};
use rodio::buffer::SamplesBuffer;
use rodio::source::{SeekError, Source, UniformSourceIterator};
use rodio::{OutputStream, OutputStreamBuilder, Sink};

use crate::backend::{AudioCallback, AudioDevice, AudioFrame, AudioSpec, Resampler};
use crate::error::BackendError;

const OUTPUT_STREAM_OPEN_RETRIES: usize = 20;
const OUTPUT_STREAM_OPEN_RETRY_MS: u64 = 100;

/// Pulls fixed-size blocks from the engine callback as rodio asks for samples.
struct PullSource {
    callback: AudioCallback,
    block: Vec<f32>,
    position: usize,
    channels: u16,
    sample_rate: u32,
    closed: Arc<AtomicBool>,
}

impl PullSource {
    fn new(spec: AudioSpec, callback: AudioCallback, closed: Arc<AtomicBool>) -> Self {
        let block_len = spec.buffer_frames.max(1) * spec.channels.max(1) as usize;
        Self {
            callback,
            block: vec![0.0; block_len],
            position: block_len,
            channels: spec.channels.max(1),
            sample_rate: spec.sample_rate.max(1),
            closed,
        }
    }
}

impl Iterator for PullSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.block.len() {
            if self.closed.load(Ordering::Relaxed) {
                return None;
            }
            (self.callback)(&mut self.block);
            self.position = 0;
        }
        let sample = self.block[self.position];
        self.position += 1;
        Some(sample)
    }
}

impl Source for PullSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }

    fn try_seek(&mut self, _pos: Duration) -> Result<(), SeekError> {
        Err(SeekError::NotSupported {
            underlying_source: "PullSource",
        })
    }
}

fn open_output_stream_with_retry() -> Option<OutputStream> {
    for attempt in 1..=OUTPUT_STREAM_OPEN_RETRIES {
        match OutputStreamBuilder::open_default_stream() {
            Ok(stream) => return Some(stream),
            Err(err) => {
                if attempt == OUTPUT_STREAM_OPEN_RETRIES {
                    error!(
                        "failed to open default output stream after {} attempts: {}",
                        OUTPUT_STREAM_OPEN_RETRIES, err
                    );
                    return None;
                }
                warn!(
                    "open_default_stream attempt {}/{} failed: {}",
                    attempt, OUTPUT_STREAM_OPEN_RETRIES, err
                );
                thread::sleep(Duration::from_millis(OUTPUT_STREAM_OPEN_RETRY_MS));
            }
        }
    }
    None
}

/// Default output device driven through a rodio [`Sink`].
///
/// The output stream lives on a dedicated thread for as long as the device is
/// open; the sink plays a single never-ending [`PullSource`]. Rodio's mixer
/// adapts the requested layout to the hardware, so the obtained spec always
/// equals the requested one.
pub struct RodioAudioDevice {
    sink: Option<Sink>,
    closed: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    volume: f32,
}

impl RodioAudioDevice {
    pub fn new() -> Self {
        Self {
            sink: None,
            closed: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            volume: 1.0,
        }
    }
}

impl Default for RodioAudioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for RodioAudioDevice {
    fn open(&mut self, spec: AudioSpec, callback: AudioCallback) -> Result<AudioSpec, BackendError> {
        if self.sink.is_some() {
            return Err(BackendError::Device("device already open".to_string()));
        }
        if spec.sample_rate == 0 || spec.channels == 0 {
            return Err(BackendError::Config(format!(
                "invalid output layout {} Hz x {}",
                spec.sample_rate, spec.channels
            )));
        }

        self.closed = Arc::new(AtomicBool::new(false));
        let closed = self.closed.clone();
        let (sender, receiver) = mpsc::channel::<Result<Sink, BackendError>>();
        let handle = thread::Builder::new()
            .name("avpace-audio-out".to_string())
            .spawn(move || {
                let Some(stream) = open_output_stream_with_retry() else {
                    let _ = sender.send(Err(BackendError::Device(
                        "no default output stream".to_string(),
                    )));
                    return;
                };
                let sink = Sink::connect_new(stream.mixer());
                sink.pause();
                sink.append(PullSource::new(spec, callback, closed.clone()));
                if sender.send(Ok(sink)).is_err() {
                    return;
                }
                while !closed.load(Ordering::Relaxed) {
                    thread::park_timeout(Duration::from_millis(100));
                }
                drop(stream);
                debug!("audio output stream closed");
            })?;

        let wait = Duration::from_millis(OUTPUT_STREAM_OPEN_RETRIES as u64 * OUTPUT_STREAM_OPEN_RETRY_MS + 1000);
        let sink = match receiver.recv_timeout(wait) {
            Ok(Ok(sink)) => sink,
            Ok(Err(err)) => {
                let _ = handle.join();
                return Err(err);
            }
            Err(_) => {
                self.closed.store(true, Ordering::Relaxed);
                return Err(BackendError::Device(
                    "output stream did not start".to_string(),
                ));
            }
        };
        sink.set_volume(self.volume);
        self.sink = Some(sink);
        self.thread_handle = Some(handle);
        Ok(spec)
    }

    fn pause(&mut self, paused: bool) {
        if let Some(sink) = &self.sink {
            if paused {
                sink.pause();
            } else {
                sink.play();
            }
        }
    }

    fn is_active(&self) -> bool {
        self.sink.as_ref().is_some_and(|sink| !sink.is_paused())
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let Some(sink) = &self.sink {
            sink.set_volume(volume);
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        if let Some(handle) = self.thread_handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("audio output thread panicked");
            }
        }
    }
}

impl Drop for RodioAudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sample-rate and channel conversion through rodio's uniform source adapter.
#[derive(Debug, Default)]
pub struct RodioResampler {
    target: Option<AudioSpec>,
}

impl Resampler for RodioResampler {
    fn configure(&mut self, source: AudioSpec, target: AudioSpec) -> Result<(), BackendError> {
        if source.sample_rate == 0 || source.channels == 0 {
            return Err(BackendError::Config("source layout is empty".to_string()));
        }
        if target.sample_rate == 0 || target.channels == 0 {
            return Err(BackendError::Config("target layout is empty".to_string()));
        }
        self.target = Some(target);
        Ok(())
    }

    fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<f32>, BackendError> {
        let target = self
            .target
            .ok_or_else(|| BackendError::Config("resampler not configured".to_string()))?;
        if frame.spec().same_layout(&target) || frame.samples.is_empty() {
            return Ok(frame.samples.clone());
        }
        if frame.sample_rate == 0 || frame.channels == 0 {
            return Err(BackendError::Decode("frame without layout".to_string()));
        }
        let input = SamplesBuffer::new(frame.channels, frame.sample_rate, frame.samples.clone());
        Ok(UniformSourceIterator::new(input, target.channels, target.sample_rate).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn pull_source_requests_whole_blocks() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        let callback: AudioCallback = Box::new(move |out: &mut [f32]| {
            *counter.lock().unwrap() += 1;
            out.fill(0.5);
        });
        let closed = Arc::new(AtomicBool::new(false));
        let spec = AudioSpec::new(48_000, 2).with_buffer_frames(4);
        let mut source = PullSource::new(spec, callback, closed.clone());

        let first: Vec<f32> = source.by_ref().take(8).collect();
        assert_eq!(first, vec![0.5; 8]);
        assert_eq!(*calls.lock().unwrap(), 1);
        source.next();
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 48_000);
    }

    #[test]
    fn pull_source_ends_once_closed() {
        let closed = Arc::new(AtomicBool::new(false));
        let spec = AudioSpec::new(8_000, 1).with_buffer_frames(2);
        let mut source = PullSource::new(spec, Box::new(|out: &mut [f32]| out.fill(0.0)), closed.clone());
        assert!(source.next().is_some());
        closed.store(true, Ordering::Relaxed);
        assert!(source.next().is_some());
        assert!(source.next().is_none());
    }

    #[test]
    fn unopened_device_is_inactive() {
        let mut device = RodioAudioDevice::new();
        assert!(!device.is_active());
        device.pause(false);
        assert!(!device.is_active());
        device.close();
    }

    #[test]
    fn resampler_passes_matching_layout_through() {
        let mut resampler = RodioResampler::default();
        let spec = AudioSpec::new(48_000, 2);
        resampler.configure(spec, spec).unwrap();
        let frame = AudioFrame {
            samples: vec![0.1, 0.2, 0.3, 0.4],
            channels: 2,
            sample_rate: 48_000,
        };
        assert_eq!(resampler.convert(&frame).unwrap(), frame.samples);
    }

    #[test]
    fn resampler_upsamples_to_target_rate() {
        let mut resampler = RodioResampler::default();
        resampler
            .configure(AudioSpec::new(24_000, 1), AudioSpec::new(48_000, 1))
            .unwrap();
        let frame = AudioFrame {
            samples: vec![0.25; 240],
            channels: 1,
            sample_rate: 24_000,
        };
        let out = resampler.convert(&frame).unwrap();
        assert!(out.len() >= 460 && out.len() <= 490, "got {}", out.len());
    }

    #[test]
    fn unconfigured_resampler_errors() {
        let mut resampler = RodioResampler::default();
        let frame = AudioFrame {
            samples: vec![0.0; 2],
            channels: 1,
            sample_rate: 8_000,
        };
        assert!(matches!(resampler.convert(&frame), Err(BackendError::Config(_))));
        assert!(resampler
            .configure(AudioSpec::new(0, 1), AudioSpec::new(8_000, 1))
            .is_err());
    }
}
