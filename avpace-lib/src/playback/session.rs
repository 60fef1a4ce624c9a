//! Playback session: opens the backends, wires the stages together and exposes
//! the control surface.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info, warn};

use crate::backend::{AudioDevice, AudioSpec, Backends, PixelFormat, StreamInfo, VideoSpec};
use crate::error::OpenError;
use crate::packet::StreamKind;

use super::audio::AudioPullStage;
use super::context::{ActiveStream, SessionContext};
use super::demux::{DemuxEvent, DemuxStage};
use super::scheduler::{ConsumptionProbe, PresentationScheduler};
use super::settings::PlaybackSettings;
use super::state::PlaybackState;
use super::video::{TickOutcome, VideoStage};

type AudioSlot = Arc<Mutex<Option<AudioPullStage>>>;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State reachable from every clone of a [`SessionHandle`].
struct SessionShared {
    context: Arc<SessionContext>,
    audio_device: Mutex<Option<Box<dyn AudioDevice>>>,
    duration: Option<f64>,
    volume: Mutex<f32>,
}

impl SessionShared {
    fn device_active(&self) -> Option<bool> {
        if !self.context.has_audio() {
            return None;
        }
        Some(
            lock(&self.audio_device)
                .as_ref()
                .map(|device| device.is_active())
                .unwrap_or(false),
        )
    }

    fn pause(&self, paused: bool) {
        if self.context.flags.is_stopped() {
            return;
        }
        self.context.flags.set_paused(paused);
        // The next consumer poll re-derives starvation.
        self.context.flags.set_starved(false);
        if let Some(device) = lock(&self.audio_device).as_mut() {
            device.pause(paused);
        }
    }

    fn status(&self) -> PlaybackState {
        self.context.flags.state(self.device_active())
    }

    fn seek(&self, target: f64) -> bool {
        let accepted = self.context.seek.request_seek(target);
        if !accepted {
            info!("seek to {:.3}s dropped, another seek is pending", target);
        }
        accepted
    }

    fn position(&self) -> f64 {
        if self.context.has_audio() {
            self.context.clocks.audio_clock()
        } else {
            self.context.clocks.video_clock()
        }
    }

    fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        *lock(&self.volume) = volume;
        if let Some(device) = lock(&self.audio_device).as_mut() {
            device.set_volume(volume);
        }
    }

    fn request_stop(&self) {
        self.context.shutdown();
        if let Some(device) = lock(&self.audio_device).as_mut() {
            device.pause(true);
        }
    }
}

/// Cloneable control surface for threads other than the session owner.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn pause(&self, paused: bool) {
        self.shared.pause(paused);
    }

    /// Ask for a jump to `target` seconds. Returns `false` if dropped.
    pub fn seek(&self, target: f64) -> bool {
        self.shared.seek(target)
    }

    pub fn seek_relative(&self, delta: f64) -> bool {
        self.shared.seek((self.shared.position() + delta).max(0.0))
    }

    pub fn status(&self) -> PlaybackState {
        self.shared.status()
    }

    pub fn duration(&self) -> Option<f64> {
        self.shared.duration
    }

    pub fn position(&self) -> f64 {
        self.shared.position()
    }

    pub fn volume(&self) -> f32 {
        *lock(&self.shared.volume)
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.set_volume(volume);
    }

    /// Current scheduler interval in milliseconds.
    pub fn delay_ms(&self) -> u64 {
        self.shared.context.clocks.scheduler_delay_ms()
    }

    /// Audio clock minus video clock, in seconds.
    pub fn drift(&self) -> f64 {
        self.shared.context.clocks.drift()
    }

    /// Raise the stop flag. Threads are joined by the owning [`Session`].
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.context.flags.is_stopped()
    }
}

/// Stages built by `open` and not yet handed to a thread.
struct PendingStages {
    demux: DemuxStage,
    video: Option<VideoStage>,
}

/// Step-by-step driver for a session, replacing the demux and scheduler
/// threads. Audio is still pulled by the device.
pub struct SessionDriver {
    demux: DemuxStage,
    video: Option<VideoStage>,
}

impl SessionDriver {
    pub fn demux_step(&mut self) -> DemuxEvent {
        self.demux.step()
    }

    /// One presentation tick, `None` when the session has no video.
    pub fn tick(&mut self) -> Option<TickOutcome> {
        self.video.as_mut().map(VideoStage::tick)
    }
}

/// An open media source with its playback pipeline.
///
/// Opens paused; [`Session::play`] starts the pipeline threads.
pub struct Session {
    shared: Arc<SessionShared>,
    pending: Option<PendingStages>,
    threads: Vec<JoinHandle<()>>,
}

impl Session {
    /// Probe the container, open decoders and outputs.
    ///
    /// Codec failures abort the open. Output failures only disable their
    /// stream; the open fails when neither stream survives.
    pub fn open(backends: Backends, settings: PlaybackSettings) -> Result<Session, OpenError> {
        let Backends {
            container,
            mut codecs,
            mut resampler,
            mut scaler,
            mut surface,
            mut audio_device,
        } = backends;

        let streams = container.streams().to_vec();
        let audio_info = first_of(&streams, StreamKind::Audio);
        let video_info = first_of(&streams, StreamKind::Video);
        if audio_info.is_none() && video_info.is_none() {
            return Err(OpenError::NoStreams);
        }

        let audio_decoder = match &audio_info {
            Some(info) => Some(codecs.open_audio(info).map_err(|err| {
                OpenError::UnsupportedCodec {
                    stream: info.index,
                    reason: err.to_string(),
                }
            })?),
            None => None,
        };
        let video_decoder = match &video_info {
            Some(info) => Some(codecs.open_video(info).map_err(|err| {
                OpenError::UnsupportedCodec {
                    stream: info.index,
                    reason: err.to_string(),
                }
            })?),
            None => None,
        };

        let video = match (video_info, video_decoder) {
            (Some(info), Some(decoder)) => {
                let width = info.width.unwrap_or(0);
                let height = info.height.unwrap_or(0);
                let spec = VideoSpec {
                    width,
                    height,
                    format: PixelFormat::Yuv420p,
                };
                let ready = scaler
                    .configure(spec, spec)
                    .and_then(|_| surface.create(width, height));
                match ready {
                    Ok(()) => Some((info, decoder)),
                    Err(err) => {
                        warn!("video output unavailable, continuing without video: {}", err);
                        None
                    }
                }
            }
            _ => None,
        };

        let slot: AudioSlot = Arc::new(Mutex::new(None));
        let audio = match (audio_info, audio_decoder) {
            (Some(info), Some(decoder)) => {
                let source = AudioSpec::new(
                    info.sample_rate.unwrap_or(44_100),
                    info.channels.unwrap_or(2).max(1),
                );
                let wanted = source.with_buffer_frames(settings.audio_buffer_frames);
                let callback_slot = slot.clone();
                let opened = audio_device.open(
                    wanted,
                    Box::new(move |out: &mut [f32]| match lock(callback_slot.as_ref()).as_mut() {
                        Some(stage) => stage.fill(out),
                        None => out.fill(0.0),
                    }),
                );
                match opened.and_then(|obtained| {
                    resampler.configure(source, obtained).map(|_| obtained)
                }) {
                    Ok(obtained) => Some((info, decoder, obtained)),
                    Err(err) => {
                        warn!("audio output unavailable, continuing without audio: {}", err);
                        audio_device.close();
                        None
                    }
                }
            }
            _ => None,
        };

        if audio.is_none() && video.is_none() {
            return Err(OpenError::NoPlayableOutput);
        }

        let duration = container
            .duration()
            .or_else(|| video.as_ref().and_then(|(info, _)| info.duration))
            .or_else(|| audio.as_ref().and_then(|(info, _, _)| info.duration));

        let context = Arc::new(SessionContext::new(
            settings,
            audio.as_ref().map(|(info, _, _)| ActiveStream::from(info)),
            video.as_ref().map(|(info, _)| ActiveStream::from(info)),
        ));

        let volume = context.settings.volume;
        let audio_device = match audio {
            Some((info, decoder, obtained)) => {
                info!(
                    "audio stream {} ({}) -> {}Hz/{}ch",
                    info.index, info.codec, obtained.sample_rate, obtained.channels
                );
                *lock(slot.as_ref()) = Some(AudioPullStage::new(
                    context.clone(),
                    decoder,
                    resampler,
                    obtained,
                ));
                audio_device.set_volume(volume);
                Some(audio_device)
            }
            None => None,
        };

        let video = video.map(|(info, decoder)| {
            info!(
                "video stream {} ({}) {}x{}",
                info.index,
                info.codec,
                info.width.unwrap_or(0),
                info.height.unwrap_or(0)
            );
            VideoStage::new(
                context.clone(),
                ActiveStream::from(&info),
                decoder,
                scaler,
                surface,
            )
        });

        let demux = DemuxStage::new(context.clone(), container);
        Ok(Session {
            shared: Arc::new(SessionShared {
                context,
                audio_device: Mutex::new(audio_device),
                duration,
                volume: Mutex::new(volume),
            }),
            pending: Some(PendingStages { demux, video }),
            threads: Vec::new(),
        })
    }

    /// Start (or resume) playback.
    pub fn play(&mut self) {
        if let Some(stages) = self.pending.take() {
            self.spawn_stages(stages);
        }
        self.shared.pause(false);
    }

    fn spawn_stages(&mut self, stages: PendingStages) {
        let context = self.shared.context.clone();
        let demux = stages.demux;
        match std::thread::Builder::new()
            .name("avpace-demux".to_string())
            .spawn(move || demux.run())
        {
            Ok(handle) => self.threads.push(handle),
            Err(err) => {
                error!("failed to start demux thread: {}", err);
                self.shared.request_stop();
                return;
            }
        }

        if let Some(video) = stages.video {
            let probe = context.has_audio().then(|| {
                let shared = self.shared.clone();
                Box::new(move || shared.device_active().unwrap_or(true)) as ConsumptionProbe
            });
            match PresentationScheduler::new(context, video, probe).spawn() {
                Ok(handle) => self.threads.push(handle),
                Err(err) => {
                    error!("failed to start scheduler thread: {}", err);
                    self.shared.request_stop();
                }
            }
        }
    }

    /// Start playback without pipeline threads and return a driver that
    /// advances demux and presentation on demand.
    ///
    /// Returns `None` if the pipeline was already started.
    pub fn play_stepped(&mut self) -> Option<SessionDriver> {
        let stages = self.pending.take()?;
        self.shared.pause(false);
        Some(SessionDriver {
            demux: stages.demux,
            video: stages.video,
        })
    }

    pub fn pause(&self, paused: bool) {
        self.shared.pause(paused);
    }

    /// Stop playback, join the pipeline threads and close the audio device.
    pub fn stop(&mut self) {
        self.shared.request_stop();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("playback thread panicked during join");
            }
        }
        if let Some(mut device) = lock(&self.shared.audio_device).take() {
            device.close();
        }
        self.pending = None;
    }

    pub fn seek(&self, target: f64) -> bool {
        self.shared.seek(target)
    }

    pub fn seek_relative(&self, delta: f64) -> bool {
        self.handle().seek_relative(delta)
    }

    pub fn status(&self) -> PlaybackState {
        self.shared.status()
    }

    /// Container duration, else the video (then audio) stream's declared one.
    pub fn duration(&self) -> Option<f64> {
        self.shared.duration
    }

    /// Audio clock when audio is active, else the video clock.
    pub fn position(&self) -> f64 {
        self.shared.position()
    }

    pub fn volume(&self) -> f32 {
        *lock(&self.shared.volume)
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.set_volume(volume);
    }

    pub fn has_audio(&self) -> bool {
        self.shared.context.has_audio()
    }

    pub fn has_video(&self) -> bool {
        self.shared.context.has_video()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    /// Shared queues and clocks, for diagnostics and tests.
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.shared.context
    }

    /// Block until the session stops on its own or via a handle.
    pub fn wait_until_finished(&self) {
        let flags = &self.shared.context.flags;
        let idle = self.shared.context.settings.idle_wait().max(Duration::from_millis(1));
        while flags.sleep(idle) {}
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn first_of(streams: &[StreamInfo], kind: StreamKind) -> Option<StreamInfo> {
    streams.iter().find(|stream| stream.kind == kind).cloned()
}
