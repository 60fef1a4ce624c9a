//! Periodic playback state reporter for UI updates.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::JoinHandle,
    time::Duration,
};

use serde::Serialize;

use crate::playback::session::SessionHandle;
use crate::playback::state::PlaybackState;

/// Snapshot of playback state sent to UI consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub position: f64,
    pub duration: Option<f64>,
    pub status: PlaybackState,
    pub delay_ms: u64,
    pub volume: f32,
}

impl Report {
    pub fn capture(session: &SessionHandle) -> Self {
        Self {
            position: session.position(),
            duration: session.duration(),
            status: session.status(),
            delay_ms: session.delay_ms(),
            volume: session.volume(),
        }
    }
}

pub type ReportFn = Arc<Mutex<dyn Fn(Report) + Send>>;

/// Background reporter that polls a session at fixed intervals.
///
/// The callback only fires when the snapshot changed. The thread exits on its
/// own after reporting a stopped session.
#[derive(Clone)]
pub struct Reporter {
    session: SessionHandle,
    report: ReportFn,
    interval: Duration,
    finish: Arc<AtomicBool>,
    thread_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Reporter {
    /// Create a new reporter for the given session and callback.
    pub fn new(session: SessionHandle, report: ReportFn, interval: Duration) -> Self {
        Self {
            session,
            report,
            interval,
            finish: Arc::new(AtomicBool::new(false)),
            thread_handle: Arc::new(Mutex::new(None)),
        }
    }

    fn run(&self) {
        let mut last_report: Option<Report> = None;

        loop {
            let report = Report::capture(&self.session);
            let stopped = report.status == PlaybackState::Stopped;

            if last_report.as_ref() != Some(&report) {
                let callback = self.report.lock().unwrap_or_else(PoisonError::into_inner);
                (*callback)(report.clone());
                last_report = Some(report);
            }

            if stopped || self.finish.load(Ordering::Relaxed) {
                break;
            }

            std::thread::sleep(self.interval);
        }
    }

    /// Start the background reporting thread.
    pub fn start(&self) {
        self.stop();
        self.finish.store(false, Ordering::Relaxed);
        let this = self.clone();
        let handle = std::thread::spawn(move || this.run());
        *self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Stop the background reporting thread.
    pub fn stop(&self) {
        self.finish.store(true, Ordering::Relaxed);
        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                log::warn!("reporter stop called from reporter thread; skipping join");
            } else if handle.join().is_err() {
                log::warn!("reporter thread panicked during join");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessSurface, PassthroughResampler, PassthroughScaler};
    use crate::backend::synthetic::{ManualAudioDevice, SyntheticCodecs, SyntheticConfig, SyntheticContainer};
    use crate::backend::Backends;
    use crate::playback::session::Session;
    use crate::playback::settings::PlaybackSettings;

    fn session() -> Session {
        let backends = Backends {
            container: Box::new(SyntheticContainer::new(SyntheticConfig::default())),
            codecs: Box::new(SyntheticCodecs),
            resampler: Box::new(PassthroughResampler::default()),
            scaler: Box::new(PassthroughScaler::default()),
            surface: Box::new(HeadlessSurface::new()),
            audio_device: Box::new(ManualAudioDevice::new()),
        };
        Session::open(backends, PlaybackSettings::default()).unwrap()
    }

    #[test]
    fn reports_changes_and_exits_after_stop() {
        let mut session = session();
        let seen: Arc<Mutex<Vec<Report>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = Reporter::new(
            session.handle(),
            Arc::new(Mutex::new(move |report: Report| sink.lock().unwrap().push(report))),
            Duration::from_millis(5),
        );
        reporter.start();
        std::thread::sleep(Duration::from_millis(30));
        session.set_volume(0.25);
        std::thread::sleep(Duration::from_millis(30));
        session.stop();
        std::thread::sleep(Duration::from_millis(30));
        reporter.stop();

        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 3, "got {:?}", *seen);
        assert_eq!(seen[0].status, PlaybackState::Paused);
        assert_eq!(seen[0].duration, Some(10.0));
        assert!(seen.iter().any(|r| r.volume == 0.25));
        assert_eq!(seen.last().map(|r| r.status), Some(PlaybackState::Stopped));
        let unique = seen.windows(2).all(|pair| pair[0] != pair[1]);
        assert!(unique);
    }
}
