//! Session-wide stop/pause flags and the derived playback state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Externally visible playback state.
///
/// Never stored directly; derived from the flags below and the audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
    Buffering,
}

/// Cooperative control flags polled by every stage.
///
/// Pause and stop changes notify a condvar so waiting stages react at once
/// instead of on their next poll.
#[derive(Debug, Default)]
pub struct SessionFlags {
    stopped: AtomicBool,
    paused: Mutex<bool>,
    changed: Condvar,
    starved: AtomicBool,
    end_of_stream: AtomicBool,
}

impl SessionFlags {
    pub fn new(paused: bool) -> Self {
        Self {
            paused: Mutex::new(paused),
            ..Self::default()
        }
    }

    fn lock_paused(&self) -> MutexGuard<'_, bool> {
        self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise the global stop flag and wake every waiter.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _guard = self.lock_paused();
        self.changed.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        let mut guard = self.lock_paused();
        *guard = paused;
        drop(guard);
        self.changed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.lock_paused()
    }

    /// Block while paused. Returns `false` if the session stopped meanwhile.
    pub fn wait_while_paused(&self) -> bool {
        let guard = self.lock_paused();
        let _guard = self
            .changed
            .wait_while(guard, |paused| *paused && !self.is_stopped())
            .unwrap_or_else(PoisonError::into_inner);
        !self.is_stopped()
    }

    /// Sleep for `duration` unless stopped first. Returns `false` if stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self.lock_paused();
        if self.is_stopped() {
            return false;
        }
        let _ = self
            .changed
            .wait_timeout_while(guard, duration, |_| !self.is_stopped())
            .unwrap_or_else(PoisonError::into_inner);
        !self.is_stopped()
    }

    /// Record whether the last consumer poll came up empty.
    pub fn set_starved(&self, starved: bool) {
        self.starved.store(starved, Ordering::Relaxed);
    }

    pub fn is_starved(&self) -> bool {
        self.starved.load(Ordering::Relaxed)
    }

    pub fn set_end_of_stream(&self, eos: bool) {
        self.end_of_stream.store(eos, Ordering::SeqCst);
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::SeqCst)
    }

    /// Derive the playback state.
    ///
    /// `device_active` is the audio device's consumption state when an audio
    /// stream is active, `None` for video-only sessions.
    pub fn state(&self, device_active: Option<bool>) -> PlaybackState {
        if self.is_stopped() {
            return PlaybackState::Stopped;
        }
        if self.is_paused() || device_active == Some(false) {
            return PlaybackState::Paused;
        }
        if self.is_starved() && !self.is_end_of_stream() {
            return PlaybackState::Buffering;
        }
        PlaybackState::Playing
    }
}
