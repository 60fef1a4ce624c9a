//! Single-slot seek request shared between the UI and the demux stage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default, Clone, Copy)]
struct SeekRequest {
    pending: bool,
    target: f64,
}

/// Holds at most one outstanding seek.
///
/// Any thread may request; only the demux stage clears, after it has tried
/// the seek. Requests made while one is pending are dropped.
#[derive(Debug, Default)]
pub struct SeekController {
    request: Mutex<SeekRequest>,
    completed: AtomicU64,
}

impl SeekController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SeekRequest> {
        self.request.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `target` (seconds) unless a seek is already in flight.
    ///
    /// Returns `true` when the request was accepted.
    pub fn request_seek(&self, target: f64) -> bool {
        let mut request = self.lock();
        if request.pending {
            return false;
        }
        request.target = target.max(0.0);
        request.pending = true;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.lock().pending
    }

    /// Target of the pending request, left in place until [`clear`](Self::clear).
    pub fn pending_target(&self) -> Option<f64> {
        let request = self.lock();
        request.pending.then_some(request.target)
    }

    /// Drop the pending flag and stored target.
    pub fn clear(&self) {
        *self.lock() = SeekRequest::default();
    }

    /// Count a seek that repositioned the container.
    pub fn mark_completed(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of successful seeks so far. Consumers compare it to drop
    /// output staged before the jump.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }
}
