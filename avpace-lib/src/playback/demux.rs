//! Demux stage: the single producer feeding both packet queues.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::backend::{ContainerBackend, ReadOutcome, SeekFlags};

use super::context::SessionContext;

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxEvent {
    /// A packet went into its stream's queue.
    Routed,
    /// A packet for an untracked stream was released.
    Discarded,
    Seeked,
    SeekFailed,
    /// A queue sat above its high-water mark; nothing was read.
    Stalled,
    /// End of stream reached; waiting for consumers to empty the queues.
    Draining,
    Stopped,
}

/// Raises the stop flag and closes the queues when the demux loop exits,
/// including by panic.
struct DemuxExitGuard {
    context: Arc<SessionContext>,
}

impl Drop for DemuxExitGuard {
    fn drop(&mut self) {
        self.context.shutdown();
        debug!("demux stage exited");
    }
}

pub struct DemuxStage {
    context: Arc<SessionContext>,
    container: Box<dyn ContainerBackend>,
    eof: bool,
}

impl DemuxStage {
    pub fn new(context: Arc<SessionContext>, container: Box<dyn ContainerBackend>) -> Self {
        Self {
            context,
            container,
            eof: false,
        }
    }

    /// Run until stopped, end of stream is fully drained, or a read fails.
    pub fn run(mut self) {
        let _guard = DemuxExitGuard {
            context: self.context.clone(),
        };
        while self.step() != DemuxEvent::Stopped {}
        self.container.close();
    }

    /// One iteration: stop check, pending seek, drain, backpressure, read.
    pub fn step(&mut self) -> DemuxEvent {
        let context = &self.context;
        if context.flags.is_stopped() {
            return DemuxEvent::Stopped;
        }

        if let Some(target) = context.seek.pending_target() {
            let event = self.perform_seek(target);
            self.context.seek.clear();
            return event;
        }

        if self.eof {
            if context.active_queues().iter().all(|(queue, _)| queue.is_empty()) {
                info!("end of stream drained");
                context.shutdown();
                return DemuxEvent::Stopped;
            }
            context.flags.sleep(context.settings.idle_wait());
            return DemuxEvent::Draining;
        }

        for (queue, high_watermark) in context.active_queues() {
            if queue.byte_size() > high_watermark {
                queue.wait_for_space(high_watermark, context.settings.backpressure_wait());
                return DemuxEvent::Stalled;
            }
        }

        match self.container.read_packet() {
            Ok(ReadOutcome::Packet(packet)) => match self.context.queue_for(packet.stream_index) {
                Some(queue) => {
                    queue.enqueue(packet.into());
                    DemuxEvent::Routed
                }
                None => DemuxEvent::Discarded,
            },
            Ok(ReadOutcome::EndOfStream) => {
                info!("end of stream reached, draining queues");
                self.eof = true;
                self.context.flags.set_end_of_stream(true);
                DemuxEvent::Draining
            }
            Err(err) => {
                error!("demux read failed: {}", err);
                self.context.shutdown();
                DemuxEvent::Stopped
            }
        }
    }

    fn perform_seek(&mut self, target: f64) -> DemuxEvent {
        let Some(stream) = self.context.seek_stream() else {
            return DemuxEvent::SeekFailed;
        };
        let timestamp = stream.time_base.to_native(target);
        let flags = SeekFlags {
            backward: true,
            any_frame: true,
        };
        match self.container.seek(stream.index, timestamp, flags) {
            Ok(()) => {
                for (queue, _) in self.context.active_queues() {
                    queue.flush_with_marker();
                }
                self.context.clocks.reset_video_clock();
                self.context.seek.mark_completed();
                self.eof = false;
                self.context.flags.set_end_of_stream(false);
                info!("seeked to {:.3}s", target);
                DemuxEvent::Seeked
            }
            Err(err) => {
                warn!("seek to {:.3}s failed: {}", target, err);
                DemuxEvent::SeekFailed
            }
        }
    }
}
