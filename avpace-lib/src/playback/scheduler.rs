//! Presentation scheduler: ticks the video stage at the adaptive interval.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace};

use super::context::SessionContext;
use super::video::{TickOutcome, VideoStage};

/// Reports whether the audio device is consuming samples.
pub type ConsumptionProbe = Box<dyn Fn() -> bool + Send>;

/// Periodic trigger for [`VideoStage::tick`].
///
/// The interval is re-read from the clock pair before every sleep. While
/// paused the thread parks on the pause condvar instead of polling.
pub struct PresentationScheduler {
    context: Arc<SessionContext>,
    stage: VideoStage,
    consuming: Option<ConsumptionProbe>,
}

impl PresentationScheduler {
    pub fn new(context: Arc<SessionContext>, stage: VideoStage, consuming: Option<ConsumptionProbe>) -> Self {
        Self {
            context,
            stage,
            consuming,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("avpace-scheduler".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        let flags = &self.context.flags;
        let idle = self.context.settings.idle_wait();
        let mut presented: u64 = 0;
        loop {
            if !flags.wait_while_paused() {
                break;
            }
            if let Some(consuming) = &self.consuming {
                if !consuming() {
                    if !flags.sleep(idle) {
                        break;
                    }
                    continue;
                }
            }

            if let TickOutcome::Presented { pts, delay_ms } = self.stage.tick() {
                presented += 1;
                trace!("presented {:.3}s, next in {}ms", pts, delay_ms);
            }

            let delay = self.context.clocks.scheduler_delay_ms().max(1);
            if !flags.sleep(Duration::from_millis(delay)) {
                break;
            }
        }
        debug!("scheduler exited after {} frames", presented);
    }
}
