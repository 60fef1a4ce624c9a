//! Video decode/pace stage, driven one tick at a time.

use std::sync::Arc;

use log::{debug, trace, warn};

use crate::backend::{fit_rect, DecodeOutcome, Scaler, Surface, VideoDecoder};
use crate::packet::Packet;

use super::clock::nominal_frame_delay;
use super::context::{ActiveStream, SessionContext};

/// Result of one presentation tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// No packet was queued.
    Idle,
    /// A seek marker reset the decoder.
    Flushed,
    /// The packet produced nothing presentable.
    Skipped,
    Presented { pts: f64, delay_ms: u64 },
}

pub struct VideoStage {
    context: Arc<SessionContext>,
    stream: ActiveStream,
    decoder: Box<dyn VideoDecoder>,
    scaler: Box<dyn Scaler>,
    surface: Box<dyn Surface>,
}

impl VideoStage {
    pub fn new(
        context: Arc<SessionContext>,
        stream: ActiveStream,
        decoder: Box<dyn VideoDecoder>,
        scaler: Box<dyn Scaler>,
        surface: Box<dyn Surface>,
    ) -> Self {
        Self {
            context,
            stream,
            decoder,
            scaler,
            surface,
        }
    }

    /// Pop one packet, decode it, update the clocks and present.
    pub fn tick(&mut self) -> TickOutcome {
        let context = &self.context;
        let audio_master = context.has_audio();

        let item = context.video_queue.dequeue(false);
        if !audio_master {
            context.flags.set_starved(item.is_none());
        }
        let packet = match item {
            None => return TickOutcome::Idle,
            Some(Packet::FlushMarker) => {
                self.decoder.flush();
                debug!("video decoder flushed");
                return TickOutcome::Flushed;
            }
            Some(Packet::Data(packet)) => packet,
        };

        let frame = match self.decoder.decode(&packet) {
            Ok(DecodeOutcome::Frame(frame)) => frame,
            Ok(DecodeOutcome::NeedMoreInput) => return TickOutcome::Skipped,
            Err(err) => {
                warn!("skipping undecodable video packet: {}", err);
                return TickOutcome::Skipped;
            }
        };

        let time_base = self.stream.time_base;
        let clocks = &context.clocks;
        let presented_at = if audio_master {
            let pts = frame
                .pts
                .or(packet.pts)
                .or(packet.dts)
                .map(|ts| time_base.to_seconds(ts));
            let nominal = nominal_frame_delay(self.stream.frame_interval(), frame.repeat_count);
            let video_pts = clocks.synchronize_video(pts, nominal);
            let delay = clocks.pace(video_pts);
            trace!(
                "video {:.3}s audio {:.3}s delay {:.3}s",
                video_pts,
                clocks.audio_clock(),
                delay
            );
            video_pts
        } else {
            // Free-running video trusts only the packet's own pts.
            let pts = packet.pts.map(|ts| time_base.to_seconds(ts));
            let frame_rate = 1.0 / self.stream.frame_interval().max(f64::EPSILON);
            clocks.pace_free_running(pts, self.stream.frame_rate.unwrap_or(frame_rate));
            clocks.video_clock()
        };

        let buffer = match self.scaler.convert(&frame) {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!("dropping frame that failed to convert: {}", err);
                return TickOutcome::Skipped;
            }
        };
        let (surface_width, surface_height) = self.surface.size();
        let dest = fit_rect(buffer.width, buffer.height, surface_width, surface_height);
        if let Err(err) = self.surface.present(&buffer, dest) {
            warn!("present failed: {}", err);
            return TickOutcome::Skipped;
        }

        TickOutcome::Presented {
            pts: presented_at,
            delay_ms: clocks.scheduler_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessSurface, PassthroughScaler, SurfaceStats};
    use crate::backend::synthetic::{SyntheticCodecs, VIDEO_CODEC};
    use crate::backend::{CodecFactory, PixelFormat, StreamInfo, VideoSpec};
    use crate::packet::{MediaPacket, StreamKind, TimeBase};
    use crate::playback::settings::PlaybackSettings;

    const EPS: f64 = 1e-9;

    fn stage(with_audio: bool) -> (VideoStage, Arc<SessionContext>, SurfaceStats) {
        let mut info = StreamInfo::new(0, StreamKind::Video, TimeBase::new(1, 25), VIDEO_CODEC);
        info.width = Some(16);
        info.height = Some(8);
        info.frame_rate = Some(25.0);
        let video = ActiveStream::from(&info);
        let audio = with_audio.then_some(ActiveStream {
            index: 1,
            time_base: TimeBase::new(1, 48_000),
            frame_rate: None,
        });
        let context = Arc::new(SessionContext::new(PlaybackSettings::default(), audio, Some(video)));

        let spec = VideoSpec {
            width: 16,
            height: 8,
            format: PixelFormat::Yuv420p,
        };
        let mut scaler = PassthroughScaler::default();
        scaler.configure(spec, spec).unwrap();
        let mut surface = HeadlessSurface::new();
        surface.create(32, 32).unwrap();
        let stats = surface.stats();
        let decoder = SyntheticCodecs.open_video(&info).unwrap();
        let stage = VideoStage::new(
            context.clone(),
            video,
            decoder,
            Box::new(scaler),
            Box::new(surface),
        );
        (stage, context, stats)
    }

    fn frame(pts: Option<i64>, dts: i64) -> Packet {
        let mut packet = MediaPacket::new(0, vec![0; 64]).with_dts(dts);
        if let Some(pts) = pts {
            packet = packet.with_pts(pts);
        }
        Packet::Data(packet)
    }

    #[test]
    fn empty_queue_is_a_no_op() {
        let (mut stage, context, stats) = stage(true);
        assert_eq!(stage.tick(), TickOutcome::Idle);
        assert_eq!(stats.presented(), 0);
        assert_eq!(context.clocks.scheduler_delay_ms(), 40);
    }

    #[test]
    fn flush_marker_is_never_decoded() {
        let (mut stage, context, stats) = stage(true);
        context.video_queue.enqueue(Packet::FlushMarker);
        assert_eq!(stage.tick(), TickOutcome::Flushed);
        assert_eq!(stats.presented(), 0);
    }

    #[test]
    fn in_sync_frame_keeps_nominal_interval() {
        let (mut stage, context, stats) = stage(true);
        context.clocks.set_audio_clock(0.42);
        context.video_queue.enqueue(frame(Some(10), 10));
        context.video_queue.enqueue(frame(Some(11), 11));
        stage.tick();
        let outcome = stage.tick();
        match outcome {
            TickOutcome::Presented { pts, delay_ms } => {
                assert!((pts - 0.44).abs() < EPS);
                assert_eq!(delay_ms, 40);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(stats.presented(), 2);
        assert_eq!(stats.last_rect().map(|r| r.width), Some(32));
    }

    #[test]
    fn video_ahead_of_audio_doubles_interval() {
        let (mut stage, context, _) = stage(true);
        context.clocks.set_audio_clock(0.0);
        context.video_queue.enqueue(frame(Some(5), 5));
        context.video_queue.enqueue(frame(Some(6), 6));
        stage.tick();
        match stage.tick() {
            TickOutcome::Presented { pts, delay_ms } => {
                assert!((pts - 0.24).abs() < EPS);
                assert_eq!(delay_ms, 80);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn video_behind_audio_halves_interval() {
        let (mut stage, context, _) = stage(true);
        context.clocks.set_audio_clock(2.0);
        context.video_queue.enqueue(frame(Some(5), 5));
        context.video_queue.enqueue(frame(Some(6), 6));
        stage.tick();
        match stage.tick() {
            TickOutcome::Presented { delay_ms, .. } => assert_eq!(delay_ms, 20),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn frames_without_pts_extrapolate_from_clock() {
        let (mut stage, context, _) = stage(true);
        context.clocks.set_audio_clock(1.0);
        context.video_queue.enqueue(frame(Some(25), 25));
        stage.tick();
        assert!((context.clocks.video_clock() - 1.04).abs() < EPS);

        context.video_queue.enqueue(Packet::Data(MediaPacket::new(0, vec![0; 64])));
        match stage.tick() {
            TickOutcome::Presented { pts, .. } => assert!((pts - 1.04).abs() < EPS),
            other => panic!("unexpected {:?}", other),
        }
        assert!((context.clocks.video_clock() - 1.08).abs() < EPS);
    }

    #[test]
    fn dts_stands_in_for_missing_pts() {
        let (mut stage, context, _) = stage(true);
        context.video_queue.enqueue(frame(None, 50));
        match stage.tick() {
            TickOutcome::Presented { pts, .. } => assert!((pts - 2.0).abs() < EPS),
            other => panic!("unexpected {:?}", other),
        }
        assert!(context.clocks.frame_last_pts() > 1.99);
    }

    #[test]
    fn without_audio_video_is_its_own_master() {
        let (mut stage, context, _) = stage(false);
        context.clocks.set_audio_clock(100.0);
        context.video_queue.enqueue(frame(Some(50), 50));
        match stage.tick() {
            TickOutcome::Presented { pts, delay_ms } => {
                assert!((pts - 2.0).abs() < EPS);
                assert_eq!(delay_ms, 40);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!((context.clocks.video_clock() - 2.0).abs() < EPS);
        assert!(!context.flags.is_starved());
        assert_eq!(stage.tick(), TickOutcome::Idle);
        assert!(context.flags.is_starved());
    }

    #[test]
    fn free_running_clock_ignores_dts_only_packets() {
        let (mut stage, context, stats) = stage(false);
        context.clocks.set_video_clock(1.0);
        context.video_queue.enqueue(frame(None, 50));
        match stage.tick() {
            TickOutcome::Presented { pts, delay_ms } => {
                assert!((pts - 1.0).abs() < EPS);
                assert_eq!(delay_ms, 40);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!((context.clocks.video_clock() - 1.0).abs() < EPS);
        assert_eq!(stats.presented(), 1);
    }

    #[test]
    fn corrupt_packet_is_skipped() {
        let (mut stage, context, stats) = stage(true);
        context
            .video_queue
            .enqueue(Packet::Data(MediaPacket::new(0, vec![0xFF; 8]).with_pts(3)));
        assert_eq!(stage.tick(), TickOutcome::Skipped);
        assert_eq!(stats.presented(), 0);
        assert_eq!(context.clocks.video_clock(), 0.0);
    }
}
