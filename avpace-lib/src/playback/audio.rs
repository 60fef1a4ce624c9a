//! Audio pull stage: runs inside the output device's callback.
//!
//! The device thread is latency critical, so nothing here blocks. Every call
//! fills the whole output slice, padding with silence when the queue runs dry.

use std::sync::Arc;

use dasp_ring_buffer::Bounded;
use log::{trace, warn};

use crate::backend::{AudioDecoder, AudioSpec, DecodeOutcome, Resampler};
use crate::packet::{Packet, TimeBase};

use super::context::SessionContext;

pub struct AudioPullStage {
    context: Arc<SessionContext>,
    decoder: Box<dyn AudioDecoder>,
    resampler: Box<dyn Resampler>,
    time_base: TimeBase,
    target: AudioSpec,
    staging: Bounded<Vec<f32>>,
    seek_epoch: u64,
}

impl AudioPullStage {
    pub fn new(
        context: Arc<SessionContext>,
        decoder: Box<dyn AudioDecoder>,
        resampler: Box<dyn Resampler>,
        target: AudioSpec,
    ) -> Self {
        let time_base = context
            .audio_stream
            .map(|stream| stream.time_base)
            .unwrap_or_default();
        let capacity = context.settings.max_audio_frame_samples.max(1);
        let seek_epoch = context.seek.completed();
        Self {
            context,
            decoder,
            resampler,
            time_base,
            target,
            staging: Bounded::from(vec![0.0; capacity]),
            seek_epoch,
        }
    }

    /// Fill `out` with interleaved samples in the device layout.
    pub fn fill(&mut self, out: &mut [f32]) {
        if self.context.flags.is_stopped() || self.context.seek.is_pending() {
            out.fill(0.0);
            return;
        }

        let epoch = self.context.seek.completed();
        if epoch != self.seek_epoch {
            self.seek_epoch = epoch;
            self.clear_staging();
        }

        let mut written = 0;
        while written < out.len() {
            if self.staging.len() == 0 && !self.refill() {
                out[written..].fill(0.0);
                trace!("audio underrun, {} samples of silence", out.len() - written);
                self.context.flags.set_starved(true);
                return;
            }
            while written < out.len() {
                match self.staging.pop() {
                    Some(sample) => {
                        out[written] = sample;
                        written += 1;
                    }
                    None => break,
                }
            }
        }
        self.context.flags.set_starved(false);
    }

    /// Decode queued packets until one yields samples. Never waits.
    fn refill(&mut self) -> bool {
        loop {
            let packet = match self.context.audio_queue.dequeue(false) {
                Some(Packet::Data(packet)) => packet,
                Some(Packet::FlushMarker) => {
                    self.decoder.flush();
                    self.clear_staging();
                    continue;
                }
                None => return false,
            };

            let frame = match self.decoder.decode(&packet) {
                Ok(DecodeOutcome::Frame(frame)) => frame,
                Ok(DecodeOutcome::NeedMoreInput) => continue,
                Err(err) => {
                    warn!("skipping undecodable audio packet: {}", err);
                    continue;
                }
            };
            let samples = match self.resampler.convert(&frame) {
                Ok(samples) => samples,
                Err(err) => {
                    warn!("skipping audio frame that failed to resample: {}", err);
                    continue;
                }
            };

            let clocks = &self.context.clocks;
            if let Some(pts) = packet.pts {
                clocks.set_audio_clock(self.time_base.to_seconds(pts));
            }
            let channels = self.target.channels.max(1) as usize;
            let frames = samples.len() / channels;
            if self.target.sample_rate > 0 {
                clocks.advance_audio_clock(frames as f64 / self.target.sample_rate as f64);
            }

            if samples.len() > self.staging.max_len() {
                self.staging = Bounded::from(vec![0.0; samples.len()]);
            }
            for sample in samples.iter() {
                let _ = self.staging.push(*sample);
            }
            if !samples.is_empty() {
                return true;
            }
        }
    }

    fn clear_staging(&mut self) {
        while self.staging.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::PassthroughResampler;
    use crate::backend::synthetic::{SyntheticCodecs, AUDIO_CODEC};
    use crate::backend::{CodecFactory, StreamInfo};
    use crate::packet::{MediaPacket, StreamKind};
    use crate::playback::context::ActiveStream;
    use crate::playback::settings::PlaybackSettings;

    const RATE: u32 = 48_000;

    fn stage() -> (AudioPullStage, Arc<SessionContext>) {
        let mut info = StreamInfo::new(0, StreamKind::Audio, TimeBase::new(1, RATE), AUDIO_CODEC);
        info.sample_rate = Some(RATE);
        info.channels = Some(2);
        let context = Arc::new(SessionContext::new(
            PlaybackSettings::default(),
            Some(ActiveStream::from(&info)),
            None,
        ));
        let decoder = SyntheticCodecs.open_audio(&info).unwrap();
        let spec = AudioSpec::new(RATE, 2);
        let mut resampler = PassthroughResampler::default();
        resampler.configure(spec, spec).unwrap();
        let stage = AudioPullStage::new(context.clone(), decoder, Box::new(resampler), spec);
        (stage, context)
    }

    fn packet(pts: Option<i64>, frames: i64) -> Packet {
        let mut packet = MediaPacket::new(0, vec![0; 16]).with_duration(frames);
        if let Some(pts) = pts {
            packet = packet.with_pts(pts);
        }
        Packet::Data(packet)
    }

    #[test]
    fn empty_queue_fills_silence_and_marks_starved() {
        let (mut stage, context) = stage();
        let mut out = vec![1.0f32; 64];
        stage.fill(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert!(context.flags.is_starved());
    }

    #[test]
    fn explicit_pts_resets_then_advances_clock() {
        let (mut stage, context) = stage();
        context.clocks.set_audio_clock(99.0);
        context.audio_queue.enqueue(packet(Some(RATE as i64), 1024));
        let mut out = vec![0.0f32; 256];
        stage.fill(&mut out);
        let expected = 1.0 + 1024.0 / RATE as f64;
        assert!((context.clocks.audio_clock() - expected).abs() < 1e-9);
        assert!(!context.flags.is_starved());
    }

    #[test]
    fn missing_pts_only_advances_clock() {
        let (mut stage, context) = stage();
        context.clocks.set_audio_clock(2.0);
        context.audio_queue.enqueue(packet(None, 480));
        let mut out = vec![0.0f32; 960];
        stage.fill(&mut out);
        assert!((context.clocks.audio_clock() - 2.01).abs() < 1e-9);
    }

    #[test]
    fn short_queue_pads_with_silence() {
        let (mut stage, context) = stage();
        context.audio_queue.enqueue(packet(Some(0), 16));
        let mut out = vec![1.0f32; 64];
        stage.fill(&mut out);
        assert!(out[32..].iter().all(|s| *s == 0.0));
        assert!(context.flags.is_starved());
    }

    #[test]
    fn undecodable_packet_is_skipped() {
        let (mut stage, context) = stage();
        context
            .audio_queue
            .enqueue(Packet::Data(MediaPacket::new(0, vec![0xFF; 4]).with_pts(0).with_duration(64)));
        context.audio_queue.enqueue(packet(Some(4800), 64));
        let mut out = vec![0.0f32; 128];
        stage.fill(&mut out);
        let expected = 0.1 + 64.0 / RATE as f64;
        assert!((context.clocks.audio_clock() - expected).abs() < 1e-9);
        assert!(context.audio_queue.is_empty());
    }

    #[test]
    fn pending_seek_outputs_silence_without_consuming() {
        let (mut stage, context) = stage();
        context.audio_queue.enqueue(packet(Some(0), 1024));
        context.seek.request_seek(3.0);
        let mut out = vec![1.0f32; 64];
        stage.fill(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(context.audio_queue.len(), 1);
    }

    #[test]
    fn flush_marker_discards_staged_samples() {
        let (mut stage, context) = stage();
        context.audio_queue.enqueue(packet(Some(0), 1024));
        let mut out = vec![0.0f32; 64];
        stage.fill(&mut out);
        assert!(stage.staging.len() > 0);

        context.audio_queue.flush_with_marker();
        context.seek.mark_completed();
        context.audio_queue.enqueue(packet(Some(RATE as i64 * 5), 32));
        let mut out = vec![0.0f32; 64];
        stage.fill(&mut out);
        let expected = 5.0 + 32.0 / RATE as f64;
        assert!((context.clocks.audio_clock() - expected).abs() < 1e-9);
        assert_eq!(stage.staging.len(), 0);
    }
}
