//! `avpace simulate`: a generated A/V session run headless through the real
//! pipeline threads.

use std::time::Instant;

use avpace_lib::backend::headless::{HeadlessSurface, PassthroughResampler, PassthroughScaler};
use avpace_lib::backend::synthetic::{
    ClockedAudioDevice, SyntheticCodecs, SyntheticConfig, SyntheticContainer,
};
use avpace_lib::backend::Backends;
use avpace_lib::{OpenError, PlaybackSettings, Session};
use log::info;
use serde::Serialize;

/// Parameters of one simulated run.
pub struct SimulateArgs {
    pub seconds: f64,
    pub fps: f64,
    pub audio: bool,
    pub seek: Option<f64>,
}

/// Statistics printed once the simulated session drains.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub has_audio: bool,
    pub has_video: bool,
    pub duration: Option<f64>,
    pub frames_presented: usize,
    pub final_delay_ms: u64,
    pub final_drift: f64,
    pub position: f64,
    pub wall_seconds: f64,
}

pub fn simulate(args: SimulateArgs) -> Result<SimulationReport, OpenError> {
    let config = SyntheticConfig {
        seconds: args.seconds.max(0.0),
        fps: if args.fps > 0.0 { args.fps } else { 25.0 },
        audio: args.audio,
        ..SyntheticConfig::default()
    };
    let surface = HeadlessSurface::new();
    let stats = surface.stats();
    let backends = Backends {
        container: Box::new(SyntheticContainer::new(config)),
        codecs: Box::new(SyntheticCodecs),
        resampler: Box::new(PassthroughResampler::default()),
        scaler: Box::new(PassthroughScaler::default()),
        surface: Box::new(surface),
        audio_device: Box::new(ClockedAudioDevice::new()),
    };

    let mut session = Session::open(backends, PlaybackSettings::default())?;
    if let Some(target) = args.seek {
        session.seek(target);
    }
    let started = Instant::now();
    session.play();
    session.wait_until_finished();
    let handle = session.handle();
    session.stop();

    let report = SimulationReport {
        has_audio: session.has_audio(),
        has_video: session.has_video(),
        duration: session.duration(),
        frames_presented: stats.presented(),
        final_delay_ms: handle.delay_ms(),
        final_drift: handle.drift(),
        position: handle.position(),
        wall_seconds: started.elapsed().as_secs_f64(),
    };
    info!(
        "simulation presented {} frames, drift {:.3}s",
        report.frames_presented, report.final_drift
    );
    Ok(report)
}

pub fn run_simulate(args: SimulateArgs) -> Result<i32, OpenError> {
    let report = simulate(args)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
    );
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_video_only_run_presents_every_frame() {
        let report = simulate(SimulateArgs {
            seconds: 0.4,
            fps: 25.0,
            audio: false,
            seek: None,
        })
        .unwrap();
        assert!(!report.has_audio);
        assert_eq!(report.frames_presented, 10);
        assert_eq!(report.final_delay_ms, 40);
    }

    #[test]
    fn seek_skips_the_start() {
        let report = simulate(SimulateArgs {
            seconds: 1.0,
            fps: 25.0,
            audio: false,
            seek: Some(0.6),
        })
        .unwrap();
        assert!(report.frames_presented < 25);
    }
}
