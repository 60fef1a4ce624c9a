use std::{
    error::Error,
    io,
    sync::{Arc, Mutex},
    thread::sleep,
    time::Duration,
};

use avpace_lib::backend::headless::{HeadlessSurface, PassthroughScaler};
use avpace_lib::backend::rodio::{RodioAudioDevice, RodioResampler};
use avpace_lib::backend::symphonia::SymphoniaContainer;
use avpace_lib::backend::Backends;
use avpace_lib::diagnostics::reporter::{Report, Reporter};
use avpace_lib::{PlaybackSettings, PlaybackState, Session};
use clap::ArgMatches;
use crossterm::{
    cursor, execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::info;
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::cli::simulate::SimulateArgs;
use crate::logging::{self, LogBuffer};
use crate::{cli, controls, ui};

const REPORT_INTERVAL: Duration = Duration::from_millis(500);

pub fn run(args: &ArgMatches, log_buffer: LogBuffer) -> Result<i32, Box<dyn Error>> {
    match args.subcommand() {
        Some(("probe", sub)) => {
            let file_path = sub
                .get_one::<String>("INPUT")
                .ok_or("missing input path")?;
            return Ok(cli::probe::run_probe(file_path)?);
        }
        Some(("simulate", sub)) => {
            let simulate = SimulateArgs {
                seconds: sub.get_one::<f64>("seconds").copied().unwrap_or(5.0),
                fps: sub.get_one::<f64>("fps").copied().unwrap_or(25.0),
                audio: !sub.get_flag("no-audio"),
                seek: sub.get_one::<f64>("seek").copied(),
            };
            return Ok(cli::simulate::run_simulate(simulate)?);
        }
        _ => {}
    }

    let file_path = args
        .get_one::<String>("INPUT")
        .ok_or("missing input path")?
        .clone();
    let gain = args.get_one::<f32>("GAIN").copied().unwrap_or(70.0);
    let quiet = args.get_flag("quiet");

    let mut settings = match args.get_one::<String>("settings") {
        Some(path) => PlaybackSettings::from_json_file(path)?,
        None => PlaybackSettings::default(),
    };
    settings.set_volume(gain / 100.0);

    info!("starting avpace on {}", file_path);
    let container = SymphoniaContainer::open(&file_path)?;
    let codecs = container.codecs();
    let backends = Backends {
        container: Box::new(container),
        codecs: Box::new(codecs),
        resampler: Box::new(RodioResampler::default()),
        scaler: Box::new(PassthroughScaler::default()),
        surface: Box::new(HeadlessSurface::new()),
        audio_device: Box::new(RodioAudioDevice::new()),
    };
    let mut session = Session::open(backends, settings)?;
    if let Some(target) = args.get_one::<f64>("seek") {
        session.seek(*target);
    }
    session.play();

    if quiet {
        run_quiet(&mut session);
    } else {
        run_interactive(&mut session, &file_path, log_buffer);
    }
    session.stop();

    Ok(0)
}

fn run_quiet(session: &mut Session) {
    let reporter = Reporter::new(
        session.handle(),
        Arc::new(Mutex::new(|report: Report| {
            info!(
                "{}",
                serde_json::to_string(&report).unwrap_or_else(|_| format!("{:?}", report))
            );
        })),
        REPORT_INTERVAL,
    );
    reporter.start();
    session.wait_until_finished();
    reporter.stop();
}

fn run_interactive(session: &mut Session, file_path: &str, log_buffer: LogBuffer) {
    let _stderr_guard = logging::capture_stderr(log_buffer.clone());
    let _raw_mode = RawModeGuard::enable().ok();
    let mut terminal = {
        let mut stdout = io::stdout();
        let _ = execute!(stdout, EnterAlternateScreen, cursor::Hide);
        let backend = CrosstermBackend::new(stdout);
        Terminal::new(backend).ok()
    };

    let handle = session.handle();
    while handle.status() != PlaybackState::Stopped {
        if let Some(term) = terminal.as_mut() {
            let log_lines = logging::snapshot(&log_buffer);
            let status = controls::status_text(controls::StatusArgs::capture(&handle));
            ui::draw_status(term, file_path, &status, &log_lines);
        }

        if !controls::handle_key_event(&handle) {
            break;
        }

        sleep(Duration::from_millis(50));
    }

    // Restore the terminal state before exiting.
    if let Some(mut term) = terminal {
        let _ = term.show_cursor();
        let stdout = term.backend_mut();
        let _ = execute!(stdout, LeaveAlternateScreen, cursor::Show);
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}
