use std::time::Duration;

use avpace_lib::{PlaybackState, SessionHandle};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};

const SEEK_STEP_SECONDS: f64 = 5.0;
const VOLUME_STEP: f32 = 0.05;

pub struct StatusSnapshot {
    pub text: String,
    /// Frame interval and A/V drift, shown in their own pane.
    pub sync: String,
    /// Playback progress in `0.0..=1.0`.
    pub progress: f64,
}

pub struct StatusArgs {
    pub position: f64,
    pub duration: Option<f64>,
    pub status: PlaybackState,
    pub volume: f32,
    pub delay_ms: u64,
    pub drift: f64,
}

impl StatusArgs {
    pub fn capture(session: &SessionHandle) -> Self {
        Self {
            position: session.position(),
            duration: session.duration(),
            status: session.status(),
            volume: session.volume(),
            delay_ms: session.delay_ms(),
            drift: session.drift(),
        }
    }
}

pub fn status_text(args: StatusArgs) -> StatusSnapshot {
    let state = match args.status {
        PlaybackState::Playing => "▶ Playing",
        PlaybackState::Paused => "⏸ Paused",
        PlaybackState::Buffering => "… Buffering",
        PlaybackState::Stopped => "■ Stopped",
    };
    let current = format_time(args.position);
    let (total, progress) = match args.duration {
        Some(duration) if duration > 0.0 => (
            format_time(duration),
            (args.position / duration).clamp(0.0, 1.0),
        ),
        _ => ("--:--:--".to_string(), 0.0),
    };
    let text = format!(
        "{}   {} / {}\nVolume: {:>3.0}%",
        state,
        current,
        total,
        args.volume * 100.0
    );
    let lag = if args.drift > 0.0 {
        "video behind"
    } else if args.drift < 0.0 {
        "video ahead"
    } else {
        "in sync"
    };
    let sync = format!(
        "frame interval: {}ms\nA/V drift: {:+.3}s ({})",
        args.delay_ms, args.drift, lag
    );

    StatusSnapshot {
        text,
        sync,
        progress,
    }
}

/// Apply one key press to the session. Returns `false` on quit.
pub fn handle_key_event(session: &SessionHandle) -> bool {
    if event::poll(Duration::from_millis(100)).unwrap_or(false) {
        if let Ok(Event::Key(key)) = event::read() {
            if key.kind != KeyEventKind::Press {
                return true;
            }
            return apply_key(session, key.code);
        }
    }

    true
}

fn apply_key(session: &SessionHandle, code: KeyCode) -> bool {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => {
            session.stop();
            return false;
        }
        KeyCode::Char(' ') => {
            let paused = session.status() == PlaybackState::Paused;
            session.pause(!paused);
        }
        KeyCode::Left => {
            session.seek_relative(-SEEK_STEP_SECONDS);
        }
        KeyCode::Right => {
            let target = session.position() + SEEK_STEP_SECONDS;
            match session.duration() {
                Some(duration) if target >= duration => {}
                _ => {
                    session.seek(target);
                }
            }
        }
        KeyCode::Up => session.set_volume(session.volume() + VOLUME_STEP),
        KeyCode::Down => session.set_volume(session.volume() - VOLUME_STEP),
        _ => {}
    }
    true
}

fn format_time(seconds: f64) -> String {
    let seconds = seconds.max(0.0).floor() as u64;
    let minutes = seconds / 60;
    let seconds = seconds % 60;
    let hours = minutes / 60;
    let minutes = minutes % 60;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_time(0.0), "00:00:00");
        assert_eq!(format_time(3_725.9), "01:02:05");
        assert_eq!(format_time(-3.0), "00:00:00");
    }

    #[test]
    fn status_text_without_duration() {
        let snapshot = status_text(StatusArgs {
            position: 61.0,
            duration: None,
            status: PlaybackState::Buffering,
            volume: 0.5,
            delay_ms: 40,
            drift: -0.012,
        });
        assert!(snapshot.text.contains("Buffering"));
        assert!(snapshot.text.contains("00:01:01 / --:--:--"));
        assert!(snapshot.sync.contains("40ms"));
        assert!(snapshot.sync.contains("-0.012s (video ahead)"));
        assert_eq!(snapshot.progress, 0.0);
    }

    #[test]
    fn progress_is_clamped_to_duration() {
        let snapshot = status_text(StatusArgs {
            position: 90.0,
            duration: Some(60.0),
            status: PlaybackState::Playing,
            volume: 1.0,
            delay_ms: 20,
            drift: 0.25,
        });
        assert_eq!(snapshot.progress, 1.0);
        assert!(snapshot.text.contains("00:01:30 / 00:01:00"));
        assert!(snapshot.sync.contains("video behind"));
    }
}
