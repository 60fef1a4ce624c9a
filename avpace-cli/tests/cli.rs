use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn avpace() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("avpace"))
}

/// 16-bit mono PCM WAV of silence.
fn write_wav(file: &mut impl Write, sample_rate: u32, frames: u32) {
    let data_len = frames * 2;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(out.len() + data_len as usize, 0);
    file.write_all(&out).unwrap();
}

#[test]
fn no_arguments_prints_help() {
    avpace()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn probe_prints_streams_as_json() {
    let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
    write_wav(&mut file, 8_000, 16_000);
    file.flush().unwrap();

    avpace()
        .args(["probe", file.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"audio\""))
        .stdout(predicate::str::contains("\"sample_rate\": 8000"))
        .stdout(predicate::str::contains("\"duration\": 2.0"));
}

#[test]
fn probe_of_missing_file_fails() {
    avpace()
        .args(["probe", "/no/such/media.mkv"])
        .assert()
        .failure();
}

#[test]
fn simulate_reports_sync_statistics() {
    avpace()
        .args(["simulate", "--seconds", "0.5", "--no-audio"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"frames_presented\": 12"))
        .stdout(predicate::str::contains("\"has_audio\": false"));
}

#[test]
fn simulate_with_audio_keeps_video_close_to_the_clock() {
    let output = avpace()
        .args(["simulate", "--seconds", "0.6"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["has_audio"], serde_json::Value::Bool(true));
    let drift = report["final_drift"].as_f64().unwrap();
    assert!(drift.abs() < 0.5, "drift {}", drift);
}

#[test]
fn unreadable_settings_file_is_an_error() {
    let mut settings = tempfile::NamedTempFile::new().unwrap();
    settings.write_all(b"{ not json").unwrap();
    avpace()
        .args([
            "some.wav",
            "--quiet",
            "--settings",
            settings.path().to_str().unwrap(),
        ])
        .assert()
        .failure();
}
