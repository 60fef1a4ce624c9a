//! Media probing: stream list and container duration.

use std::fs::File;
use std::path::Path;

use log::debug;
use matroska::{Matroska, Settings, Tracktype};
use serde::Serialize;
use symphonia::core::{
    codecs::{CodecParameters, CODEC_TYPE_NULL},
    errors::Error,
    formats::{FormatOptions, Track},
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::{Hint, ProbeResult},
};

use crate::backend::StreamInfo;
use crate::error::BackendError;
use crate::packet::{StreamKind, TimeBase};

/// Convert Symphonia codec parameters to seconds using time base and frames.
pub fn time_from_frames(codec_params: &CodecParameters) -> Option<f64> {
    let tb = codec_params.time_base?;
    let frames = codec_params.n_frames?;
    let time = tb.calc_time(codec_params.start_ts + frames);
    Some(time.seconds as f64 + time.frac)
}

/// Parse a Matroska-style `DURATION` tag (`01:12:37.227000000`).
pub fn parse_duration_tag(value: &str) -> Option<f64> {
    let parts = value.trim().split(':').collect::<Vec<&str>>();
    if parts.len() < 3 {
        return None;
    }
    let hours = parts[0].parse::<f64>().ok()?;
    let minutes = parts[1].parse::<f64>().ok()?;
    let seconds = parts[2].parse::<f64>().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Probe a media file, trying the extension hint first and no hint after.
pub fn probe_path(path: &Path) -> Result<ProbeResult, BackendError> {
    let mut hints: Vec<Option<String>> = Vec::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hints.push(Some(ext.to_lowercase()));
    }
    hints.push(None);

    let mut last_error = None;
    for hint in hints {
        let source = Box::new(File::open(path)?) as Box<dyn MediaSource>;
        match probe_with_hint(source, hint.as_deref()) {
            Ok(probed) => return Ok(probed),
            Err(err) => {
                debug!("probe of {} with hint {:?} failed: {}", path.display(), hint, err);
                last_error = Some(err);
            }
        }
    }

    Err(last_error
        .map(BackendError::from)
        .unwrap_or_else(|| BackendError::Unsupported(path.display().to_string())))
}

fn probe_with_hint(
    source: Box<dyn MediaSource>,
    extension_hint: Option<&str>,
) -> Result<ProbeResult, Error> {
    let mut hint = Hint::new();
    if let Some(extension_str) = extension_hint {
        hint.with_extension(extension_str);
    }

    let mss = MediaSourceStream::new(source, Default::default());
    let format_opts = FormatOptions {
        enable_gapless: true,
        ..Default::default()
    };
    let metadata_opts: MetadataOptions = Default::default();

    symphonia::default::get_probe().format(&hint, mss, &format_opts, &metadata_opts)
}

/// Describe a Symphonia track as stream `index`.
pub fn stream_info(index: usize, track: &Track) -> StreamInfo {
    let params = &track.codec_params;
    let time_base = match (params.time_base, params.sample_rate) {
        (Some(tb), _) if tb.numer > 0 && tb.denom > 0 => TimeBase::new(tb.numer, tb.denom),
        (_, Some(rate)) if rate > 0 => TimeBase::new(1, rate),
        _ => TimeBase::default(),
    };
    let (kind, codec) = if params.codec == CODEC_TYPE_NULL {
        (StreamKind::Other, "none".to_string())
    } else {
        let codec = symphonia::default::get_codecs()
            .get_codec(params.codec)
            .map(|descriptor| descriptor.short_name.to_string())
            .unwrap_or_else(|| format!("{}", params.codec));
        (StreamKind::Audio, codec)
    };

    let mut info = StreamInfo::new(index, kind, time_base, codec);
    info.sample_rate = params.sample_rate;
    info.channels = params.channels.map(|channels| channels.count() as u16);
    info.duration = time_from_frames(params);
    info
}

/// Container duration from the first `DURATION` metadata tag.
pub fn tagged_duration(probed: &mut ProbeResult) -> Option<f64> {
    let from_format = probed.format.metadata().current().and_then(|revision| {
        revision
            .tags()
            .iter()
            .find(|tag| tag.key.eq_ignore_ascii_case("DURATION"))
            .and_then(|tag| parse_duration_tag(&tag.value.to_string()))
    });
    if from_format.is_some() {
        return from_format;
    }
    probed.metadata.get().and_then(|metadata| {
        metadata.current().and_then(|revision| {
            revision
                .tags()
                .iter()
                .find(|tag| tag.key.eq_ignore_ascii_case("DURATION"))
                .and_then(|tag| parse_duration_tag(&tag.value.to_string()))
        })
    })
}

/// Serializable summary of a media file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MediaInfo {
    pub path: String,
    pub duration: Option<f64>,
    pub streams: Vec<StreamSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamSummary {
    pub index: usize,
    pub kind: StreamKind,
    pub codec: String,
    pub time_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl From<&StreamInfo> for StreamSummary {
    fn from(info: &StreamInfo) -> Self {
        Self {
            index: info.index,
            kind: info.kind,
            codec: info.codec.clone(),
            time_base: format!("{}/{}", info.time_base.numer, info.time_base.denom),
            sample_rate: info.sample_rate,
            channels: info.channels,
            width: info.width,
            height: info.height,
            frame_rate: info.frame_rate,
            duration: info.duration,
        }
    }
}

impl MediaInfo {
    /// Enumerate streams and the container duration of `path`.
    ///
    /// Matroska files are read with the `matroska` crate as well, which
    /// contributes video geometry and frame interval that the audio demuxer
    /// does not expose.
    pub fn probe(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let matroska = if is_matroska(path) {
            read_matroska(path)
        } else {
            None
        };

        let probed = probe_path(path);
        let (mut streams, mut duration) = match probed {
            Ok(mut probed) => {
                let streams = probed
                    .format
                    .tracks()
                    .iter()
                    .enumerate()
                    .map(|(index, track)| stream_info(index, track))
                    .collect::<Vec<_>>();
                (streams, tagged_duration(&mut probed))
            }
            // Video-only Matroska files have nothing symphonia can open.
            Err(err) if matroska.is_none() => return Err(err),
            Err(err) => {
                debug!("symphonia could not open {}: {}", path.display(), err);
                (Vec::new(), None)
            }
        };

        if let Some(mkv) = matroska {
            duration = duration.or(mkv.duration);
            merge_matroska_streams(&mut streams, mkv.streams);
        }
        if duration.is_none() {
            duration = streams
                .iter()
                .filter_map(|stream| stream.duration)
                .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))));
        }

        Ok(Self {
            path: path.display().to_string(),
            duration,
            streams: streams.iter().map(StreamSummary::from).collect(),
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

struct MatroskaSummary {
    duration: Option<f64>,
    streams: Vec<StreamInfo>,
}

fn is_matroska(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .as_deref(),
        Some("mkv") | Some("mka") | Some("webm")
    )
}

fn read_matroska(path: &Path) -> Option<MatroskaSummary> {
    let file = File::open(path).ok()?;
    let mkv = match Matroska::open(file) {
        Ok(mkv) => mkv,
        Err(err) => {
            debug!("matroska parse of {} failed: {}", path.display(), err);
            return None;
        }
    };

    let streams = mkv
        .tracks
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let kind = match track.tracktype {
                Tracktype::Video => StreamKind::Video,
                Tracktype::Audio => StreamKind::Audio,
                _ => StreamKind::Other,
            };
            let mut info = StreamInfo::new(index, kind, TimeBase::new(1, 1000), track.codec_id.clone());
            match &track.settings {
                Settings::Video(video) => {
                    info.width = u32::try_from(video.pixel_width).ok();
                    info.height = u32::try_from(video.pixel_height).ok();
                }
                Settings::Audio(audio) => {
                    info.sample_rate = Some(audio.sample_rate as u32);
                    info.channels = u16::try_from(audio.channels).ok();
                }
                Settings::None => {}
            }
            if let Some(interval) = track.default_duration {
                let seconds = interval.as_secs_f64();
                if seconds > 0.0 {
                    info.frame_rate = Some(1.0 / seconds);
                }
            }
            info
        })
        .collect();

    Some(MatroskaSummary {
        duration: mkv.info.duration.map(|d| d.as_secs_f64()),
        streams,
    })
}

/// Append the video tracks the audio demuxer skipped.
fn merge_matroska_streams(streams: &mut Vec<StreamInfo>, from_mkv: Vec<StreamInfo>) {
    for mut video in from_mkv.into_iter().filter(|stream| stream.kind == StreamKind::Video) {
        video.index = streams.len();
        streams.push(video);
    }
}
