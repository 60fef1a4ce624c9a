//! File-backed container and audio codecs built on Symphonia.
//!
//! Symphonia demuxes and decodes audio only. Video streams of a container are
//! reported as [`StreamKind::Other`] and never routed, so files played through
//! this backend run as audio-only sessions.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CodecParameters, Decoder, DecoderOptions},
    errors::Error,
    formats::{FormatReader, SeekMode, SeekTo},
};

use crate::backend::{
    AudioDecoder, AudioFrame, CodecFactory, ContainerBackend, DecodeOutcome, ReadOutcome,
    SeekFlags, StreamInfo, VideoDecoder,
};
use crate::container::info::{probe_path, stream_info, tagged_duration};
use crate::error::BackendError;
use crate::packet::{MediaPacket, StreamKind};

/// Demuxer over a probed Symphonia [`FormatReader`].
pub struct SymphoniaContainer {
    reader: Box<dyn FormatReader>,
    streams: Vec<StreamInfo>,
    track_ids: Vec<u32>,
    index_by_track: HashMap<u32, usize>,
    duration: Option<f64>,
}

impl SymphoniaContainer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let mut probed = probe_path(path)?;
        let duration = tagged_duration(&mut probed);
        let reader = probed.format;

        let mut streams = Vec::new();
        let mut track_ids = Vec::new();
        let mut index_by_track = HashMap::new();
        for (index, track) in reader.tracks().iter().enumerate() {
            streams.push(stream_info(index, track));
            track_ids.push(track.id);
            index_by_track.insert(track.id, index);
        }
        info!(
            "opened {} with {} stream(s), duration {:?}",
            path.display(),
            streams.len(),
            duration
        );

        Ok(Self {
            reader,
            streams,
            track_ids,
            index_by_track,
            duration,
        })
    }

    /// Codec factory for the tracks of this container.
    pub fn codecs(&self) -> SymphoniaCodecs {
        let params = self
            .reader
            .tracks()
            .iter()
            .map(|track| track.codec_params.clone())
            .collect();
        SymphoniaCodecs { params }
    }
}

impl ContainerBackend for SymphoniaContainer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<ReadOutcome, BackendError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(ReadOutcome::EndOfStream);
                }
                Err(Error::ResetRequired) => {
                    debug!("stream layout changed; treating as end of stream");
                    return Ok(ReadOutcome::EndOfStream);
                }
                Err(err) => return Err(err.into()),
            };

            // Tracks added after open are ignored.
            let Some(&index) = self.index_by_track.get(&packet.track_id()) else {
                continue;
            };
            let ts = i64::try_from(packet.ts()).unwrap_or(i64::MAX);
            let dur = i64::try_from(packet.dur()).unwrap_or(i64::MAX);
            let media = MediaPacket::new(index, packet.buf().to_vec())
                .with_pts(ts)
                .with_dts(ts)
                .with_duration(dur)
                .keyframe(true);
            return Ok(ReadOutcome::Packet(media));
        }
    }

    fn seek(&mut self, stream: usize, timestamp: i64, _flags: SeekFlags) -> Result<(), BackendError> {
        let track_id = *self
            .track_ids
            .get(stream)
            .ok_or_else(|| BackendError::Seek(format!("no stream {}", stream)))?;
        let ts = timestamp.max(0) as u64;
        let seeked = self
            .reader
            .seek(SeekMode::Coarse, SeekTo::TimeStamp { ts, track_id })?;
        debug!(
            "seeked track {} to ts {} (requested {})",
            track_id, seeked.actual_ts, seeked.required_ts
        );
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }
}

/// Opens Symphonia decoders for the tracks of one container.
pub struct SymphoniaCodecs {
    params: Vec<CodecParameters>,
}

impl CodecFactory for SymphoniaCodecs {
    fn open_audio(&mut self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>, BackendError> {
        if stream.kind != StreamKind::Audio {
            return Err(BackendError::Unsupported(format!(
                "stream {} is not audio",
                stream.index
            )));
        }
        let params = self
            .params
            .get(stream.index)
            .ok_or_else(|| BackendError::Unsupported(format!("no stream {}", stream.index)))?;
        let decoder = symphonia::default::get_codecs().make(params, &DecoderOptions::default())?;
        Ok(Box::new(SymphoniaAudioDecoder { decoder }))
    }

    fn open_video(&mut self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>, BackendError> {
        Err(BackendError::Unsupported(format!(
            "no video decoder for codec {}",
            stream.codec
        )))
    }
}

struct SymphoniaAudioDecoder {
    decoder: Box<dyn Decoder>,
}

impl AudioDecoder for SymphoniaAudioDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<DecodeOutcome<AudioFrame>, BackendError> {
        let ts = packet.pts.unwrap_or(0).max(0) as u64;
        let dur = packet.duration.unwrap_or(0).max(0) as u64;
        let input = symphonia::core::formats::Packet::new_from_slice(0, ts, dur, &packet.data);

        let decoded = match self.decoder.decode(&input) {
            Ok(decoded) => decoded,
            Err(Error::DecodeError(err)) => return Err(BackendError::Decode(err.to_string())),
            Err(err) => return Err(err.into()),
        };
        if decoded.frames() == 0 {
            return Ok(DecodeOutcome::NeedMoreInput);
        }

        let spec = *decoded.spec();
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        Ok(DecodeOutcome::Frame(AudioFrame {
            samples: buffer.samples().to_vec(),
            channels: spec.channels.count() as u16,
            sample_rate: spec.rate,
        }))
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }
}
