//! Compressed packets and stream timing primitives.

/// Rational stream time base: one native tick lasts `numer / denom` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub numer: u32,
    pub denom: u32,
}

impl TimeBase {
    pub const fn new(numer: u32, denom: u32) -> Self {
        Self { numer, denom }
    }

    /// Length of one tick in seconds.
    pub fn seconds(&self) -> f64 {
        if self.denom == 0 {
            return 0.0;
        }
        self.numer as f64 / self.denom as f64
    }

    /// Convert a native timestamp into seconds.
    pub fn to_seconds(&self, ts: i64) -> f64 {
        ts as f64 * self.seconds()
    }

    /// Convert seconds into the nearest native timestamp.
    pub fn to_native(&self, seconds: f64) -> i64 {
        let tick = self.seconds();
        if tick <= 0.0 {
            return 0;
        }
        (seconds / tick).round() as i64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        // Microseconds, the usual container-level base.
        Self::new(1, 1_000_000)
    }
}

/// Media type carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
    Other,
}

/// A compressed unit read from the container.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPacket {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: Option<i64>,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

impl MediaPacket {
    pub fn new(stream_index: usize, data: Vec<u8>) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            duration: None,
            keyframe: false,
            data,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Queue item: either real data or the in-band seek marker.
///
/// The marker is its own variant so a consumer can never hand it to a decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Data(MediaPacket),
    FlushMarker,
}

impl Packet {
    /// Byte size counted against the queue's aggregate size.
    pub fn size(&self) -> usize {
        match self {
            Packet::Data(packet) => packet.size(),
            Packet::FlushMarker => 0,
        }
    }

    pub fn is_flush_marker(&self) -> bool {
        matches!(self, Packet::FlushMarker)
    }

    pub fn stream_index(&self) -> Option<usize> {
        match self {
            Packet::Data(packet) => Some(packet.stream_index),
            Packet::FlushMarker => None,
        }
    }
}

impl From<MediaPacket> for Packet {
    fn from(value: MediaPacket) -> Self {
        Packet::Data(value)
    }
}
