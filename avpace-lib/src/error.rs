//! Error types shared by the engine and its backends.

use std::fmt::{Display, Formatter};

/// Failure reported by a backend capability (container, codec, device...).
#[derive(Debug)]
pub enum BackendError {
    Io(std::io::Error),
    Unsupported(String),
    Decode(String),
    Seek(String),
    Device(String),
    Config(String),
    Other(String),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Unsupported(what) => write!(f, "unsupported: {}", what),
            Self::Decode(err) => write!(f, "decode error: {}", err),
            Self::Seek(err) => write!(f, "seek error: {}", err),
            Self::Device(err) => write!(f, "device error: {}", err),
            Self::Config(err) => write!(f, "configuration error: {}", err),
            Self::Other(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<symphonia::core::errors::Error> for BackendError {
    fn from(value: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error;
        match value {
            Error::IoError(err) => Self::Io(err),
            Error::DecodeError(err) => Self::Decode(err.to_string()),
            Error::SeekError(kind) => Self::Seek(format!("{:?}", kind)),
            Error::Unsupported(what) => Self::Unsupported(what.to_string()),
            Error::LimitError(what) => Self::Other(format!("limit reached: {}", what)),
            Error::ResetRequired => Self::Decode("decoder reset required".to_string()),
            #[allow(unreachable_patterns)]
            other => Self::Other(other.to_string()),
        }
    }
}

/// Failure while opening a playback session. Never retried.
#[derive(Debug)]
pub enum OpenError {
    Backend(BackendError),
    NoStreams,
    UnsupportedCodec { stream: usize, reason: String },
    NoPlayableOutput,
}

impl Display for OpenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(err) => write!(f, "failed to open source: {}", err),
            Self::NoStreams => write!(f, "source has no audio or video stream"),
            Self::UnsupportedCodec { stream, reason } => {
                write!(f, "unsupported codec on stream {}: {}", stream, reason)
            }
            Self::NoPlayableOutput => {
                write!(f, "neither audio nor video output could be initialised")
            }
        }
    }
}

impl std::error::Error for OpenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackendError> for OpenError {
    fn from(value: BackendError) -> Self {
        Self::Backend(value)
    }
}

/// Failure loading playback settings.
#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl Display for SettingsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read settings: {}", err),
            Self::Parse(err) => write!(f, "invalid settings json: {}", err),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<std::io::Error> for SettingsError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}
