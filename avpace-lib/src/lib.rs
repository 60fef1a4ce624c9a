//! # avpace
//!
//! Audio/video playback synchronizer. A demux thread fills per-stream packet
//! queues, the audio device pulls decoded sound through a callback, and a
//! presentation scheduler paces video frames against the audio clock.
//!
//! Container parsing, decoding, conversion and output are reached through the
//! traits in [`backend`]; [`playback::Session`] ties everything together.

pub mod backend;
pub mod container;
pub mod diagnostics;
pub mod error;
pub mod packet;
pub mod playback;

pub use error::{BackendError, OpenError, SettingsError};
pub use playback::session::{Session, SessionDriver, SessionHandle};
pub use playback::settings::PlaybackSettings;
pub use playback::state::PlaybackState;
