//! Media probing outside of a playback session.

pub mod info;
