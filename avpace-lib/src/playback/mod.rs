//! Synchronization engine: queues, clocks, pipeline stages and the session.

pub mod audio;
pub mod clock;
pub mod context;
pub mod demux;
pub mod queue;
pub mod scheduler;
pub mod seek;
pub mod session;
pub mod settings;
pub mod state;
pub mod video;

pub use session::{Session, SessionDriver, SessionHandle};
