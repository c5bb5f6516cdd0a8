//! Streaming playback engine with transport controls, a reading queue and a
//! sleep timer.

mod engine;
pub mod host;
mod queue;
mod session;

pub use engine::{DEFAULT_MAX_CHUNK_BYTES, EngineConfig, PlaybackEngine, PlaybackNotice};
pub(crate) use engine::EngineMsg;
pub use host::{AudioHost, EventSink, HostEvent, MediaOutput, SourceHandle};
pub use queue::{PlayQueue, QueueItem, QueueSnapshot, Removal};
pub use session::{PlaybackMode, PlaybackSnapshot, PlaybackState};
