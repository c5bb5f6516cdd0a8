//! Host audio output interface.
//!
//! The engine never touches a device directly. It asks an [`AudioHost`] for a
//! [`MediaOutput`] and learns about progress through [`HostEvent`]s delivered
//! to an [`EventSink`] stamped with the session attempt that opened it.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::engine::EngineMsg;
use crate::error::MediaError;
use crate::synth::AudioFormat;

/// Asynchronous report from a media output.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// An incremental output is ready to accept appends.
    SourceOpen,
    /// The previous append finished; the next one may be issued.
    AppendComplete,
    /// The previous append was rejected.
    AppendFailed(MediaError),
    /// Some audio is buffered and can be rendered.
    PlayableRange,
    /// A batch source finished loading.
    LoadReady { duration: f64 },
    /// A batch source could not be loaded.
    LoadFailed(String),
    /// Periodic playback position.
    TimeUpdate { current: f64, duration: f64 },
    /// Rendering reached the end of the source.
    Ended,
    /// Unrecoverable output error.
    Error(String),
}

/// What a batch output should play.
#[derive(Debug, Clone)]
pub enum SourceHandle {
    /// A persisted temp file.
    File(PathBuf),
    /// The combined buffer, kept in memory.
    Memory(Arc<Vec<u8>>),
}

/// Attempt-stamped channel back into the playback engine.
#[derive(Clone)]
pub struct EventSink {
    attempt: u64,
    tx: mpsc::UnboundedSender<EngineMsg>,
}

impl EventSink {
    pub(crate) fn new(attempt: u64, tx: mpsc::UnboundedSender<EngineMsg>) -> Self {
        Self { attempt, tx }
    }

    /// Deliver an event. Returns `false` once the engine has shut down.
    pub fn emit(&self, event: HostEvent) -> bool {
        self.tx.send(EngineMsg::Host { attempt: self.attempt, event }).is_ok()
    }
}

/// A host-owned audio source bound to one playback session.
pub trait MediaOutput: Send {
    /// Queue bytes for rendering. Completion is reported as
    /// [`HostEvent::AppendComplete`] or [`HostEvent::AppendFailed`].
    fn append(&mut self, bytes: Vec<u8>) -> Result<(), MediaError>;

    /// No more bytes will be appended.
    fn end_of_stream(&mut self) -> Result<(), MediaError>;

    fn play(&mut self) -> Result<(), MediaError>;

    fn pause(&mut self) -> Result<(), MediaError>;

    /// Move the playback position, in seconds.
    fn seek(&mut self, position: f64) -> Result<(), MediaError>;

    /// Stop rendering and free the source. Further calls fail or do nothing.
    fn release(&mut self);
}

/// Factory for media outputs.
pub trait AudioHost: Send + Sync {
    /// Whether `format` can be appended incrementally.
    fn supports_incremental(&self, format: AudioFormat) -> bool;

    /// Open an incremental output; [`HostEvent::SourceOpen`] follows.
    fn open_stream(&self, format: AudioFormat, sink: EventSink) -> Result<Box<dyn MediaOutput>, MediaError>;

    /// Start loading a complete source; [`HostEvent::LoadReady`] or
    /// [`HostEvent::LoadFailed`] follows.
    fn load_source(&self, source: SourceHandle, format: AudioFormat, sink: EventSink) -> Result<Box<dyn MediaOutput>, MediaError>;
}
