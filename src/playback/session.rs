//! State of one playback attempt.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::host::MediaOutput;
use crate::synth::AudioFormat;

/// Playback lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Idle,
    /// Waiting for the first audio to become playable.
    Loading,
    Playing,
    Paused,
    /// Rendering finished; the session can be replayed.
    Ended,
}

/// How audio reaches the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Bytes are appended to the output as synthesis produces them.
    Streaming,
    /// The output loads the complete audio once synthesis finishes.
    Batch,
}

/// Which source a batch session is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchStage {
    Synthesizing,
    LoadingFile,
    LoadingMemory,
    Loaded,
}

/// Published view of the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub attempt: u64,
    pub state: PlaybackState,
    pub mode: Option<PlaybackMode>,
    pub current_time: f64,
    /// `None` while the total length is unknown.
    pub duration: Option<f64>,
    pub is_playing: bool,
    pub is_loading: bool,
    pub pending_chunks: usize,
    pub append_in_flight: bool,
    pub buffered_bytes: usize,
    pub synthesis_complete: bool,
}

pub(crate) struct Session {
    pub attempt: u64,
    pub mode: PlaybackMode,
    pub format: AudioFormat,
    pub state: PlaybackState,
    pub output: Option<Box<dyn MediaOutput>>,
    pub pump: CancellationToken,

    pub source_open: bool,
    pub pending: VecDeque<Vec<u8>>,
    pub append_in_flight: bool,
    pub end_of_stream_sent: bool,
    pub accumulated: Vec<Vec<u8>>,
    pub buffered_bytes: usize,
    pub synthesis_done: bool,

    pub batch_stage: BatchStage,
    pub temp_file: Option<PathBuf>,

    pub pause_requested: bool,
    pub announced: bool,
    pub current_time: f64,
    pub duration: f64,
}

impl Session {
    pub fn new(attempt: u64, mode: PlaybackMode, format: AudioFormat, pump: CancellationToken) -> Self {
        Self {
            attempt,
            mode,
            format,
            state: PlaybackState::Loading,
            output: None,
            pump,
            source_open: false,
            pending: VecDeque::new(),
            append_in_flight: false,
            end_of_stream_sent: false,
            accumulated: Vec::new(),
            buffered_bytes: 0,
            synthesis_done: false,
            batch_stage: BatchStage::Synthesizing,
            temp_file: None,
            pause_requested: false,
            announced: false,
            current_time: 0.0,
            duration: f64::INFINITY,
        }
    }

    /// Whether the end-of-stream signal may be sent now.
    pub fn ready_for_end_of_stream(&self) -> bool {
        self.mode == PlaybackMode::Streaming
            && self.synthesis_done
            && self.source_open
            && self.pending.is_empty()
            && !self.append_in_flight
            && !self.end_of_stream_sent
    }

    pub fn has_finite_duration(&self) -> bool {
        self.duration.is_finite() && self.duration > 0.0
    }

    /// All received audio, in arrival order.
    pub fn combined_audio(&self) -> Vec<u8> {
        self.accumulated.concat()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            attempt: self.attempt,
            state: self.state,
            mode: Some(self.mode),
            current_time: self.current_time,
            duration: self.duration.is_finite().then_some(self.duration),
            is_playing: self.state == PlaybackState::Playing,
            is_loading: self.state == PlaybackState::Loading,
            pending_chunks: self.pending.len(),
            append_in_flight: self.append_in_flight,
            buffered_bytes: self.buffered_bytes,
            synthesis_complete: self.synthesis_done,
        }
    }

    /// Stop synthesis and free the output.
    pub fn release(&mut self) {
        self.pump.cancel();
        if let Some(mut output) = self.output.take() {
            output.release();
        }
        self.pending.clear();
        self.accumulated.clear();
        self.append_in_flight = false;
    }
}
