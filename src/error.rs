//! Error types shared by the playback engine, the generation pipeline and the task queue.

use std::time::Duration;

use crate::synth::AudioFormat;

/// Errors reported by the host audio output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// The incremental buffer refused more data.
    #[error("Media buffer capacity exceeded")]
    CapacityExceeded,

    /// The host cannot render this format.
    #[error("Audio format {0} is not supported by the audio host")]
    Unsupported(AudioFormat),

    /// The output was used after it was released or before it opened.
    #[error("Media output is not in a usable state: {0}")]
    InvalidState(&'static str),

    /// Audio device failure.
    #[error("Audio device error: {0}")]
    Device(String),
}

/// Errors that can occur while turning text into audio.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Nothing speakable was left after cleaning the input.
    #[error("No readable text")]
    NoReadableText,

    /// The synthesis backend failed (network, service, or engine error).
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    /// A single synthesis request exceeded its time bound.
    #[error("Speech synthesis timed out after {0:?}")]
    Timeout(Duration),

    /// The backend cannot produce the requested format.
    #[error("Audio format {0} is not supported by this backend")]
    UnsupportedFormat(AudioFormat),

    /// Every chunk of a generation run failed.
    #[error("All {count} chunks failed: {last_error}")]
    AllChunksFailed { count: usize, last_error: String },

    /// Neither the persisted nor the in-memory source could be played.
    #[error("Playback failed: {0}")]
    Playback(String),

    /// The playback engine task is no longer running.
    #[error("Playback engine has shut down")]
    EngineClosed,

    /// The operation was abandoned by its caller.
    #[error("Generation cancelled")]
    Cancelled,

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SpeechError {
    /// Shorthand for a backend failure with a message.
    pub fn synthesis(message: impl Into<String>) -> Self {
        Self::Synthesis(message.into())
    }
}
