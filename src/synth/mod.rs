//! Speech synthesis backends.
//!
//! Every consumer (playback engine, generation pipeline, task queue) talks to
//! synthesis through [`SynthesisBackend`]: one request per text chunk, answered
//! by an ordered stream of audio byte chunks followed by an end or error event.

mod backend;
pub mod http;
pub mod kokoro;
pub mod voices;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use backend::{SynthEvent, SynthRequest, SynthSender, SynthStream, SynthesisBackend};

/// Sample rate of [`AudioFormat::Pcm16`] audio.
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// Encoded audio formats a backend can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Opus,
    Wav,
    /// Raw little-endian signed 16-bit mono at [`PCM_SAMPLE_RATE`].
    Pcm16,
}

impl AudioFormat {
    /// File extension for exported audio.
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Opus => "opus",
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm16 => "pcm",
        }
    }

    /// Format name used by OpenAI-compatible speech endpoints.
    pub fn api_name(self) -> &'static str {
        match self {
            AudioFormat::Pcm16 => "pcm",
            other => other.extension(),
        }
    }

    /// Rough encoded size of one spoken character.
    ///
    /// Assumes about 15 characters per second of speech, so this only feeds
    /// progress estimates.
    pub fn estimated_bytes_per_char(self) -> usize {
        match self {
            AudioFormat::Mp3 => 400,
            AudioFormat::Opus => 200,
            AudioFormat::Wav | AudioFormat::Pcm16 => 3_200,
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Voice, format and speaking rate carried by every synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Backend-specific voice identifier (e.g. `af_bella`, `alloy`).
    pub voice: String,
    /// Requested output encoding.
    pub format: AudioFormat,
    /// Speaking rate multiplier (1.0 = normal).
    pub rate: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self { voice: "af_bella".to_string(), format: AudioFormat::Pcm16, rate: 1.0 }
    }
}
