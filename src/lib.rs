//! Read Aloud - streaming text-to-speech playback and chunked audio export.
//!
//! Text is cleaned and split into backend-sized chunks, synthesized through a
//! [`SynthesisBackend`](synth::SynthesisBackend) (local Kokoro or an
//! OpenAI-compatible HTTP service), and either played while it is generated
//! by the [`PlaybackEngine`](playback::PlaybackEngine) or combined into a file
//! by the [`GenerationPipeline`](generation::GenerationPipeline) and
//! [`TaskQueue`](generation::TaskQueue).

pub mod audio;
pub mod config;
pub mod error;
pub mod generation;
pub mod playback;
pub mod storage;
pub mod synth;
pub mod text;

#[cfg(test)]
mod testing;

pub use error::{MediaError, SpeechError};
