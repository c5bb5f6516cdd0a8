//! Audio plumbing: PCM conversion, resampling and the cpal speaker output.

mod output;
pub mod pcm;
pub mod resampler;
pub mod util;

pub use output::DeviceHost;
pub use pcm::{Pcm16Decoder, decode_pcm16, encode_pcm16};
