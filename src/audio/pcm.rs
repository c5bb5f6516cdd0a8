//! Conversion between f32 samples and raw PCM16 bytes.

/// Encode mono f32 samples as little-endian signed 16-bit PCM.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Incremental PCM16 decoder.
///
/// Network chunks are not aligned to sample boundaries, so a trailing odd
/// byte is carried over to the next call.
#[derive(Debug, Default)]
pub struct Pcm16Decoder {
    carry: Option<u8>,
}

impl Pcm16Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as many whole samples as `bytes` (plus any carried byte) holds.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<f32> {
        let mut samples = Vec::with_capacity(bytes.len() / 2 + 1);
        let mut rest = bytes;

        if let Some(low) = self.carry.take() {
            match rest.split_first() {
                Some((&high, tail)) => {
                    samples.push(to_f32(i16::from_le_bytes([low, high])));
                    rest = tail;
                }
                None => {
                    self.carry = Some(low);
                    return samples;
                }
            }
        }

        let mut pairs = rest.chunks_exact(2);
        for pair in &mut pairs {
            samples.push(to_f32(i16::from_le_bytes([pair[0], pair[1]])));
        }
        if let [odd] = pairs.remainder() {
            self.carry = Some(*odd);
        }

        samples
    }
}

/// Decode a complete PCM16 buffer.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    Pcm16Decoder::new().decode(bytes)
}

fn to_f32(value: i16) -> f32 {
    value as f32 / i16::MAX as f32
}
