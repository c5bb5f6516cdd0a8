//! Sample-rate conversion for synthesized speech, using rubato's FFT resampler.
//!
//! Synthesis output (24 kHz) rarely matches the output device rate, and audio
//! arrives in arbitrarily sized network chunks, so the resampler accumulates
//! input between calls and only processes whole blocks.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{Fft, FixedSync, Resampler};

/// Block size for FFT-based resampling (provides good quality and performance).
const CHUNK_SIZE: usize = 1024;

/// Number of sub-chunks for FFT processing (higher = better quality but more CPU).
const SUB_CHUNKS: usize = 2;

/// Streaming mono resampler.
pub struct StreamResampler {
    inner: Option<Fft<f32>>,
    block_size: usize,
    from_rate: u32,
    to_rate: u32,
    input: Vec<f32>,
    output_buffer: Vec<f32>,
    consumed: usize,
    produced: usize,
}

impl StreamResampler {
    /// Create a resampler converting `from_rate` to `to_rate`.
    ///
    /// Equal rates produce a pass-through resampler.
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let inner = if from_rate == to_rate {
            None
        } else {
            Some(
                Fft::<f32>::new(
                    from_rate as usize,
                    to_rate as usize,
                    CHUNK_SIZE,
                    SUB_CHUNKS,
                    1, // mono
                    FixedSync::Input,
                )
                .context("Failed to create resampler")?,
            )
        };
        let output_frames_max = inner.as_ref().map_or(0, |r| r.output_frames_max());
        // Fixed input size; rubato may round the requested chunk up for the rate ratio.
        let block_size = inner.as_ref().map_or(CHUNK_SIZE, |r| r.input_frames_next());

        Ok(Self {
            inner,
            block_size,
            from_rate,
            to_rate,
            input: Vec::with_capacity(CHUNK_SIZE * 2),
            output_buffer: vec![0.0f32; output_frames_max],
            consumed: 0,
            produced: 0,
        })
    }

    /// Feed samples and return whatever output whole blocks produced.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        if self.inner.is_none() {
            return Ok(samples.to_vec());
        }

        self.input.extend_from_slice(samples);
        let mut output = Vec::new();
        while self.input.len() >= self.block_size {
            let block: Vec<f32> = self.input.drain(..self.block_size).collect();
            self.run_block(&block, &mut output)?;
        }
        Ok(output)
    }

    /// Flush the buffered tail, zero-padding the last block and trimming the
    /// padding from the result.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        if self.inner.is_none() || self.input.is_empty() {
            return Ok(Vec::new());
        }

        let tail_len = self.input.len();
        let mut block = std::mem::take(&mut self.input);
        block.resize(self.block_size, 0.0);

        let mut output = Vec::new();
        self.run_block(&block, &mut output)?;
        self.consumed -= self.block_size - tail_len;

        let expected_total = (self.consumed as f64 * self.to_rate as f64 / self.from_rate as f64) as usize;
        let excess = self.produced.saturating_sub(expected_total);
        output.truncate(output.len().saturating_sub(excess));
        self.produced -= excess.min(self.produced);
        Ok(output)
    }

    fn run_block(&mut self, block: &[f32], output: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.inner.as_mut() else {
            output.extend_from_slice(block);
            return Ok(());
        };

        let output_frames_max = self.output_buffer.len();
        let input_adapter = InterleavedSlice::new(block, 1, block.len()).context("Failed to create input adapter")?;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.output_buffer, 1, output_frames_max).context("Failed to create output adapter")?;

        let (_, frames_written) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, None)
            .map_err(|e| anyhow::anyhow!("Resampling error: {}", e))?;

        output.extend_from_slice(&self.output_buffer[..frames_written]);
        self.consumed += block.len();
        self.produced += frames_written;
        Ok(())
    }
}

/// Resample a complete buffer.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    let mut resampler = StreamResampler::new(from_rate, to_rate)?;
    let mut output = resampler.process(samples)?;
    output.extend(resampler.flush()?);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_rates_pass_through() {
        let samples = vec![0.25f32; 100];
        let mut resampler = StreamResampler::new(24000, 24000).unwrap();
        assert_eq!(resampler.process(&samples).unwrap(), samples);
        assert!(resampler.flush().unwrap().is_empty());
    }

    #[test]
    fn test_resample_upsampling() {
        // 24kHz speech to a 48kHz device (2x)
        let samples = vec![0.0; 24000];
        let result = resample(&samples, 24000, 48000).unwrap();
        assert!(result.len() >= 47000 && result.len() <= 48100, "got {}", result.len());
    }

    #[test]
    fn test_chunked_input_matches_batch_length() {
        let samples = vec![0.0f32; 10_000];
        let mut resampler = StreamResampler::new(24000, 44100).unwrap();
        let mut streamed = Vec::new();
        for piece in samples.chunks(777) {
            streamed.extend(resampler.process(piece).unwrap());
        }
        streamed.extend(resampler.flush().unwrap());

        let batch = resample(&samples, 24000, 44100).unwrap();
        assert_eq!(streamed.len(), batch.len());
    }
}
