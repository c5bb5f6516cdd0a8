//! Device helpers for the cpal output.

use anyhow::{Context, Result};
use cpal::traits::DeviceTrait;
use cpal::{Device, SampleFormat, SupportedStreamConfig};

/// Human-readable device name, or "Unknown".
pub fn device_name(device: &Device) -> String {
    device.description().ok().map(|desc| desc.name().to_string()).unwrap_or_else(|| "Unknown".to_string())
}

/// Pick the rate closest to `target` among `(min, max)` supported ranges.
///
/// Returns `None` when there are no ranges.
pub fn choose_sample_rate(ranges: &[(u32, u32)], target: u32) -> Option<u32> {
    ranges
        .iter()
        .map(|&(min, max)| target.clamp(min, max))
        .min_by_key(|&rate| rate.abs_diff(target))
}

/// Mono or stereo F32 output config at (or near) `preferred_rate`.
pub fn find_output_config(device: &Device, preferred_rate: u32) -> Result<SupportedStreamConfig> {
    let configs: Vec<_> = device
        .supported_output_configs()
        .context("Failed to get supported output configs")?
        .filter(|c| c.channels() <= 2 && c.sample_format() == SampleFormat::F32)
        .collect();

    let ranges: Vec<(u32, u32)> = configs.iter().map(|c| (c.min_sample_rate(), c.max_sample_rate())).collect();
    let rate = choose_sample_rate(&ranges, preferred_rate)
        .context("No F32 audio configuration found - this is unexpected on modern hardware")?;

    let config = configs
        .into_iter()
        .find(|c| (c.min_sample_rate()..=c.max_sample_rate()).contains(&rate))
        .context("No output configuration supports the chosen rate")?;
    Ok(config.with_sample_rate(rate))
}

/// Write one mono sample per frame, duplicated across `channels`.
pub fn write_mono_frames(data: &mut [f32], channels: usize, mut next: impl FnMut() -> f32) {
    for frame in data.chunks_mut(channels.max(1)) {
        frame.fill(next());
    }
}
