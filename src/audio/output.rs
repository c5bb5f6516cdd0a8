//! Speaker output for the playback engine, using cpal.
//!
//! A dedicated thread owns the cpal stream (it is not `Send` on every
//! platform). Sessions write decoded, resampled samples into a shared
//! [`Track`] which the audio callback renders from. Only PCM16 can be decoded,
//! so other formats are rejected.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::pcm::{Pcm16Decoder, decode_pcm16};
use super::resampler::{StreamResampler, resample};
use super::util::{device_name, find_output_config, write_mono_frames};
use crate::error::MediaError;
use crate::playback::{AudioHost, EventSink, HostEvent, MediaOutput, SourceHandle};
use crate::synth::{AudioFormat, PCM_SAMPLE_RATE};

/// How often position updates are reported.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Longest session the buffer accepts.
const MAX_BUFFERED_SECONDS: usize = 2 * 60 * 60;

/// Samples of the current session at the device rate.
#[derive(Default)]
struct Track {
    owner: u64,
    samples: Vec<f32>,
    position: usize,
    playing: bool,
    /// Every sample has arrived.
    complete: bool,
}

impl Track {
    /// Fill an output buffer, advancing the position while playing.
    fn render(&mut self, data: &mut [f32], channels: usize) {
        write_mono_frames(data, channels, || {
            if self.playing && self.position < self.samples.len() {
                let sample = self.samples[self.position];
                self.position += 1;
                sample
            } else {
                0.0
            }
        });
    }
}

/// [`AudioHost`] rendering to the default output device.
pub struct DeviceHost {
    track: Arc<Mutex<Track>>,
    sample_rate: u32,
    next_owner: AtomicU64,
    // Dropping the sender ends the device thread.
    _device: Option<std_mpsc::Sender<()>>,
}

impl DeviceHost {
    /// Open the default output device.
    pub fn new() -> Result<Self> {
        let track = Arc::new(Mutex::new(Track::default()));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let callback_track = Arc::clone(&track);
        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match build_stream(callback_track) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until the host is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Audio output thread stopped");
            })
            .context("Failed to spawn audio output thread")?;

        let sample_rate = ready_rx.recv().context("Audio output thread exited during setup")??;
        Ok(Self { track, sample_rate, next_owner: AtomicU64::new(1), _device: Some(shutdown_tx) })
    }

    /// Host without a device; samples are only rendered by hand.
    #[cfg(test)]
    fn detached(sample_rate: u32) -> Self {
        Self { track: Arc::default(), sample_rate, next_owner: AtomicU64::new(1), _device: None }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn check_format(format: AudioFormat) -> Result<(), MediaError> {
        match format {
            AudioFormat::Pcm16 => Ok(()),
            other => Err(MediaError::Unsupported(other)),
        }
    }

    /// Claim the track for a new output and start its position ticker.
    fn claim(&self, sink: EventSink) -> Result<DeviceOutput, MediaError> {
        let owner = self.next_owner.fetch_add(1, Ordering::Relaxed);
        *self.track.lock() = Track { owner, ..Default::default() };

        let resampler = StreamResampler::new(PCM_SAMPLE_RATE, self.sample_rate).map_err(|e| MediaError::Device(e.to_string()))?;
        let ticker = spawn_ticker(Arc::clone(&self.track), owner, sink.clone(), self.sample_rate);

        Ok(DeviceOutput {
            owner,
            track: Arc::clone(&self.track),
            sink,
            sample_rate: self.sample_rate,
            decoder: Pcm16Decoder::new(),
            resampler,
            playable_sent: false,
            ticker,
        })
    }
}

impl AudioHost for DeviceHost {
    fn supports_incremental(&self, format: AudioFormat) -> bool {
        format == AudioFormat::Pcm16
    }

    fn open_stream(&self, format: AudioFormat, sink: EventSink) -> Result<Box<dyn MediaOutput>, MediaError> {
        Self::check_format(format)?;
        let output = self.claim(sink.clone())?;
        sink.emit(HostEvent::SourceOpen);
        Ok(Box::new(output))
    }

    fn load_source(&self, source: SourceHandle, format: AudioFormat, sink: EventSink) -> Result<Box<dyn MediaOutput>, MediaError> {
        Self::check_format(format)?;
        let mut output = self.claim(sink.clone())?;
        output.playable_sent = true;

        // Reading and resampling a whole session is too slow for the engine task.
        let track = Arc::clone(&self.track);
        let (owner, sample_rate) = (output.owner, self.sample_rate);
        tokio::task::spawn_blocking(move || {
            let loaded = decode_source(source, sample_rate);
            let event = {
                let mut track = track.lock();
                if track.owner != owner {
                    debug!("Dropping load for released output");
                    return;
                }
                match loaded {
                    Ok(samples) => {
                        let duration = samples.len() as f64 / sample_rate as f64;
                        track.samples = samples;
                        track.complete = true;
                        HostEvent::LoadReady { duration }
                    }
                    Err(message) => HostEvent::LoadFailed(message),
                }
            };
            sink.emit(event);
        });
        Ok(Box::new(output))
    }
}

/// Read a batch source and convert it to device-rate samples.
fn decode_source(source: SourceHandle, sample_rate: u32) -> Result<Vec<f32>, String> {
    let bytes = match source {
        SourceHandle::File(path) => std::fs::read(&path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?,
        SourceHandle::Memory(bytes) => bytes.to_vec(),
    };
    resample(&decode_pcm16(&bytes), PCM_SAMPLE_RATE, sample_rate).map_err(|e| e.to_string())
}

fn build_stream(track: Arc<Mutex<Track>>) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = host.default_output_device().context("No output device available")?;
    info!("Using output device: {}", device_name(&device));

    let preferred_rate = match device.default_output_config() {
        Ok(config) => config.sample_rate(),
        Err(_) => 48000,
    };
    let config = find_output_config(&device, preferred_rate)?;
    let sample_rate = config.sample_rate();
    let channels = config.channels() as usize;
    let stream_config: StreamConfig = config.config();
    debug!("Audio output config: {} Hz, {} channels", sample_rate, channels);

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match track.try_lock() {
            Some(mut track) => track.render(data, channels),
            // Contended by a writer; skip this buffer.
            None => data.fill(0.0),
        },
        |err| error!("Audio output error: {}", err),
        None,
    )?;
    stream.play().context("Failed to start output stream")?;

    if sample_rate != PCM_SAMPLE_RATE {
        info!("Speech at {} Hz will be resampled to {} Hz", PCM_SAMPLE_RATE, sample_rate);
    }
    Ok((stream, sample_rate))
}

/// Report position, and the end once a complete track has been rendered.
fn spawn_ticker(track: Arc<Mutex<Track>>, owner: u64, sink: EventSink, sample_rate: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let rate = sample_rate as f64;
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            let (update, ended) = {
                let mut track = track.lock();
                if track.owner != owner {
                    break;
                }
                if !track.playing {
                    continue;
                }
                let ended = track.complete && track.position >= track.samples.len();
                if ended {
                    track.playing = false;
                }
                let duration = if track.complete { track.samples.len() as f64 / rate } else { f64::INFINITY };
                (HostEvent::TimeUpdate { current: track.position as f64 / rate, duration }, ended)
            };
            if !sink.emit(update) || (ended && !sink.emit(HostEvent::Ended)) {
                break;
            }
        }
    })
}

struct DeviceOutput {
    owner: u64,
    track: Arc<Mutex<Track>>,
    sink: EventSink,
    sample_rate: u32,
    decoder: Pcm16Decoder,
    resampler: StreamResampler,
    playable_sent: bool,
    ticker: JoinHandle<()>,
}

impl DeviceOutput {
    fn with_track<R>(&self, f: impl FnOnce(&mut Track) -> Result<R, MediaError>) -> Result<R, MediaError> {
        let mut track = self.track.lock();
        if track.owner != self.owner {
            return Err(MediaError::InvalidState("output released"));
        }
        f(&mut track)
    }

    fn push(&self, samples: Vec<f32>) -> Result<(), MediaError> {
        let limit = MAX_BUFFERED_SECONDS * self.sample_rate as usize;
        self.with_track(|track| {
            if track.samples.len() + samples.len() > limit {
                return Err(MediaError::CapacityExceeded);
            }
            track.samples.extend(samples);
            Ok(())
        })
    }

    fn signal_playable(&mut self) {
        if !self.playable_sent {
            self.playable_sent = true;
            self.sink.emit(HostEvent::PlayableRange);
        }
    }
}

impl MediaOutput for DeviceOutput {
    fn append(&mut self, bytes: Vec<u8>) -> Result<(), MediaError> {
        let decoded = self.decoder.decode(&bytes);
        let samples = self.resampler.process(&decoded).map_err(|e| MediaError::Device(e.to_string()))?;
        let has_audio = !samples.is_empty();
        self.push(samples)?;
        self.sink.emit(HostEvent::AppendComplete);
        if has_audio {
            self.signal_playable();
        }
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<(), MediaError> {
        let tail = self.resampler.flush().map_err(|e| MediaError::Device(e.to_string()))?;
        self.push(tail)?;
        self.with_track(|track| {
            track.complete = true;
            Ok(())
        })?;
        self.signal_playable();
        Ok(())
    }

    fn play(&mut self) -> Result<(), MediaError> {
        self.with_track(|track| {
            track.playing = true;
            Ok(())
        })
    }

    fn pause(&mut self) -> Result<(), MediaError> {
        self.with_track(|track| {
            track.playing = false;
            Ok(())
        })
    }

    fn seek(&mut self, position: f64) -> Result<(), MediaError> {
        let rate = self.sample_rate as f64;
        self.with_track(|track| {
            track.position = ((position.max(0.0) * rate) as usize).min(track.samples.len());
            Ok(())
        })
    }

    fn release(&mut self) {
        self.ticker.abort();
        let mut track = self.track.lock();
        if track.owner == self.owner {
            *track = Track::default();
        }
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.release();
    }
}
