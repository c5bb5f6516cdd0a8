//! Application configuration and CLI argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::generation::{PipelineConfig, QueueConfig};
use crate::playback::{DEFAULT_MAX_CHUNK_BYTES, EngineConfig};
use crate::synth::http::HttpConfig;
use crate::synth::kokoro::KokoroConfig;
use crate::synth::{AudioFormat, VoiceSettings, voices};

/// Hardware acceleration provider for the Kokoro model.
/// Auto-detected based on platform if not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// CPU inference (default fallback, always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA acceleration (Linux only)
    Cuda,
    /// Apple CoreML acceleration (macOS only, uses Neural Engine)
    #[value(name = "coreml")]
    CoreMl,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sherpa_provider())
    }
}

impl Provider {
    /// Provider string understood by sherpa-rs.
    pub fn as_sherpa_provider(&self) -> &'static str {
        match self {
            Provider::Cpu => "cpu",
            Provider::Cuda => "cuda",
            Provider::CoreMl => "coreml",
        }
    }
}

/// Which synthesis engine reads the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Local Kokoro model through sherpa-onnx
    #[default]
    Kokoro,
    /// OpenAI-compatible `/audio/speech` endpoint
    Http,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Kokoro => write!(f, "kokoro"),
            Backend::Http => write!(f, "http"),
        }
    }
}

/// Read-aloud application configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "read-aloud")]
#[command(author, version, about = "Read text and markdown files aloud, or export them as audio", long_about = None)]
pub struct AppConfig {
    /// Text or markdown files to read, in order
    pub inputs: Vec<PathBuf>,

    /// Read this text (queued after any input files)
    #[arg(long, short = 't')]
    pub text: Option<String>,

    /// List all available Kokoro voices and exit
    #[arg(long)]
    pub list_voices: bool,

    /// Synthesis backend
    #[arg(long, short = 'b', value_enum, env = "READ_ALOUD_BACKEND", default_value = "kokoro")]
    pub backend: Backend,

    /// Directory holding the Kokoro model (model.onnx, voices.bin, tokens.txt, espeak-ng-data)
    #[arg(long, short = 'd', env = "READ_ALOUD_MODEL_DIR", default_value_os_t = default_model_dir())]
    pub model_dir: PathBuf,

    /// Voice name (Kokoro voice such as af_bella, or a voice of the HTTP service)
    #[arg(long, default_value = "af_bella")]
    pub voice: String,

    /// Speaking rate multiplier
    #[arg(long, default_value = "1.0")]
    pub rate: f32,

    /// Audio format requested from the backend
    #[arg(long, value_enum, default_value = "pcm16")]
    pub format: AudioFormat,

    /// Base URL of the HTTP speech service
    #[arg(long, env = "READ_ALOUD_TTS_URL", default_value = "http://localhost:8880/v1")]
    pub tts_url: String,

    /// Bearer token for the HTTP speech service
    #[arg(long, env = "READ_ALOUD_TTS_API_KEY", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub tts_api_key: Option<String>,

    /// Model name sent to the HTTP speech service
    #[arg(long, env = "READ_ALOUD_TTS_MODEL", default_value = "kokoro")]
    pub tts_model: String,

    /// Connection timeout for the HTTP speech service, in seconds
    #[arg(long, default_value = "10")]
    pub connect_timeout_secs: u64,

    /// Hardware acceleration provider (auto-detected if not specified)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Kokoro threads (0 = auto-detect based on CPU cores)
    #[arg(long, default_value = "0")]
    pub num_threads: usize,

    /// Largest text request sent to the backend, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_CHUNK_BYTES)]
    pub max_chunk_bytes: usize,

    /// Time allowed for one chunk when exporting, in seconds
    #[arg(long, default_value = "60")]
    pub chunk_timeout_secs: u64,

    /// Pause between chunk requests when exporting, in milliseconds
    #[arg(long, default_value = "100")]
    pub inter_chunk_delay_ms: u64,

    /// Wait for the complete audio before playing instead of streaming it
    #[arg(long)]
    pub no_streaming: bool,

    /// Start over after the last input
    #[arg(long = "loop")]
    pub loop_queue: bool,

    /// Stop playback after this many minutes
    #[arg(long)]
    pub sleep_minutes: Option<u64>,

    /// Write audio here instead of playing it (a directory when exporting several inputs)
    #[arg(long, short = 'o')]
    pub export: Option<PathBuf>,

    /// Minutes finished background tasks are kept
    #[arg(long, default_value = "60")]
    pub retention_minutes: u64,

    /// Directory for temporary audio files
    #[arg(long, env = "READ_ALOUD_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        let mut config = Self::parse();

        if config.list_voices {
            voices::print_voices();
            std::process::exit(0);
        }

        config.normalize_thread_counts();
        config
    }

    /// Pick a thread count when none was given.
    ///
    /// With CUDA a single thread is used since the GPU handles parallelism;
    /// on CPU half the cores, leaving room for decoding and playback.
    fn normalize_thread_counts(&mut self) {
        if self.num_threads == 0 {
            self.num_threads = if self.effective_provider() == Provider::Cuda { 1 } else { (num_cpus::get() / 2).max(1) };
        }
    }

    pub fn effective_provider(&self) -> Provider {
        self.provider.unwrap_or_else(detect_provider)
    }

    /// Whether the run writes files instead of playing.
    pub fn is_export(&self) -> bool {
        self.export.is_some()
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings { voice: self.voice.clone(), format: self.format, rate: self.rate }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig { voice: self.voice_settings(), max_chunk_bytes: self.max_chunk_bytes, streaming: !self.no_streaming }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_chunk_bytes: self.max_chunk_bytes,
            chunk_timeout: Duration::from_secs(self.chunk_timeout_secs),
            inter_chunk_delay: Duration::from_millis(self.inter_chunk_delay_ms),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            pipeline: self.pipeline_config(),
            retention: Duration::from_secs(self.retention_minutes * 60),
            ..Default::default()
        }
    }

    pub fn kokoro_config(&self) -> KokoroConfig {
        KokoroConfig {
            model_dir: self.model_dir.clone(),
            default_voice: self.voice.clone(),
            provider: self.effective_provider().as_sherpa_provider().to_string(),
            num_threads: self.num_threads.max(1) as i32,
            debug: self.verbose,
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            base_url: self.tts_url.clone(),
            api_key: self.tts_api_key.clone(),
            model: self.tts_model.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn sleep_timer(&self) -> Option<Duration> {
        self.sleep_minutes.map(|minutes| Duration::from_secs(minutes * 60))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() && self.text.is_none() {
            anyhow::bail!("Nothing to read: pass input files or --text");
        }

        for input in &self.inputs {
            if !input.is_file() {
                anyhow::bail!("Input file not found: {}", input.display());
            }
        }

        if !(0.25..=4.0).contains(&self.rate) {
            anyhow::bail!("Rate must be between 0.25 and 4.0");
        }

        if self.max_chunk_bytes < 16 {
            anyhow::bail!("Max chunk bytes must be at least 16");
        }

        if self.chunk_timeout_secs == 0 {
            anyhow::bail!("Chunk timeout must be positive");
        }

        if !self.is_export() && self.format != AudioFormat::Pcm16 {
            anyhow::bail!("Speaker playback needs --format pcm16 (got {}); use --export for other formats", self.format);
        }

        match self.backend {
            Backend::Kokoro => {
                if self.format != AudioFormat::Pcm16 {
                    anyhow::bail!("The Kokoro backend only produces pcm16 audio");
                }
                if voices::find_voice(&self.voice).is_none() {
                    anyhow::bail!("Unknown Kokoro voice '{}'. Use --list-voices to see available voices", self.voice);
                }
                if !self.model_dir.exists() {
                    anyhow::bail!("Model directory does not exist: {}", self.model_dir.display());
                }
                for path in &self.kokoro_config().required_files() {
                    if !path.exists() {
                        anyhow::bail!("Required model file not found: {}", path.display());
                    }
                }
            }
            Backend::Http => {
                if !self.tts_url.starts_with("http://") && !self.tts_url.starts_with("https://") {
                    anyhow::bail!("TTS URL must start with http:// or https://");
                }
            }
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Backend: {}", self.backend);
        match self.backend {
            Backend::Kokoro => {
                info!("  Model directory: {}", self.model_dir.display());
                info!("  Provider: {} ({} threads)", self.effective_provider(), self.num_threads);
            }
            Backend::Http => {
                info!("  TTS URL: {}", self.tts_url);
                info!("  TTS model: {}", self.tts_model);
            }
        }
        info!("  Voice: {} (rate {}, {})", self.voice, self.rate, self.format);
        info!("  Max chunk bytes: {}", self.max_chunk_bytes);
        match &self.export {
            Some(path) => {
                info!("  Export to: {}", path.display());
                info!("  Chunk timeout: {}s, delay {}ms", self.chunk_timeout_secs, self.inter_chunk_delay_ms);
            }
            None => {
                info!("  Streaming: {}", !self.no_streaming);
                info!("  Loop: {}", self.loop_queue);
                if let Some(minutes) = self.sleep_minutes {
                    info!("  Sleep timer: {} min", minutes);
                }
            }
        }
    }
}

/// Default Kokoro model directory (~/.read-aloud/models/kokoro-multi-lang-v1_0).
fn default_model_dir() -> PathBuf {
    let base = match dirs::home_dir() {
        Some(home_dir) => home_dir.join(".read-aloud").join("models"),
        None => PathBuf::from("models"),
    };
    base.join("kokoro-multi-lang-v1_0")
}

/// Auto-detect the best hardware acceleration provider.
fn detect_provider() -> Provider {
    #[cfg(target_os = "macos")]
    {
        Provider::CoreMl
    }

    #[cfg(target_os = "linux")]
    {
        if has_nvidia_gpu() { Provider::Cuda } else { Provider::Cpu }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Provider::Cpu
    }
}

/// Check if an NVIDIA GPU is available (Linux only).
#[cfg(target_os = "linux")]
fn has_nvidia_gpu() -> bool {
    use std::path::Path;

    // Desktop device nodes, then Jetson ones
    let nvidia_paths = ["/dev/nvidia0", "/dev/nvidiactl", "/dev/nvhost-ctrl", "/dev/nvhost-ctrl-gpu", "/etc/nv_tegra_release"];
    nvidia_paths.iter().any(|path| Path::new(path).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        AppConfig::try_parse_from(std::iter::once("read-aloud").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--text", "Hello"]);
        assert_eq!(config.backend, Backend::Kokoro);
        assert_eq!(config.format, AudioFormat::Pcm16);
        assert_eq!(config.max_chunk_bytes, DEFAULT_MAX_CHUNK_BYTES);
        assert!(config.engine_config().streaming);
        assert_eq!(config.queue_config().retention, Duration::from_secs(3600));
        assert_eq!(config.pipeline_config().inter_chunk_delay, Duration::from_millis(100));
        assert_eq!(config.sleep_timer(), None);
    }

    #[test]
    fn test_flags_map_to_component_configs() {
        let config = parse(&[
            "--text",
            "Hi",
            "--voice",
            "bf_emma",
            "--rate",
            "1.25",
            "--no-streaming",
            "--max-chunk-bytes",
            "500",
            "--sleep-minutes",
            "15",
        ]);
        let engine = config.engine_config();
        assert!(!engine.streaming);
        assert_eq!(engine.max_chunk_bytes, 500);
        assert_eq!(engine.voice.voice, "bf_emma");
        assert_eq!(engine.voice.rate, 1.25);
        assert_eq!(config.sleep_timer(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_validate_requires_input() {
        let config = parse(&["--backend", "http"]);
        assert!(config.validate().unwrap_err().to_string().contains("Nothing to read"));
    }

    #[test]
    fn test_validate_rejects_undecodable_playback() {
        let config = parse(&["--backend", "http", "--format", "mp3", "--text", "Hi"]);
        assert!(config.validate().is_err());

        let config = parse(&["--backend", "http", "--format", "mp3", "--text", "Hi", "--export", "out.mp3"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_checks_kokoro_voice() {
        let config = parse(&["--text", "Hi", "--voice", "nobody"]);
        assert!(config.validate().unwrap_err().to_string().contains("Unknown Kokoro voice"));
    }

    #[test]
    fn test_validate_checks_rate() {
        let config = parse(&["--backend", "http", "--text", "Hi", "--rate", "0"]);
        assert!(config.validate().is_err());
    }
}
