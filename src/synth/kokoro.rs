//! Local Kokoro synthesis through sherpa-rs.
//!
//! Kokoro produces f32 samples at 24 kHz, so this backend only serves
//! [`AudioFormat::Pcm16`]. Each request is synthesized sentence by sentence
//! on a blocking thread and streamed out as soon as a sentence is ready.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sherpa_rs::OnnxConfig;
use sherpa_rs::tts::{CommonTtsConfig, KokoroTts, KokoroTtsConfig};
use tracing::{debug, info, warn};

use super::voices::{self, KokoroVoice};
use super::{AudioFormat, SynthEvent, SynthRequest, SynthSender, SynthStream, SynthesisBackend};
use crate::audio::encode_pcm16;
use crate::error::SpeechError;
use crate::text::chunker;

/// Sentences synthesized ahead of the consumer.
const STREAM_BUFFER: usize = 4;

/// Upper bound for one Kokoro `create` call, in bytes of text.
const SENTENCE_BYTES: usize = 300;

/// Settings for loading the Kokoro model.
#[derive(Debug, Clone)]
pub struct KokoroConfig {
    /// Directory holding `model.onnx`, `voices.bin`, `tokens.txt` and the espeak data.
    pub model_dir: PathBuf,
    /// Voice whose language selects the lexicon; requests may switch speakers.
    pub default_voice: String,
    /// ONNX execution provider (`cpu`, `cuda`, `coreml`).
    pub provider: String,
    pub num_threads: i32,
    pub debug: bool,
}

impl KokoroConfig {
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join("model.onnx")
    }

    pub fn voices_path(&self) -> PathBuf {
        self.model_dir.join("voices.bin")
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.model_dir.join("tokens.txt")
    }

    /// Files that must exist before the model can load.
    pub fn required_files(&self) -> [PathBuf; 3] {
        [self.model_path(), self.voices_path(), self.tokens_path()]
    }
}

/// Kokoro text-to-speech backend.
pub struct KokoroBackend {
    tts: Arc<Mutex<KokoroTts>>,
    default_voice: KokoroVoice,
}

impl KokoroBackend {
    /// Load the Kokoro model.
    ///
    /// # Errors
    /// Returns an error if the default voice is unknown.
    pub fn new(config: &KokoroConfig) -> Result<Self, SpeechError> {
        let default_voice = voices::find_voice(&config.default_voice)
            .ok_or_else(|| SpeechError::synthesis(format!("unknown Kokoro voice '{}'", config.default_voice)))?;

        info!("Initializing Kokoro TTS with {} provider", config.provider);
        info!("TTS voice: {} (speaker ID: {})", default_voice.name, default_voice.speaker_id);

        let tts_config = KokoroTtsConfig {
            model: path_string(&config.model_path()),
            voices: path_string(&config.voices_path()),
            tokens: path_string(&config.tokens_path()),
            data_dir: path_string(&config.model_dir.join("espeak-ng-data")),
            dict_dir: path_string(&config.model_dir.join("dict")),
            lexicon: default_voice.language.lexicon(&config.model_dir),
            lang: default_voice.language.espeak_lang().to_string(),
            length_scale: 1.0,
            onnx_config: OnnxConfig { provider: config.provider.clone(), num_threads: config.num_threads.max(1), debug: config.debug },
            common_config: CommonTtsConfig { max_num_sentences: 1, ..Default::default() }, // Kokoro only supports 1
        };

        let tts = KokoroTts::new(tts_config);
        Ok(Self { tts: Arc::new(Mutex::new(tts)), default_voice })
    }

    fn speaker_for(&self, name: &str) -> i32 {
        match voices::find_voice(name) {
            Some(voice) => voice.speaker_id,
            None => {
                warn!("Unknown voice '{}', using {}", name, self.default_voice.name);
                self.default_voice.speaker_id
            }
        }
    }
}

#[async_trait]
impl SynthesisBackend for KokoroBackend {
    async fn open_stream(&self, request: SynthRequest) -> Result<SynthStream, SpeechError> {
        if request.voice.format != AudioFormat::Pcm16 {
            return Err(SpeechError::UnsupportedFormat(request.voice.format));
        }

        let speaker_id = self.speaker_for(&request.voice.voice);
        let speed = request.voice.rate;
        let (tx, stream) = SynthStream::channel(STREAM_BUFFER);
        let tts = Arc::clone(&self.tts);

        tokio::task::spawn_blocking(move || synthesize_blocking(&tts, &request.text, speaker_id, speed, &tx));
        Ok(stream)
    }

    fn name(&self) -> &str {
        "kokoro"
    }
}

fn synthesize_blocking(tts: &Mutex<KokoroTts>, text: &str, speaker_id: i32, speed: f32, tx: &SynthSender) {
    for sentence in chunker::split(text, SENTENCE_BYTES) {
        if tx.is_cancelled() {
            debug!("Kokoro request abandoned");
            return;
        }

        debug!("Synthesizing sentence: \"{}\"", sentence);
        let audio = tts.lock().create(&sentence, speaker_id, speed);
        match audio {
            Ok(audio) => {
                debug!("🎵 Generated speech ({} samples)", audio.samples.len());
                if !tx.blocking_send(SynthEvent::Data(encode_pcm16(&audio.samples))) {
                    return;
                }
            }
            Err(e) => {
                tx.blocking_send(SynthEvent::Error(format!("TTS generation failed: {}", e)));
                return;
            }
        }
    }
    tx.blocking_send(SynthEvent::End);
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
