//! Chunked generation of a complete audio file.
//!
//! Text is split into backend-sized chunks which are synthesized one after
//! another. A failed chunk is recorded and skipped; the run only fails when
//! no chunk produced audio.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SpeechError;
use crate::playback::DEFAULT_MAX_CHUNK_BYTES;
use crate::synth::{AudioFormat, SynthEvent, SynthRequest, SynthesisBackend, VoiceSettings};
use crate::text::{chunker, clean_text};

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Largest text request sent to the backend.
    pub max_chunk_bytes: usize,
    /// Time allowed for one chunk, from request to last byte.
    pub chunk_timeout: Duration,
    /// Pause between consecutive requests.
    pub inter_chunk_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            chunk_timeout: Duration::from_secs(60),
            inter_chunk_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationPhase {
    #[default]
    Splitting,
    Generating,
    Combining,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ChunkStatus {
    fn is_terminal(self) -> bool {
        matches!(self, ChunkStatus::Completed | ChunkStatus::Failed)
    }
}

/// One backend request worth of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: usize,
    pub text: String,
    pub status: ChunkStatus,
    /// 0-100, never decreasing.
    pub progress: u8,
    pub error: Option<String>,
}

/// Published view of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationProgress {
    pub phase: GenerationPhase,
    pub overall_progress: u8,
    pub chunks: Vec<TextChunk>,
}

impl GenerationProgress {
    fn recompute_overall(&mut self) {
        if self.chunks.is_empty() {
            return;
        }
        let sum: usize = self
            .chunks
            .iter()
            .map(|c| if c.status.is_terminal() { 100 } else { c.progress as usize })
            .sum();
        let overall = (sum / self.chunks.len()).min(99) as u8;
        self.overall_progress = self.overall_progress.max(overall);
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAudio {
    /// Successful chunks concatenated in chunk order.
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
    pub chunks: usize,
    pub failed_chunks: usize,
}

/// Progress estimate for a chunk that has received `received` bytes.
///
/// Capped at 99 so only completion reports 100.
pub fn estimate_progress(received: usize, chars: usize, format: AudioFormat) -> u8 {
    let estimated = chars.max(1) * format.estimated_bytes_per_char();
    (received.saturating_mul(100) / estimated).min(99) as u8
}

/// Sequential chunk-by-chunk synthesizer.
pub struct GenerationPipeline {
    backend: Arc<dyn SynthesisBackend>,
    config: PipelineConfig,
    progress: watch::Sender<GenerationProgress>,
}

impl GenerationPipeline {
    pub fn new(backend: Arc<dyn SynthesisBackend>, config: PipelineConfig) -> Self {
        let (progress, _) = watch::channel(GenerationProgress::default());
        Self { backend, config, progress }
    }

    pub fn subscribe(&self) -> watch::Receiver<GenerationProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> GenerationProgress {
        self.progress.borrow().clone()
    }

    /// Synthesize `text` into one audio buffer.
    pub async fn run(&self, text: &str, voice: &VoiceSettings, cancel: &CancellationToken) -> Result<GeneratedAudio, SpeechError> {
        self.progress.send_replace(GenerationProgress::default());

        let text = clean_text(text);
        let chunks = chunker::split(&text, self.config.max_chunk_bytes);
        if chunks.is_empty() {
            self.set_phase(GenerationPhase::Error);
            return Err(SpeechError::NoReadableText);
        }

        let total = chunks.len();
        info!("🧩 Generating {} chunk(s) with {} ({})", total, self.backend.name(), voice.format);
        self.progress.send_modify(|p| {
            p.chunks = chunks
                .iter()
                .enumerate()
                .map(|(id, text)| TextChunk { id, text: text.clone(), status: ChunkStatus::Pending, progress: 0, error: None })
                .collect();
            p.phase = GenerationPhase::Generating;
        });

        let mut results: Vec<Option<Vec<u8>>> = Vec::with_capacity(total);
        let mut last_error = None;

        for (id, chunk) in chunks.iter().enumerate() {
            if id > 0 && !self.config.inter_chunk_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(self.cancelled()),
                    _ = tokio::time::sleep(self.config.inter_chunk_delay) => {}
                }
            }

            self.update_chunk(id, |c| c.status = ChunkStatus::Processing);
            debug!("Chunk {}/{} ({} bytes)", id + 1, total, chunk.len());

            match self.synthesize_chunk(id, chunk, voice, cancel).await {
                Ok(bytes) => {
                    debug!("Chunk {}/{} done ({} bytes of audio)", id + 1, total, bytes.len());
                    self.update_chunk(id, |c| {
                        c.status = ChunkStatus::Completed;
                        c.progress = 100;
                    });
                    results.push(Some(bytes));
                }
                Err(SpeechError::Cancelled) => return Err(self.cancelled()),
                Err(e) => {
                    warn!("Chunk {}/{} failed: {}", id + 1, total, e);
                    let message = e.to_string();
                    self.update_chunk(id, |c| {
                        c.status = ChunkStatus::Failed;
                        c.error = Some(message.clone());
                    });
                    last_error = Some(message);
                    results.push(None);
                }
            }
        }

        self.set_phase(GenerationPhase::Combining);
        let failed_chunks = results.iter().filter(|r| r.is_none()).count();
        if failed_chunks == total {
            self.set_phase(GenerationPhase::Error);
            return Err(SpeechError::AllChunksFailed { count: total, last_error: last_error.unwrap_or_default() });
        }

        let bytes: Vec<u8> = results.into_iter().flatten().flatten().collect();
        self.progress.send_modify(|p| {
            p.phase = GenerationPhase::Completed;
            p.overall_progress = 100;
        });
        info!("✅ Generated {} bytes ({} of {} chunks)", bytes.len(), total - failed_chunks, total);

        Ok(GeneratedAudio { bytes, format: voice.format, chunks: total, failed_chunks })
    }

    async fn synthesize_chunk(
        &self,
        id: usize,
        text: &str,
        voice: &VoiceSettings,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, SpeechError> {
        let chars = text.chars().count();
        let request = SynthRequest::new(text, voice.clone());

        tokio::select! {
            _ = cancel.cancelled() => Err(SpeechError::Cancelled),
            result = tokio::time::timeout(self.config.chunk_timeout, self.receive(id, request, chars)) => {
                result.unwrap_or(Err(SpeechError::Timeout(self.config.chunk_timeout)))
            }
        }
    }

    // Dropping this future drops the stream, abandoning the request.
    async fn receive(&self, id: usize, request: SynthRequest, chars: usize) -> Result<Vec<u8>, SpeechError> {
        let format = request.voice.format;
        let mut stream = self.backend.open_stream(request).await?;
        let mut bytes = Vec::new();
        loop {
            match stream.next_event().await {
                SynthEvent::Data(data) => {
                    bytes.extend_from_slice(&data);
                    let estimate = estimate_progress(bytes.len(), chars, format);
                    self.update_chunk(id, |c| c.progress = c.progress.max(estimate));
                }
                SynthEvent::End => return Ok(bytes),
                SynthEvent::Error(message) => return Err(SpeechError::Synthesis(message)),
            }
        }
    }

    fn update_chunk(&self, id: usize, update: impl FnOnce(&mut TextChunk)) {
        self.progress.send_modify(|p| {
            if let Some(chunk) = p.chunks.get_mut(id) {
                update(chunk);
            }
            p.recompute_overall();
        });
    }

    fn set_phase(&self, phase: GenerationPhase) {
        self.progress.send_modify(|p| p.phase = phase);
    }

    fn cancelled(&self) -> SpeechError {
        info!("Generation cancelled");
        self.set_phase(GenerationPhase::Error);
        SpeechError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Script, ScriptedBackend, eventually};

    fn config(max_chunk_bytes: usize) -> PipelineConfig {
        PipelineConfig { max_chunk_bytes, inter_chunk_delay: Duration::ZERO, ..Default::default() }
    }

    const THREE_PARAGRAPHS: &str = "aaaa.\n\nbbbb.\n\ncccc.";

    #[tokio::test]
    async fn test_failed_chunks_are_skipped() {
        let backend = ScriptedBackend::new([
            Script::Fail("service unavailable".to_string()),
            Script::Chunks(vec![b"one".to_vec()]),
            Script::Chunks(vec![b"tw".to_vec(), b"o".to_vec()]),
        ]);
        let pipeline = GenerationPipeline::new(backend.clone(), config(6));

        let audio = pipeline.run(THREE_PARAGRAPHS, &VoiceSettings::default(), &CancellationToken::new()).await.unwrap();
        assert_eq!(audio.bytes, b"onetwo");
        assert_eq!(audio.chunks, 3);
        assert_eq!(audio.failed_chunks, 1);

        let progress = pipeline.progress();
        assert_eq!(progress.phase, GenerationPhase::Completed);
        assert_eq!(progress.overall_progress, 100);
        let statuses: Vec<_> = progress.chunks.iter().map(|c| c.status).collect();
        assert_eq!(statuses, vec![ChunkStatus::Failed, ChunkStatus::Completed, ChunkStatus::Completed]);
        assert!(progress.chunks[0].error.as_deref().is_some_and(|e| e.contains("service unavailable")));

        let texts: Vec<_> = backend.requests().into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["aaaa.", "bbbb.", "cccc."]);
    }

    #[tokio::test]
    async fn test_all_chunks_failing_is_an_error() {
        let backend = ScriptedBackend::new([Script::Fail("first".to_string()), Script::Refuse("second".to_string())]);
        let pipeline = GenerationPipeline::new(backend, config(6));

        let err = pipeline.run("aaaa.\n\nbbbb.", &VoiceSettings::default(), &CancellationToken::new()).await.unwrap_err();
        match err {
            SpeechError::AllChunksFailed { count, last_error } => {
                assert_eq!(count, 2);
                assert!(last_error.contains("second"), "{}", last_error);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(pipeline.progress().phase, GenerationPhase::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_chunk_times_out() {
        let backend = ScriptedBackend::new([Script::Hang]);
        let config = PipelineConfig { chunk_timeout: Duration::from_secs(5), ..config(4000) };
        let pipeline = GenerationPipeline::new(backend.clone(), config);

        let err = pipeline.run("Never answered.", &VoiceSettings::default(), &CancellationToken::new()).await.unwrap_err();
        match err {
            SpeechError::AllChunksFailed { last_error, .. } => assert!(last_error.contains("timed out")),
            other => panic!("unexpected error {:?}", other),
        }
        eventually("request abandoned", || backend.abandoned() == 1).await;
    }

    #[tokio::test]
    async fn test_cancel_abandons_request() {
        let backend = ScriptedBackend::new([Script::Hang]);
        let pipeline = Arc::new(GenerationPipeline::new(backend.clone(), config(4000)));
        let cancel = CancellationToken::new();

        let run = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            let cancel = cancel.clone();
            async move { pipeline.run("Hold on.", &VoiceSettings::default(), &cancel).await }
        });
        eventually("request opened", || backend.requests().len() == 1).await;
        cancel.cancel();

        assert!(matches!(run.await.unwrap(), Err(SpeechError::Cancelled)));
        assert_eq!(pipeline.progress().phase, GenerationPhase::Error);
        eventually("request abandoned", || backend.abandoned() == 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_spaced_by_delay() {
        let backend = ScriptedBackend::echo();
        let config = PipelineConfig { inter_chunk_delay: Duration::from_secs(2), ..config(6) };
        let pipeline = GenerationPipeline::new(backend, config);

        let start = tokio::time::Instant::now();
        let audio = pipeline.run(THREE_PARAGRAPHS, &VoiceSettings::default(), &CancellationToken::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_eq!(audio.bytes, b"aaaa.bbbb.cccc.");
    }

    #[tokio::test]
    async fn test_unreadable_text() {
        let pipeline = GenerationPipeline::new(ScriptedBackend::echo(), config(4000));
        let result = pipeline.run("<br/>  ", &VoiceSettings::default(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(SpeechError::NoReadableText)));
        assert_eq!(pipeline.progress().phase, GenerationPhase::Error);
    }

    #[test]
    fn test_progress_estimate_is_capped() {
        // 10 chars of PCM is about 32 000 bytes.
        assert_eq!(estimate_progress(0, 10, AudioFormat::Pcm16), 0);
        assert_eq!(estimate_progress(16_000, 10, AudioFormat::Pcm16), 50);
        assert_eq!(estimate_progress(1_000_000, 10, AudioFormat::Pcm16), 99);
        assert_eq!(estimate_progress(2_000, 10, AudioFormat::Mp3), 50);
    }

    #[test]
    fn test_overall_progress_never_decreases() {
        let chunk = |status, progress| TextChunk { id: 0, text: String::new(), status, progress, error: None };
        let mut progress = GenerationProgress {
            chunks: vec![chunk(ChunkStatus::Completed, 100), chunk(ChunkStatus::Processing, 80)],
            ..Default::default()
        };
        progress.recompute_overall();
        assert_eq!(progress.overall_progress, 90);

        progress.chunks[1].progress = 10;
        progress.recompute_overall();
        assert_eq!(progress.overall_progress, 90);

        progress.chunks[1].status = ChunkStatus::Failed;
        progress.recompute_overall();
        assert_eq!(progress.overall_progress, 99);
    }
}
