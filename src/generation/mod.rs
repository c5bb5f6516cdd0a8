//! Exportable audio: the chunked pipeline and the background task queue.

pub mod pipeline;
pub mod queue;

pub use pipeline::{
    ChunkStatus, GeneratedAudio, GenerationPhase, GenerationPipeline, GenerationProgress, PipelineConfig, TextChunk, estimate_progress,
};
pub use queue::{DEFAULT_RETENTION, GenerationTask, QueueConfig, TaskQueue, TaskStatus};
