//! Background generation jobs.
//!
//! Tasks are accepted immediately and processed one at a time by a single
//! worker. Callers poll [`TaskQueue::get_task`] for status and collect audio
//! with [`TaskQueue::take_result`]; finished tasks nobody collects are removed
//! by [`TaskQueue::cleanup_old_tasks`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pipeline::{GeneratedAudio, GenerationPipeline, PipelineConfig};
use crate::error::SpeechError;
use crate::synth::{SynthesisBackend, VoiceSettings};

/// How long finished tasks are kept by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub pipeline: PipelineConfig,
    /// Age past completion after which finished tasks are removed.
    pub retention: Duration,
    /// How often the janitor looks for expired tasks.
    pub janitor_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { pipeline: PipelineConfig::default(), retention: DEFAULT_RETENTION, janitor_interval: Duration::from_secs(5 * 60) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A queued generation job.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationTask {
    pub id: Uuid,
    pub text: String,
    pub voice: VoiceSettings,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(skip)]
    pub result: Option<Arc<Vec<u8>>>,
    pub error: Option<String>,
    #[serde(skip)]
    pub created_at: Instant,
    #[serde(skip)]
    pub completed_at: Option<Instant>,
}

struct Entry {
    seq: u64,
    task: GenerationTask,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Tasks {
    entries: HashMap<Uuid, Entry>,
    next_seq: u64,
}

impl Tasks {
    /// Move a pending task to processing, returning what the worker needs.
    fn begin(&mut self, id: Uuid) -> Option<(String, VoiceSettings, CancellationToken)> {
        let entry = self.entries.get_mut(&id)?;
        if entry.task.status != TaskStatus::Pending {
            return None;
        }
        entry.task.status = TaskStatus::Processing;
        Some((entry.task.text.clone(), entry.task.voice.clone(), entry.cancel.clone()))
    }

    fn set_progress(&mut self, id: Uuid, progress: u8) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.task.progress = entry.task.progress.max(progress.min(99));
        }
    }

    fn finish(&mut self, id: Uuid, result: Result<GeneratedAudio, SpeechError>) {
        let Some(entry) = self.entries.get_mut(&id) else { return };
        let task = &mut entry.task;
        task.completed_at = Some(Instant::now());
        match result {
            Ok(audio) => {
                info!("✅ Task {} completed ({} bytes)", id, audio.bytes.len());
                task.status = TaskStatus::Completed;
                task.progress = 100;
                task.result = Some(Arc::new(audio.bytes));
            }
            Err(e) => {
                warn!("Task {} failed: {}", id, e);
                task.status = TaskStatus::Failed;
                task.error = Some(e.to_string());
            }
        }
    }
}

/// Single-worker queue of generation tasks.
pub struct TaskQueue {
    tasks: Arc<Mutex<Tasks>>,
    tx: mpsc::UnboundedSender<Uuid>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Create the queue and start its worker.
    pub fn new(backend: Arc<dyn SynthesisBackend>, config: QueueConfig) -> Self {
        let tasks = Arc::new(Mutex::new(Tasks::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let worker = tokio::spawn(run_worker(Arc::clone(&tasks), rx, backend, config.pipeline, shutdown.clone()));

        Self { tasks, tx, shutdown, worker: Mutex::new(Some(worker)) }
    }

    /// Queue `text` for generation. Returns the task in its `Pending` state.
    pub fn create_task(&self, text: impl Into<String>, voice: VoiceSettings) -> GenerationTask {
        let id = Uuid::new_v4();
        let task = GenerationTask {
            id,
            text: text.into(),
            voice,
            status: TaskStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            created_at: Instant::now(),
            completed_at: None,
        };

        {
            let mut tasks = self.tasks.lock();
            let seq = tasks.next_seq;
            tasks.next_seq += 1;
            let cancel = self.shutdown.child_token();
            tasks.entries.insert(id, Entry { seq, task: task.clone(), cancel });
        }

        if self.tx.send(id).is_err() {
            warn!("Task queue worker has stopped; task {} will not run", id);
        }
        info!("📥 Task {} queued ({} chars)", id, task.text.len());
        task
    }

    pub fn get_task(&self, id: Uuid) -> Option<GenerationTask> {
        self.tasks.lock().entries.get(&id).map(|e| e.task.clone())
    }

    /// All tasks in creation order.
    pub fn get_all_tasks(&self) -> Vec<GenerationTask> {
        let tasks = self.tasks.lock();
        let mut entries: Vec<&Entry> = tasks.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.task.clone()).collect()
    }

    /// Cancel a task that has not finished.
    ///
    /// A pending task fails at once; a processing one fails as soon as the
    /// worker abandons its request. Returns `false` for finished or unknown
    /// tasks.
    pub fn cancel_task(&self, id: Uuid) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(entry) = tasks.entries.get_mut(&id) else {
            return false;
        };
        match entry.task.status {
            TaskStatus::Pending => {
                entry.cancel.cancel();
                entry.task.status = TaskStatus::Failed;
                entry.task.error = Some(SpeechError::Cancelled.to_string());
                entry.task.completed_at = Some(Instant::now());
                info!("Task {} cancelled before starting", id);
                true
            }
            TaskStatus::Processing => {
                entry.cancel.cancel();
                info!("Cancelling task {}", id);
                true
            }
            TaskStatus::Completed | TaskStatus::Failed => false,
        }
    }

    /// Remove a completed task and hand over its audio.
    pub fn take_result(&self, id: Uuid) -> Option<Vec<u8>> {
        let mut tasks = self.tasks.lock();
        if tasks.entries.get(&id)?.task.status != TaskStatus::Completed {
            return None;
        }
        let entry = tasks.entries.remove(&id)?;
        entry.task.result.map(Arc::unwrap_or_clone)
    }

    /// Remove finished tasks that completed at least `max_age` ago.
    pub fn cleanup_old_tasks(&self, max_age: Duration) -> usize {
        cleanup(&self.tasks, max_age)
    }

    /// Run [`TaskQueue::cleanup_old_tasks`] every `every` until shutdown.
    pub fn spawn_janitor(&self, every: Duration, max_age: Duration) -> JoinHandle<()> {
        let tasks = Arc::clone(&self.tasks);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = cleanup(&tasks, max_age);
                        if removed > 0 {
                            debug!("Janitor removed {} expired task(s)", removed);
                        }
                    }
                }
            }
        })
    }

    /// Stop the worker, failing the task in progress.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!("Task queue worker ended abnormally: {}", e);
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn cleanup(tasks: &Mutex<Tasks>, max_age: Duration) -> usize {
    let now = Instant::now();
    let mut tasks = tasks.lock();
    let before = tasks.entries.len();
    tasks.entries.retain(|_, entry| match entry.task.completed_at {
        Some(completed_at) if entry.task.status.is_terminal() => now.duration_since(completed_at) < max_age,
        _ => true,
    });
    before - tasks.entries.len()
}

async fn run_worker(
    tasks: Arc<Mutex<Tasks>>,
    mut rx: mpsc::UnboundedReceiver<Uuid>,
    backend: Arc<dyn SynthesisBackend>,
    config: PipelineConfig,
    shutdown: CancellationToken,
) {
    debug!("Task queue worker started");
    loop {
        let id = tokio::select! {
            _ = shutdown.cancelled() => break,
            id = rx.recv() => match id {
                Some(id) => id,
                None => break,
            },
        };

        let Some((text, voice, cancel)) = tasks.lock().begin(id) else {
            debug!("Skipping task {} (no longer pending)", id);
            continue;
        };
        info!("⚙️ Processing task {}", id);

        let pipeline = GenerationPipeline::new(Arc::clone(&backend), config.clone());
        let mut progress = pipeline.subscribe();
        let run = pipeline.run(&text, &voice, &cancel);
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                Ok(()) = progress.changed() => {
                    let overall = progress.borrow_and_update().overall_progress;
                    tasks.lock().set_progress(id, overall);
                }
            }
        };
        tasks.lock().finish(id, result);
    }
    debug!("Task queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Script, ScriptedBackend, eventually};

    fn queue(backend: Arc<ScriptedBackend>) -> TaskQueue {
        let pipeline = PipelineConfig { inter_chunk_delay: Duration::ZERO, ..Default::default() };
        TaskQueue::new(backend, QueueConfig { pipeline, ..Default::default() })
    }

    async fn wait_status(queue: &TaskQueue, id: Uuid, status: TaskStatus) -> GenerationTask {
        eventually("task status", || queue.get_task(id).is_some_and(|t| t.status == status)).await;
        queue.get_task(id).unwrap()
    }

    #[tokio::test]
    async fn test_task_completes_in_background() {
        let queue = queue(ScriptedBackend::echo());
        let task = queue.create_task("Hello world.", VoiceSettings::default());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);

        let done = wait_status(&queue, task.id, TaskStatus::Completed).await;
        assert_eq!(done.progress, 100);
        assert!(done.completed_at.is_some());
        assert_eq!(done.result.as_deref(), Some(&b"Hello world.".to_vec()));
    }

    #[tokio::test]
    async fn test_failed_generation_marks_task() {
        let queue = queue(ScriptedBackend::new([Script::Fail("quota exceeded".to_string())]));
        let task = queue.create_task("Anything.", VoiceSettings::default());

        let failed = wait_status(&queue, task.id, TaskStatus::Failed).await;
        assert!(failed.error.as_deref().is_some_and(|e| e.contains("quota exceeded")));
        assert!(failed.result.is_none());
        assert_eq!(queue.take_result(task.id), None);
    }

    #[tokio::test]
    async fn test_tasks_run_one_at_a_time() {
        let backend = ScriptedBackend::new([Script::Hang]);
        let queue = queue(backend.clone());
        let first = queue.create_task("First.", VoiceSettings::default());
        let second = queue.create_task("Second.", VoiceSettings::default());

        wait_status(&queue, first.id, TaskStatus::Processing).await;
        assert_eq!(queue.get_task(second.id).unwrap().status, TaskStatus::Pending);
        assert_eq!(backend.requests().len(), 1);

        assert!(queue.cancel_task(first.id));
        let cancelled = wait_status(&queue, first.id, TaskStatus::Failed).await;
        assert_eq!(cancelled.error.as_deref(), Some("Generation cancelled"));
        eventually("request abandoned", || backend.abandoned() == 1).await;

        wait_status(&queue, second.id, TaskStatus::Completed).await;
        assert!(!queue.cancel_task(second.id));
    }

    #[tokio::test]
    async fn test_cancelled_pending_task_never_runs() {
        let backend = ScriptedBackend::new([Script::Hang]);
        let queue = queue(backend.clone());
        let first = queue.create_task("Blocking.", VoiceSettings::default());
        let second = queue.create_task("Skipped.", VoiceSettings::default());
        wait_status(&queue, first.id, TaskStatus::Processing).await;

        assert!(queue.cancel_task(second.id));
        assert_eq!(queue.get_task(second.id).unwrap().status, TaskStatus::Failed);

        queue.cancel_task(first.id);
        wait_status(&queue, first.id, TaskStatus::Failed).await;
        let third = queue.create_task("After.", VoiceSettings::default());
        wait_status(&queue, third.id, TaskStatus::Completed).await;

        let texts: Vec<_> = backend.requests().into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["Blocking.", "After."]);
        assert!(!queue.cancel_task(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_all_tasks_in_creation_order() {
        let queue = queue(ScriptedBackend::new([Script::Hang]));
        let ids: Vec<_> = (0..5).map(|i| queue.create_task(format!("Task {}.", i), VoiceSettings::default()).id).collect();

        let listed: Vec<_> = queue.get_all_tasks().into_iter().map(|t| t.id).collect();
        assert_eq!(listed, ids);
        assert!(queue.get_task(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn test_take_result_consumes_task() {
        let queue = queue(ScriptedBackend::echo());
        let task = queue.create_task("Keep me.", VoiceSettings::default());
        wait_status(&queue, task.id, TaskStatus::Completed).await;

        assert_eq!(queue.take_result(task.id), Some(b"Keep me.".to_vec()));
        assert!(queue.get_task(task.id).is_none());
        assert_eq!(queue.take_result(task.id), None);
    }

    #[tokio::test]
    async fn test_take_result_leaves_unfinished_task() {
        let queue = queue(ScriptedBackend::new([Script::Hang]));
        let task = queue.create_task("Still going.", VoiceSettings::default());
        wait_status(&queue, task.id, TaskStatus::Processing).await;

        assert_eq!(queue.take_result(task.id), None);
        assert!(queue.get_task(task.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_only_old_finished_tasks() {
        let queue = queue(ScriptedBackend::new([
            Script::Chunks(vec![b"a".to_vec()]),
            Script::Chunks(vec![b"b".to_vec()]),
            Script::Hang,
        ]));
        let old = queue.create_task("Old.", VoiceSettings::default());
        wait_status(&queue, old.id, TaskStatus::Completed).await;

        tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
        let recent = queue.create_task("Recent.", VoiceSettings::default());
        wait_status(&queue, recent.id, TaskStatus::Completed).await;
        let running = queue.create_task("Running.", VoiceSettings::default());
        wait_status(&queue, running.id, TaskStatus::Processing).await;

        assert_eq!(queue.cleanup_old_tasks(DEFAULT_RETENTION), 1);
        assert!(queue.get_task(old.id).is_none());
        assert!(queue.get_task(recent.id).is_some());

        assert_eq!(queue.cleanup_old_tasks(Duration::ZERO), 1);
        assert!(queue.get_task(running.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_expires_tasks() {
        let queue = queue(ScriptedBackend::echo());
        let task = queue.create_task("Forgotten.", VoiceSettings::default());
        wait_status(&queue, task.id, TaskStatus::Completed).await;

        let janitor = queue.spawn_janitor(Duration::from_secs(60), Duration::from_secs(10 * 60));
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert!(queue.get_task(task.id).is_some());

        tokio::time::sleep(Duration::from_secs(6 * 60 + 30)).await;
        assert!(queue.get_task(task.id).is_none());

        queue.shutdown().await;
        janitor.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_fails_running_task() {
        let backend = ScriptedBackend::new([Script::Hang]);
        let queue = queue(backend.clone());
        let task = queue.create_task("Interrupted.", VoiceSettings::default());
        wait_status(&queue, task.id, TaskStatus::Processing).await;

        queue.shutdown().await;
        assert_eq!(queue.get_task(task.id).unwrap().status, TaskStatus::Failed);
        eventually("request abandoned", || backend.abandoned() == 1).await;
    }
}
