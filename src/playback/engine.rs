//! Playback engine actor.
//!
//! One task owns the active [`Session`] and the reading queue. Commands from
//! [`PlaybackEngine`] handles, [`HostEvent`]s from the audio output, synthesis
//! events from the pump task and persistence results all arrive through a
//! single mailbox, so they are applied in one total order. Every message that
//! belongs to a session carries its attempt id; anything stamped with an
//! older attempt is dropped.
//!
//! ```text
//!   Idle → Loading → Playing ⇄ Paused → Ended → (replay) Playing
//!     ▲                                             │
//!     └──────────────── stop / error ───────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::host::{AudioHost, EventSink, HostEvent, SourceHandle};
use super::queue::{PlayQueue, QueueItem, QueueSnapshot, Removal};
use super::session::{BatchStage, PlaybackMode, PlaybackSnapshot, PlaybackState, Session};
use crate::error::SpeechError;
use crate::storage::HostStorage;
use crate::synth::{SynthEvent, SynthRequest, SynthesisBackend, VoiceSettings};
use crate::text::{chunker, clean_text};

/// Default request size for synthesis backends.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 4000;

/// Playback engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Voice used for new sessions.
    pub voice: VoiceSettings,
    /// Largest text request sent to the backend.
    pub max_chunk_bytes: usize,
    /// Use incremental appends when the host supports them.
    pub streaming: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { voice: VoiceSettings::default(), max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES, streaming: true }
    }
}

/// Lifecycle notifications for listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlaybackNotice {
    /// Audio started rendering for a session.
    Started { attempt: u64, mode: PlaybackMode },
    /// A session played to its end.
    Ended { attempt: u64 },
    /// Playback was stopped before its end.
    Stopped { attempt: u64 },
    /// A session failed and was torn down.
    Error { attempt: u64, message: String },
    /// The sleep timer fired and stopped playback.
    SleepTimerExpired,
}

pub(crate) enum Command {
    Start(String),
    Pause,
    Resume,
    Stop,
    Seek(f64),
    JumpForward(f64),
    JumpBackward(f64),
    Replay,
    ExportAudio(oneshot::Sender<Option<Vec<u8>>>),
    SetVoice(VoiceSettings),
    AddToQueue(QueueItem),
    RemoveQueueItem(usize),
    MoveQueueItem { from: usize, to: usize },
    ClearQueue,
    SetLoop(bool),
    PlayQueueFrom(usize),
    SetSleepTimer(Duration),
    CancelSleepTimer,
    Shutdown,
}

/// Everything the engine actor reacts to.
pub(crate) enum EngineMsg {
    Command(Command),
    Host { attempt: u64, event: HostEvent },
    Synth { attempt: u64, event: SynthEvent },
    Persisted { attempt: u64, path: Option<PathBuf> },
}

/// Handle to a running playback engine.
///
/// Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct PlaybackEngine {
    tx: mpsc::UnboundedSender<EngineMsg>,
    state_rx: watch::Receiver<PlaybackSnapshot>,
    queue_rx: watch::Receiver<QueueSnapshot>,
}

impl PlaybackEngine {
    /// Spawn the engine task.
    ///
    /// Returns the handle and the notice stream.
    pub fn spawn(
        config: EngineConfig,
        backend: Arc<dyn SynthesisBackend>,
        host: Arc<dyn AudioHost>,
        storage: Arc<dyn HostStorage>,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PlaybackSnapshot::default());
        let (queue_tx, queue_rx) = watch::channel(QueueSnapshot::default());

        let actor = EngineActor {
            config,
            backend,
            host,
            storage,
            tx: tx.downgrade(),
            attempt: 0,
            session: None,
            queue: PlayQueue::new(),
            sleep_deadline: None,
            state_tx,
            queue_tx,
            notices: notice_tx,
        };
        tokio::spawn(actor.run(rx));

        (Self { tx, state_rx, queue_rx }, notice_rx)
    }

    fn send(&self, command: Command) -> Result<(), SpeechError> {
        self.tx.send(EngineMsg::Command(command)).map_err(|_| SpeechError::EngineClosed)
    }

    /// Read `text` aloud, replacing whatever is playing.
    pub fn start_playback(&self, text: impl Into<String>) -> Result<(), SpeechError> {
        self.send(Command::Start(text.into()))
    }

    pub fn pause(&self) -> Result<(), SpeechError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), SpeechError> {
        self.send(Command::Resume)
    }

    /// Stop playback and discard the session. Safe in any state.
    pub fn stop(&self) -> Result<(), SpeechError> {
        self.send(Command::Stop)
    }

    /// Seek to `position` seconds, clamped to the session duration.
    pub fn seek(&self, position: f64) -> Result<(), SpeechError> {
        self.send(Command::Seek(position))
    }

    pub fn jump_forward(&self, seconds: f64) -> Result<(), SpeechError> {
        self.send(Command::JumpForward(seconds))
    }

    pub fn jump_backward(&self, seconds: f64) -> Result<(), SpeechError> {
        self.send(Command::JumpBackward(seconds))
    }

    /// Play the current session again from the start.
    pub fn replay(&self) -> Result<(), SpeechError> {
        self.send(Command::Replay)
    }

    /// The session's complete audio, once synthesis has finished.
    pub async fn export_audio(&self) -> Result<Option<Vec<u8>>, SpeechError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::ExportAudio(reply_tx))?;
        reply_rx.await.map_err(|_| SpeechError::EngineClosed)
    }

    /// Voice for sessions started after this call.
    pub fn set_voice(&self, voice: VoiceSettings) -> Result<(), SpeechError> {
        self.send(Command::SetVoice(voice))
    }

    pub fn add_to_queue(&self, item: QueueItem) -> Result<(), SpeechError> {
        self.send(Command::AddToQueue(item))
    }

    pub fn remove_queue_item(&self, index: usize) -> Result<(), SpeechError> {
        self.send(Command::RemoveQueueItem(index))
    }

    pub fn move_queue_item(&self, from: usize, to: usize) -> Result<(), SpeechError> {
        self.send(Command::MoveQueueItem { from, to })
    }

    pub fn clear_queue(&self) -> Result<(), SpeechError> {
        self.send(Command::ClearQueue)
    }

    pub fn set_loop(&self, enabled: bool) -> Result<(), SpeechError> {
        self.send(Command::SetLoop(enabled))
    }

    /// Play the queue from its first item.
    pub fn play_queue(&self) -> Result<(), SpeechError> {
        self.play_queue_from(0)
    }

    pub fn play_queue_from(&self, index: usize) -> Result<(), SpeechError> {
        self.send(Command::PlayQueueFrom(index))
    }

    /// Stop playback after `after`, replacing any armed timer.
    pub fn set_sleep_timer(&self, after: Duration) -> Result<(), SpeechError> {
        self.send(Command::SetSleepTimer(after))
    }

    pub fn cancel_sleep_timer(&self) -> Result<(), SpeechError> {
        self.send(Command::CancelSleepTimer)
    }

    /// Stop playback and end the engine task.
    pub fn shutdown(&self) -> Result<(), SpeechError> {
        self.send(Command::Shutdown)
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.state_rx.clone()
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.queue_rx.borrow().clone()
    }

    pub fn subscribe_queue(&self) -> watch::Receiver<QueueSnapshot> {
        self.queue_rx.clone()
    }
}

struct EngineActor {
    config: EngineConfig,
    backend: Arc<dyn SynthesisBackend>,
    host: Arc<dyn AudioHost>,
    storage: Arc<dyn HostStorage>,
    // Weak, so the task ends once every handle is gone.
    tx: mpsc::WeakUnboundedSender<EngineMsg>,
    attempt: u64,
    session: Option<Session>,
    queue: PlayQueue,
    sleep_deadline: Option<Instant>,
    state_tx: watch::Sender<PlaybackSnapshot>,
    queue_tx: watch::Sender<QueueSnapshot>,
    notices: mpsc::UnboundedSender<PlaybackNotice>,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl EngineActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineMsg>) {
        debug!("Playback engine started");
        loop {
            let msg = tokio::select! {
                biased;
                _ = sleep_until(self.sleep_deadline) => {
                    self.on_sleep_timer();
                    continue;
                }
                msg = rx.recv() => msg,
            };

            let Some(msg) = msg else { break };
            match msg {
                EngineMsg::Command(Command::Shutdown) => {
                    self.stop();
                    break;
                }
                EngineMsg::Command(command) => self.on_command(command),
                EngineMsg::Host { attempt, event } => self.on_host_event(attempt, event),
                EngineMsg::Synth { attempt, event } => self.on_synth_event(attempt, event),
                EngineMsg::Persisted { attempt, path } => self.on_persisted(attempt, path),
            }
            self.publish();
        }
        self.teardown();
        self.publish();
        debug!("Playback engine stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Start(text) => {
                self.end_queue_playback();
                self.start_session(text);
            }
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Stop => self.stop(),
            Command::Seek(position) => self.seek(position),
            Command::JumpForward(seconds) => self.jump(seconds),
            Command::JumpBackward(seconds) => self.jump(-seconds),
            Command::Replay => self.replay(),
            Command::ExportAudio(reply) => {
                let audio = self.session.as_ref().filter(|s| s.synthesis_done).map(Session::combined_audio);
                let _ = reply.send(audio);
            }
            Command::SetVoice(voice) => {
                info!("Voice set to {} ({}, rate {})", voice.voice, voice.format, voice.rate);
                self.config.voice = voice;
            }
            Command::AddToQueue(item) => {
                debug!("Queued \"{}\"", item.title);
                self.queue.add(item);
            }
            Command::RemoveQueueItem(index) => self.remove_queue_item(index),
            Command::MoveQueueItem { from, to } => {
                if !self.queue.move_item(from, to) {
                    warn!("Cannot move queue item {} to {} ({} items)", from, to, self.queue.len());
                }
            }
            Command::ClearQueue => {
                if self.queue.is_playing() {
                    self.stop();
                }
                self.queue.clear();
            }
            Command::SetLoop(enabled) => self.queue.set_loop(enabled),
            Command::PlayQueueFrom(index) => self.play_queue_from(index),
            Command::SetSleepTimer(after) => {
                info!("⏲️ Sleep timer set for {:?}", after);
                self.sleep_deadline = Some(Instant::now() + after);
            }
            Command::CancelSleepTimer => {
                if self.sleep_deadline.take().is_some() {
                    info!("Sleep timer cancelled");
                }
            }
            Command::Shutdown => {}
        }
    }

    // ── Session lifecycle ──────────────────────────────────────────

    fn start_session(&mut self, text: String) {
        self.teardown();
        self.attempt += 1;
        let attempt = self.attempt;

        let text = clean_text(&text);
        if text.is_empty() {
            warn!("Nothing to read (attempt {})", attempt);
            self.notify(PlaybackNotice::Error { attempt, message: SpeechError::NoReadableText.to_string() });
            self.end_queue_playback();
            return;
        }
        let Some(tx) = self.tx.upgrade() else { return };

        let voice = self.config.voice.clone();
        let format = voice.format;
        let mode = if self.config.streaming && self.host.supports_incremental(format) {
            PlaybackMode::Streaming
        } else {
            PlaybackMode::Batch
        };

        let pump = spawn_pump(Arc::clone(&self.backend), text, voice, self.config.max_chunk_bytes, attempt, tx.clone());
        let mut session = Session::new(attempt, mode, format, pump);

        if mode == PlaybackMode::Streaming {
            match self.host.open_stream(format, EventSink::new(attempt, tx)) {
                Ok(output) => session.output = Some(output),
                Err(e) => {
                    session.release();
                    self.fail(attempt, format!("Cannot open audio stream: {}", e));
                    return;
                }
            }
        }

        info!("▶️ Starting playback (attempt {}, {:?} mode, {})", attempt, mode, format);
        self.session = Some(session);
    }

    /// Release the session without notifying anyone.
    fn teardown(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        session.release();
        if let Some(path) = session.temp_file.take() {
            self.remove_temp_file(path);
        }
        true
    }

    fn stop(&mut self) {
        let was_active = self.teardown();
        let was_queued = self.queue.is_playing();
        // Invalidate anything still in flight for the old attempt.
        self.attempt += 1;
        self.end_queue_playback();
        if was_active || was_queued {
            info!("⏹️ Playback stopped");
            self.notify(PlaybackNotice::Stopped { attempt: self.attempt - 1 });
        }
    }

    /// Abort the current session after a fatal error.
    fn fail(&mut self, attempt: u64, message: String) {
        error!("Playback failed (attempt {}): {}", attempt, message);
        self.teardown();
        self.attempt += 1;
        self.end_queue_playback();
        self.notify(PlaybackNotice::Error { attempt, message });
    }

    fn current(&mut self, attempt: u64) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| s.attempt == attempt && attempt == self.attempt)
    }

    // ── Synthesis events ───────────────────────────────────────────

    fn on_synth_event(&mut self, attempt: u64, event: SynthEvent) {
        let Some(session) = self.current(attempt) else {
            debug!("Dropping stale synthesis event for attempt {}", attempt);
            return;
        };

        match event {
            SynthEvent::Data(bytes) => {
                if bytes.is_empty() {
                    return;
                }
                session.buffered_bytes += bytes.len();
                if session.mode == PlaybackMode::Streaming {
                    session.pending.push_back(bytes.clone());
                }
                session.accumulated.push(bytes);
                self.drain_pending();
            }
            SynthEvent::End => {
                session.synthesis_done = true;
                debug!("Synthesis complete ({} bytes)", session.buffered_bytes);
                let mode = session.mode;
                match mode {
                    PlaybackMode::Streaming => self.drain_pending(),
                    PlaybackMode::Batch => self.persist_batch(),
                }
            }
            SynthEvent::Error(message) => self.fail(attempt, format!("Speech synthesis failed: {}", message)),
        }
    }

    /// Issue the next append, or end the stream once everything is delivered.
    fn drain_pending(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        if session.mode != PlaybackMode::Streaming || !session.source_open || session.append_in_flight {
            return;
        }
        let attempt = session.attempt;

        if let Some(chunk) = session.pending.pop_front() {
            let Some(output) = session.output.as_mut() else { return };
            match output.append(chunk) {
                Ok(()) => session.append_in_flight = true,
                Err(e) => self.fail(attempt, format!("Audio append rejected: {}", e)),
            }
            return;
        }

        if session.ready_for_end_of_stream() {
            session.end_of_stream_sent = true;
            if let Some(output) = session.output.as_mut()
                && let Err(e) = output.end_of_stream()
            {
                warn!("Failed to signal end of stream: {}", e);
            }
            debug!("End of stream signalled (attempt {})", attempt);
        }
    }

    fn persist_batch(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        let attempt = session.attempt;
        if session.buffered_bytes == 0 {
            self.fail(attempt, "Speech synthesis produced no audio".to_string());
            return;
        }
        let Some(tx) = self.tx.upgrade() else { return };

        let bytes = session.combined_audio();
        let format = session.format;
        let storage = Arc::clone(&self.storage);
        tokio::spawn(async move {
            let path = storage.write_temp_file(&bytes, format).await;
            let _ = tx.send(EngineMsg::Persisted { attempt, path });
        });
    }

    fn on_persisted(&mut self, attempt: u64, path: Option<PathBuf>) {
        if self.current(attempt).is_none() {
            debug!("Dropping stale persistence result for attempt {}", attempt);
            if let Some(path) = path {
                self.remove_temp_file(path);
            }
            return;
        }

        match path {
            Some(path) => {
                if let Some(session) = self.session.as_mut() {
                    session.temp_file = Some(path.clone());
                }
                self.load(attempt, BatchStage::LoadingFile, SourceHandle::File(path));
            }
            None => {
                warn!("Could not persist audio, playing from memory");
                self.load_from_memory(attempt);
            }
        }
    }

    fn load_from_memory(&mut self, attempt: u64) {
        let Some(session) = self.session.as_ref() else { return };
        let bytes = Arc::new(session.combined_audio());
        self.load(attempt, BatchStage::LoadingMemory, SourceHandle::Memory(bytes));
    }

    fn load(&mut self, attempt: u64, stage: BatchStage, source: SourceHandle) {
        let Some(tx) = self.tx.upgrade() else { return };
        let Some(session) = self.session.as_mut() else { return };
        if let Some(mut previous) = session.output.take() {
            previous.release();
        }
        session.batch_stage = stage;

        match self.host.load_source(source, session.format, EventSink::new(attempt, tx)) {
            Ok(output) => session.output = Some(output),
            Err(e) => self.on_load_failed(attempt, e.to_string()),
        }
    }

    fn on_load_failed(&mut self, attempt: u64, message: String) {
        let Some(stage) = self.session.as_ref().map(|s| s.batch_stage) else { return };
        match stage {
            BatchStage::LoadingFile => {
                warn!("Failed to load audio file ({}), playing from memory", message);
                self.load_from_memory(attempt);
            }
            _ => self.fail(attempt, SpeechError::Playback(message).to_string()),
        }
    }

    // ── Host events ────────────────────────────────────────────────

    fn on_host_event(&mut self, attempt: u64, event: HostEvent) {
        let Some(session) = self.current(attempt) else {
            debug!("Dropping stale host event {:?} for attempt {}", event, attempt);
            return;
        };

        match event {
            HostEvent::SourceOpen => {
                session.source_open = true;
                self.drain_pending();
            }
            HostEvent::AppendComplete => {
                session.append_in_flight = false;
                self.drain_pending();
            }
            HostEvent::AppendFailed(e) => self.fail(attempt, format!("Audio append failed: {}", e)),
            HostEvent::PlayableRange => {
                if session.state == PlaybackState::Loading {
                    self.begin_rendering(attempt);
                }
            }
            HostEvent::LoadReady { duration } => {
                session.duration = duration;
                session.batch_stage = BatchStage::Loaded;
                if session.state == PlaybackState::Loading {
                    self.begin_rendering(attempt);
                }
            }
            HostEvent::LoadFailed(message) => self.on_load_failed(attempt, message),
            HostEvent::TimeUpdate { current, duration } => {
                session.current_time = current;
                if duration.is_finite() {
                    session.duration = duration;
                }
            }
            HostEvent::Ended => self.on_ended(attempt),
            HostEvent::Error(message) => self.fail(attempt, message),
        }
    }

    fn begin_rendering(&mut self, attempt: u64) {
        let Some(session) = self.session.as_mut() else { return };
        if session.pause_requested {
            session.state = PlaybackState::Paused;
            debug!("First audio ready while paused (attempt {})", attempt);
            return;
        }
        self.play(attempt);
    }

    fn play(&mut self, attempt: u64) {
        let Some(session) = self.session.as_mut() else { return };
        let Some(output) = session.output.as_mut() else { return };
        if let Err(e) = output.play() {
            self.fail(attempt, format!("Cannot start playback: {}", e));
            return;
        }
        session.state = PlaybackState::Playing;
        session.pause_requested = false;
        if !session.announced {
            session.announced = true;
            let mode = session.mode;
            info!("🔊 Playing (attempt {})", attempt);
            self.notify(PlaybackNotice::Started { attempt, mode });
        }
    }

    fn on_ended(&mut self, attempt: u64) {
        let Some(session) = self.session.as_mut() else { return };
        if session.state == PlaybackState::Ended {
            return;
        }
        session.state = PlaybackState::Ended;
        if session.duration.is_finite() {
            session.current_time = session.duration;
        } else {
            session.duration = session.current_time;
        }
        info!("✅ Playback finished (attempt {})", attempt);
        self.notify(PlaybackNotice::Ended { attempt });

        if self.queue.is_playing() {
            match self.queue.advance().map(|item| item.text.clone()) {
                Some(text) => {
                    debug!("Advancing queue to item {:?}", self.queue.current_index());
                    self.start_session(text);
                }
                None => info!("Queue finished"),
            }
        }
    }

    // ── Transport ──────────────────────────────────────────────────

    fn pause(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        let state = session.state;
        match state {
            PlaybackState::Loading => session.pause_requested = true,
            PlaybackState::Playing => {
                let attempt = session.attempt;
                if let Some(output) = session.output.as_mut()
                    && let Err(e) = output.pause()
                {
                    self.fail(attempt, format!("Cannot pause: {}", e));
                    return;
                }
                session.state = PlaybackState::Paused;
                debug!("Paused at {:.1}s", session.current_time);
            }
            _ => {}
        }
    }

    fn resume(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        let state = session.state;
        match state {
            PlaybackState::Loading => session.pause_requested = false,
            PlaybackState::Paused => {
                let attempt = session.attempt;
                self.play(attempt);
            }
            _ => {}
        }
    }

    fn seek(&mut self, position: f64) {
        let Some(session) = self.session.as_mut() else { return };
        if !session.has_finite_duration() || !position.is_finite() {
            debug!("Seek ignored: duration unknown");
            return;
        }
        let target = position.clamp(0.0, session.duration);
        let attempt = session.attempt;
        let Some(output) = session.output.as_mut() else { return };
        match output.seek(target) {
            Ok(()) => session.current_time = target,
            Err(e) => self.fail(attempt, format!("Cannot seek: {}", e)),
        }
    }

    fn jump(&mut self, delta: f64) {
        if let Some(session) = self.session.as_ref() {
            let target = session.current_time + delta;
            self.seek(target);
        }
    }

    fn replay(&mut self) {
        let replayable = self
            .session
            .as_ref()
            .is_some_and(|s| s.has_finite_duration() && s.output.is_some() && s.state != PlaybackState::Loading);
        if !replayable {
            self.stop();
            return;
        }

        let Some(session) = self.session.as_mut() else { return };
        let attempt = session.attempt;
        if let Some(output) = session.output.as_mut()
            && let Err(e) = output.seek(0.0)
        {
            self.fail(attempt, format!("Cannot replay: {}", e));
            return;
        }
        session.current_time = 0.0;
        info!("🔁 Replaying (attempt {})", attempt);
        self.play(attempt);
    }

    // ── Queue ──────────────────────────────────────────────────────

    fn play_queue_from(&mut self, index: usize) {
        match self.queue.start_at(index).map(|item| item.text.clone()) {
            Some(text) => {
                info!("📜 Playing queue from item {} of {}", index + 1, self.queue.len());
                self.start_session(text);
            }
            None => warn!("Queue has no item {} ({} items)", index, self.queue.len()),
        }
    }

    fn remove_queue_item(&mut self, index: usize) {
        match self.queue.remove(index) {
            Removal::Missing => warn!("Cannot remove queue item {} ({} items)", index, self.queue.len()),
            Removal::Other => {}
            Removal::CurrentReplaced(next) => {
                let text = self.queue.current_item().map(|item| item.text.clone());
                if let Some(text) = text {
                    debug!("Removed playing item, continuing with item {}", next);
                    self.start_session(text);
                }
            }
            Removal::CurrentWasLast => {
                self.teardown();
                self.attempt += 1;
                self.notify(PlaybackNotice::Stopped { attempt: self.attempt - 1 });
            }
        }
    }

    fn end_queue_playback(&mut self) {
        if self.queue.is_playing() {
            self.queue.finish();
        }
    }

    // ── Sleep timer ────────────────────────────────────────────────

    fn on_sleep_timer(&mut self) {
        self.sleep_deadline = None;
        info!("😴 Sleep timer expired");
        self.stop();
        self.notify(PlaybackNotice::SleepTimerExpired);
        self.publish();
    }

    // ── Output ─────────────────────────────────────────────────────

    fn remove_temp_file(&self, path: PathBuf) {
        let storage = Arc::clone(&self.storage);
        tokio::spawn(async move { storage.remove_temp_file(&path).await });
    }

    fn notify(&self, notice: PlaybackNotice) {
        let _ = self.notices.send(notice);
    }

    fn publish(&self) {
        let snapshot = match self.session.as_ref() {
            Some(session) => session.snapshot(),
            None => PlaybackSnapshot { attempt: self.attempt, ..Default::default() },
        };
        self.state_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });

        let queue = self.queue.snapshot();
        self.queue_tx.send_if_modified(|current| {
            if *current == queue {
                false
            } else {
                *current = queue;
                true
            }
        });
    }
}

/// Synthesize `text` chunk by chunk and forward the audio as one stream.
fn spawn_pump(
    backend: Arc<dyn SynthesisBackend>,
    text: String,
    voice: VoiceSettings,
    max_chunk_bytes: usize,
    attempt: u64,
    tx: mpsc::UnboundedSender<EngineMsg>,
) -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        let send = |event: SynthEvent| tx.send(EngineMsg::Synth { attempt, event }).is_ok();
        let chunks = chunker::split(&text, max_chunk_bytes);
        let total = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            debug!("Requesting chunk {}/{} from {} ({} bytes)", index + 1, total, backend.name(), chunk.len());
            let request = SynthRequest::new(chunk, voice.clone());
            let opened = tokio::select! {
                _ = token.cancelled() => return,
                opened = backend.open_stream(request) => opened,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(e) => {
                    send(SynthEvent::Error(e.to_string()));
                    return;
                }
            };

            loop {
                let event = tokio::select! {
                    // Dropping the stream abandons the request.
                    _ = token.cancelled() => return,
                    event = stream.next_event() => event,
                };
                match event {
                    SynthEvent::Data(bytes) => {
                        if !send(SynthEvent::Data(bytes)) {
                            return;
                        }
                    }
                    SynthEvent::End => break,
                    SynthEvent::Error(message) => {
                        send(SynthEvent::Error(message));
                        return;
                    }
                }
            }
        }
        send(SynthEvent::End);
    });

    cancel
}
