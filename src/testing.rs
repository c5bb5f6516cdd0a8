//! Test doubles shared by unit tests across the crate.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::error::{MediaError, SpeechError};
use crate::playback::{AudioHost, EngineMsg, EventSink, HostEvent, MediaOutput, PlaybackNotice, SourceHandle};
use crate::storage::HostStorage;
use crate::synth::{AudioFormat, SynthEvent, SynthRequest, SynthStream, SynthesisBackend};

// ── Synthesis ──────────────────────────────────────────────────────

/// What the scripted backend does with one request.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these chunks, then end.
    Chunks(Vec<Vec<u8>>),
    /// Wait, then stream the chunks.
    Delayed(Duration, Vec<Vec<u8>>),
    /// Send one chunk, then fail.
    FailAfter(Vec<u8>, String),
    /// Fail the stream immediately.
    Fail(String),
    /// Refuse to open the request.
    Refuse(String),
    /// Never answer; keeps the request open until it is abandoned.
    Hang,
}

/// Backend answering each request with the next script.
///
/// With no script left, a request streams its own text as the audio bytes.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<SynthRequest>>,
    abandoned: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self { scripts: Mutex::new(scripts.into_iter().collect()), ..Default::default() })
    }

    pub fn echo() -> Arc<Self> {
        Self::new([])
    }

    pub fn requests(&self) -> Vec<SynthRequest> {
        self.requests.lock().clone()
    }

    /// Hanging requests whose consumer went away.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisBackend for ScriptedBackend {
    async fn open_stream(&self, request: SynthRequest) -> Result<SynthStream, SpeechError> {
        self.requests.lock().push(request.clone());
        let script = self.scripts.lock().pop_front().unwrap_or_else(|| Script::Chunks(vec![request.text.clone().into_bytes()]));

        let (tx, stream) = SynthStream::channel(16);
        match script {
            Script::Refuse(message) => return Err(SpeechError::synthesis(message)),
            Script::Hang => {
                let abandoned = Arc::clone(&self.abandoned);
                tokio::spawn(async move {
                    tx.cancelled().await;
                    abandoned.fetch_add(1, Ordering::SeqCst);
                });
            }
            script => {
                tokio::spawn(async move {
                    let (delay, chunks, failure) = match script {
                        Script::Chunks(chunks) => (None, chunks, None),
                        Script::Delayed(delay, chunks) => (Some(delay), chunks, None),
                        Script::FailAfter(chunk, message) => (None, vec![chunk], Some(message)),
                        Script::Fail(message) => (None, Vec::new(), Some(message)),
                        Script::Refuse(_) | Script::Hang => unreachable!(),
                    };
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    for chunk in chunks {
                        if !tx.send(SynthEvent::Data(chunk)).await {
                            return;
                        }
                    }
                    match failure {
                        Some(message) => tx.send(SynthEvent::Error(message)).await,
                        None => tx.send(SynthEvent::End).await,
                    };
                });
            }
        }
        Ok(stream)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ── Audio host ─────────────────────────────────────────────────────

/// Call made on a fake output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCall {
    Append(Vec<u8>),
    EndOfStream,
    Play,
    Pause,
    Seek(f64),
    Release,
}

/// Kind of source behind a fake output.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    Stream,
    File(PathBuf),
    Memory(usize),
}

/// An output handed to the engine, with its sink and call log.
#[derive(Clone)]
pub struct OutputRecord {
    pub kind: SourceKind,
    pub sink: EventSink,
    calls: Arc<Mutex<Vec<OutputCall>>>,
}

impl OutputRecord {
    pub fn calls(&self) -> Vec<OutputCall> {
        self.calls.lock().clone()
    }

    pub fn appended(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                OutputCall::Append(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &OutputCall) -> usize {
        self.calls.lock().iter().filter(|call| *call == wanted).count()
    }

    pub fn emit(&self, event: HostEvent) {
        self.sink.emit(event);
    }
}

struct FakeOutput {
    calls: Arc<Mutex<Vec<OutputCall>>>,
    /// Appends beyond this many bytes are rejected.
    capacity: Option<usize>,
    appended_bytes: usize,
}

impl FakeOutput {
    fn record(&self, call: OutputCall) {
        self.calls.lock().push(call);
    }
}

impl MediaOutput for FakeOutput {
    fn append(&mut self, bytes: Vec<u8>) -> Result<(), MediaError> {
        if let Some(capacity) = self.capacity
            && self.appended_bytes + bytes.len() > capacity
        {
            return Err(MediaError::CapacityExceeded);
        }
        self.appended_bytes += bytes.len();
        self.record(OutputCall::Append(bytes));
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<(), MediaError> {
        self.record(OutputCall::EndOfStream);
        Ok(())
    }

    fn play(&mut self) -> Result<(), MediaError> {
        self.record(OutputCall::Play);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), MediaError> {
        self.record(OutputCall::Pause);
        Ok(())
    }

    fn seek(&mut self, position: f64) -> Result<(), MediaError> {
        self.record(OutputCall::Seek(position));
        Ok(())
    }

    fn release(&mut self) {
        self.record(OutputCall::Release);
    }
}

/// Host whose outputs only record calls; tests drive events by hand.
///
/// Batch loads answer on their own: `LoadReady` with [`FakeHost::LOADED_DURATION`],
/// or `LoadFailed` for the source kinds configured to fail.
#[derive(Default)]
pub struct FakeHost {
    incremental: bool,
    capacity: Option<usize>,
    fail_file_loads: bool,
    fail_memory_loads: bool,
    outputs: Mutex<Vec<OutputRecord>>,
}

impl FakeHost {
    pub const LOADED_DURATION: f64 = 12.5;

    pub fn streaming() -> Self {
        Self { incremental: true, ..Default::default() }
    }

    pub fn batch() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, bytes: usize) -> Self {
        self.capacity = Some(bytes);
        self
    }

    pub fn failing_file_loads(mut self) -> Self {
        self.fail_file_loads = true;
        self
    }

    pub fn failing_memory_loads(mut self) -> Self {
        self.fail_memory_loads = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn outputs(&self) -> Vec<OutputRecord> {
        self.outputs.lock().clone()
    }

    pub fn output(&self, index: usize) -> OutputRecord {
        self.outputs.lock()[index].clone()
    }

    fn register(&self, kind: SourceKind, sink: EventSink) -> Box<dyn MediaOutput> {
        let calls = Arc::new(Mutex::new(Vec::new()));
        self.outputs.lock().push(OutputRecord { kind, sink, calls: Arc::clone(&calls) });
        Box::new(FakeOutput { calls, capacity: self.capacity, appended_bytes: 0 })
    }
}

impl AudioHost for FakeHost {
    fn supports_incremental(&self, _format: AudioFormat) -> bool {
        self.incremental
    }

    fn open_stream(&self, _format: AudioFormat, sink: EventSink) -> Result<Box<dyn MediaOutput>, MediaError> {
        Ok(self.register(SourceKind::Stream, sink))
    }

    fn load_source(&self, source: SourceHandle, _format: AudioFormat, sink: EventSink) -> Result<Box<dyn MediaOutput>, MediaError> {
        let (kind, fails) = match source {
            SourceHandle::File(path) => (SourceKind::File(path), self.fail_file_loads),
            SourceHandle::Memory(bytes) => (SourceKind::Memory(bytes.len()), self.fail_memory_loads),
        };
        if fails {
            sink.emit(HostEvent::LoadFailed("unsupported source".to_string()));
        } else {
            sink.emit(HostEvent::LoadReady { duration: Self::LOADED_DURATION });
        }
        Ok(self.register(kind, sink))
    }
}

// ── Storage ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStorage {
    fail_writes: bool,
    write_delay: Option<Duration>,
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    written: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { fail_writes: true, ..Default::default() })
    }

    /// Storage whose writes complete only after `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self { write_delay: Some(delay), ..Default::default() })
    }

    pub fn files(&self) -> HashMap<PathBuf, Vec<u8>> {
        self.files.lock().clone()
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostStorage for MemoryStorage {
    async fn write_temp_file(&self, bytes: &[u8], format: AudioFormat) -> Option<PathBuf> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes {
            return None;
        }
        let index = self.written.fetch_add(1, Ordering::SeqCst);
        let path = PathBuf::from(format!("/tmp/fake-{}.{}", index, format.extension()));
        self.files.lock().insert(path.clone(), bytes.to_vec());
        Some(path)
    }

    async fn remove_temp_file(&self, path: &Path) {
        self.files.lock().remove(path);
    }
}

// ── Helpers ────────────────────────────────────────────────────────

const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Poll `condition` until it holds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let start = tokio::time::Instant::now();
    while !condition() {
        assert!(start.elapsed() < WAIT_LIMIT, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Wait until a watch value satisfies `condition` and return it.
pub async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, condition: impl FnMut(&T) -> bool) -> T {
    tokio::time::timeout(WAIT_LIMIT, rx.wait_for(condition))
        .await
        .expect("timed out waiting for state")
        .expect("watch channel closed")
        .clone()
}

/// Next notice, failing the test if none arrives.
pub async fn next_notice(rx: &mut mpsc::UnboundedReceiver<PlaybackNotice>) -> PlaybackNotice {
    tokio::time::timeout(WAIT_LIMIT, rx.recv()).await.expect("timed out waiting for notice").expect("notice channel closed")
}

/// A standalone sink and the receiver of what it emits.
pub fn sink_pair(attempt: u64) -> (EventSink, mpsc::UnboundedReceiver<EngineMsg>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink::new(attempt, tx), rx)
}

/// Wait for the next host event on a [`sink_pair`] receiver.
pub async fn next_host_event(rx: &mut mpsc::UnboundedReceiver<EngineMsg>) -> HostEvent {
    loop {
        let msg = tokio::time::timeout(WAIT_LIMIT, rx.recv()).await.expect("timed out waiting for host event").expect("sink closed");
        if let EngineMsg::Host { event, .. } = msg {
            return event;
        }
    }
}

/// Host events received on a [`sink_pair`] receiver so far.
pub fn drain_host_events(rx: &mut mpsc::UnboundedReceiver<EngineMsg>) -> Vec<HostEvent> {
    let mut events = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let EngineMsg::Host { event, .. } = msg {
            events.push(event);
        }
    }
    events
}
