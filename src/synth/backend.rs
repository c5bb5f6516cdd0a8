//! Backend-agnostic synthesis interface.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::VoiceSettings;
use crate::error::SpeechError;

/// One synthesis request: a text chunk within the backend's size limit.
#[derive(Debug, Clone)]
pub struct SynthRequest {
    pub text: String,
    pub voice: VoiceSettings,
}

impl SynthRequest {
    pub fn new(text: impl Into<String>, voice: VoiceSettings) -> Self {
        Self { text: text.into(), voice }
    }
}

/// Event produced by an open synthesis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthEvent {
    /// Next encoded audio chunk, in playback order.
    Data(Vec<u8>),
    /// The request finished successfully.
    End,
    /// The request failed; no further events follow.
    Error(String),
}

/// Text-to-speech engine that streams encoded audio.
///
/// Implementations must be `Send + Sync`: the same backend is shared by the
/// playback engine, the generation pipeline and the task queue worker.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Open a request and return its event stream.
    ///
    /// Errors returned here mean the request never started; failures after
    /// that arrive as [`SynthEvent::Error`].
    async fn open_stream(&self, request: SynthRequest) -> Result<SynthStream, SpeechError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Receiving half of a synthesis request.
///
/// Dropping the stream (or calling [`SynthStream::cancel`]) abandons the
/// request so the producer can release its network or engine resources.
pub struct SynthStream {
    rx: mpsc::Receiver<SynthEvent>,
    cancel: CancellationToken,
}

/// Producing half of a synthesis request, held by backend implementations.
#[derive(Clone)]
pub struct SynthSender {
    tx: mpsc::Sender<SynthEvent>,
    cancel: CancellationToken,
}

impl SynthStream {
    /// Create a connected sender/stream pair with a bounded buffer.
    pub fn channel(capacity: usize) -> (SynthSender, SynthStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        (SynthSender { tx, cancel: cancel.clone() }, SynthStream { rx, cancel })
    }

    /// Wait for the next event.
    ///
    /// A producer that disappears without sending `End` is reported as an error.
    pub async fn next_event(&mut self) -> SynthEvent {
        match self.rx.recv().await {
            Some(event) => event,
            None => SynthEvent::Error("synthesis stream closed before completion".to_string()),
        }
    }

    /// Abandon the request.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SynthStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SynthSender {
    /// Send an event, waiting for buffer space. Returns `false` once the
    /// consumer has gone away.
    pub async fn send(&self, event: SynthEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(event).await.is_ok()
    }

    /// Blocking variant for producers running on a blocking thread.
    pub fn blocking_send(&self, event: SynthEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.blocking_send(event).is_ok()
    }

    /// Whether the consumer abandoned the request.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the consumer abandons the request.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_producer_reports_error() {
        let (tx, mut stream) = SynthStream::channel(4);
        assert!(tx.send(SynthEvent::Data(vec![1, 2])).await);
        drop(tx);

        assert_eq!(stream.next_event().await, SynthEvent::Data(vec![1, 2]));
        assert!(matches!(stream.next_event().await, SynthEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_producer() {
        let (tx, stream) = SynthStream::channel(4);
        assert!(!tx.is_cancelled());
        drop(stream);
        assert!(tx.is_cancelled());
        assert!(!tx.send(SynthEvent::End).await);
    }
}
