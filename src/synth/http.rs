//! Synthesis through an OpenAI-compatible `/v1/audio/speech` endpoint.
//!
//! The response body is streamed as it arrives, so playback can start on the
//! first bytes of a long answer.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tracing::{debug, error};

use super::{SynthEvent, SynthRequest, SynthSender, SynthStream, SynthesisBackend};
use crate::error::SpeechError;

/// Network chunks buffered ahead of the consumer.
const STREAM_BUFFER: usize = 32;

/// Connection settings for an HTTP speech service.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL, e.g. `http://localhost:8880`.
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model name sent with every request (e.g. `kokoro`, `tts-1`).
    pub model: String,
    pub connect_timeout: Duration,
}

/// Streaming client for OpenAI-style speech endpoints.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpBackend {
    pub fn new(config: &HttpConfig) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder().connect_timeout(config.connect_timeout).build()?;
        Ok(Self {
            client,
            endpoint: speech_endpoint(&config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

/// Accept either a base URL or the full endpoint.
fn speech_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/audio/speech") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{}/audio/speech", base)
    } else {
        format!("{}/v1/audio/speech", base)
    }
}

#[async_trait]
impl SynthesisBackend for HttpBackend {
    async fn open_stream(&self, request: SynthRequest) -> Result<SynthStream, SpeechError> {
        let body = json!({
            "model": self.model,
            "input": request.text,
            "voice": request.voice.voice,
            "response_format": request.voice.format.api_name(),
            "speed": request.voice.rate,
        });

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        debug!("POST {} ({} bytes of text)", self.endpoint, request.text.len());
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!("TTS API error ({}): {}", status, detail);
            return Err(SpeechError::synthesis(format!("API error ({}): {}", status, detail)));
        }

        let (tx, stream) = SynthStream::channel(STREAM_BUFFER);
        tokio::spawn(forward_body(response, tx));
        Ok(stream)
    }

    fn name(&self) -> &str {
        "http"
    }
}

async fn forward_body(response: reqwest::Response, tx: SynthSender) {
    let mut body = response.bytes_stream();
    loop {
        let item = tokio::select! {
            _ = tx.cancelled() => {
                debug!("HTTP synthesis request abandoned");
                return;
            }
            item = body.next() => item,
        };

        match item {
            Some(Ok(bytes)) => {
                if bytes.is_empty() {
                    continue;
                }
                if !tx.send(SynthEvent::Data(bytes.to_vec())).await {
                    return;
                }
            }
            Some(Err(e)) => {
                tx.send(SynthEvent::Error(format!("Error reading speech stream: {}", e))).await;
                return;
            }
            None => {
                tx.send(SynthEvent::End).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_endpoint_forms() {
        assert_eq!(speech_endpoint("http://localhost:8880"), "http://localhost:8880/v1/audio/speech");
        assert_eq!(speech_endpoint("http://localhost:8880/"), "http://localhost:8880/v1/audio/speech");
        assert_eq!(speech_endpoint("https://api.example.com/v1"), "https://api.example.com/v1/audio/speech");
        assert_eq!(speech_endpoint("http://h/v1/audio/speech"), "http://h/v1/audio/speech");
    }
}
