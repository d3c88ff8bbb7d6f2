use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

use super::{CallFailure, RetryPolicy, Transcriber, with_retries};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{TranscribedSpan, TranscriptionParams, seconds_to_ms};

/// Configuration for the Whisper transcription client
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// API key (from OPENAI_API_KEY env var)
    pub api_key: String,
    /// API root, without trailing slash
    pub base_url: String,
    pub retry: RetryPolicy,
}

impl WhisperConfig {
    /// Create config from environment variables
    pub fn from_env() -> PipelineResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            PipelineError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(api_key))
    }

    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// OpenAI Whisper client
pub struct WhisperClient {
    client: Client,
    config: WhisperConfig,
}

impl WhisperClient {
    pub fn new(config: WhisperConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn send(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        params: &TranscriptionParams,
    ) -> Result<Vec<TranscribedSpan>, CallFailure> {
        let part = Part::bytes(bytes).file_name(file_name.to_string());
        let mut form = Form::new()
            .part("file", part)
            .text("model", params.model.clone())
            .text("response_format", "verbose_json")
            .text("temperature", params.temperature.to_string());
        if let Some(language) = &params.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CallFailure::retryable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CallFailure::from_status(status, &body));
        }

        let body: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| CallFailure::fatal(format!("failed to parse response: {}", e)))?;
        Ok(body.into_spans())
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(
        &self,
        audio: &Path,
        params: &TranscriptionParams,
    ) -> PipelineResult<Vec<TranscribedSpan>> {
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        info!("Transcribing {} with {}", file_name, params.model);
        let spans = with_retries("transcription", &self.config.retry, || {
            self.send(bytes.clone(), &file_name, params)
        })
        .await
        .map_err(|f| PipelineError::transcription(f.message))?;

        debug!("Received {} transcription spans", spans.len());
        Ok(spans)
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

impl VerboseTranscription {
    /// Segment list, or one span covering the whole text when the service
    /// returned no segments
    fn into_spans(self) -> Vec<TranscribedSpan> {
        if self.segments.is_empty() {
            let text = self.text.trim();
            if text.is_empty() {
                return vec![];
            }
            let end_ms = (text.len() as u64 / 2).max(1) * 1000;
            return vec![TranscribedSpan::new(0, end_ms, text)];
        }

        self.segments
            .into_iter()
            .map(|s| {
                TranscribedSpan::new(
                    seconds_to_ms(s.start),
                    seconds_to_ms(s.end),
                    s.text.trim().to_string(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_json_segments() {
        let json = r#"{
            "text": "Hello there. Hi.",
            "segments": [
                {"id": 0, "start": 0.0, "end": 1.52, "text": " Hello there."},
                {"id": 1, "start": 1.52, "end": 2.0, "text": " Hi."}
            ]
        }"#;
        let body: VerboseTranscription = serde_json::from_str(json).unwrap();
        let spans = body.into_spans();

        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0], TranscribedSpan::new(0, 1520, "Hello there."));
        assert_eq!(spans[1].start_ms, 1520);
    }

    #[test]
    fn test_text_only_response_becomes_one_span() {
        let body: VerboseTranscription =
            serde_json::from_str(r#"{"text": "just some words here"}"#).unwrap();
        let spans = body.into_spans();

        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_ms, 0);
        assert_eq!(spans[0].end_ms, 10_000);
    }

    #[test]
    fn test_empty_response() {
        let body: VerboseTranscription = serde_json::from_str(r#"{"text": "  "}"#).unwrap();
        assert!(body.into_spans().is_empty());
    }
}
