use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

use super::{CallFailure, Diarizer, RetryPolicy, with_retries};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{DiarizationTurn, seconds_to_ms};

/// Reads diarization from an RTTM file next to the audio (`<stem>.rttm`),
/// or in a separate sidecar directory
#[derive(Debug, Clone, Default)]
pub struct RttmDiarizer {
    pub sidecar_dir: Option<PathBuf>,
}

impl RttmDiarizer {
    pub fn new(sidecar_dir: Option<PathBuf>) -> Self {
        Self { sidecar_dir }
    }

    pub fn sidecar_path(&self, audio: &Path) -> PathBuf {
        let file_name = audio
            .with_extension("rttm")
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        match &self.sidecar_dir {
            Some(dir) => dir.join(file_name),
            None => audio.with_extension("rttm"),
        }
    }
}

#[async_trait]
impl Diarizer for RttmDiarizer {
    async fn diarize(&self, audio: &Path) -> PipelineResult<Vec<DiarizationTurn>> {
        let path = self.sidecar_path(audio);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            PipelineError::diarization(format!("no readable RTTM at {:?}: {}", path, e))
        })?;
        let turns = parse_rttm(&content).map_err(PipelineError::diarization)?;
        debug!("Loaded {} diarization turns from {:?}", turns.len(), path);
        Ok(turns)
    }
}

/// Parse `SPEAKER <file> <chan> <start> <dur> <NA> <NA> <label> ...` lines.
/// Other record types and blank lines are skipped.
pub fn parse_rttm(content: &str) -> Result<Vec<DiarizationTurn>, String> {
    let mut turns = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() != Some(&"SPEAKER") {
            continue;
        }
        if fields.len() < 8 {
            return Err(format!("line {}: expected at least 8 fields", idx + 1));
        }
        let start: f64 = fields[3]
            .parse()
            .map_err(|_| format!("line {}: bad start time {:?}", idx + 1, fields[3]))?;
        let duration: f64 = fields[4]
            .parse()
            .map_err(|_| format!("line {}: bad duration {:?}", idx + 1, fields[4]))?;

        let start_ms = seconds_to_ms(start);
        turns.push(DiarizationTurn::new(
            fields[7],
            start_ms,
            start_ms + seconds_to_ms(duration),
        ));
    }

    turns.sort_by(|a, b| a.start_ms.cmp(&b.start_ms).then(a.end_ms.cmp(&b.end_ms)));
    Ok(turns)
}

/// Configuration for a hosted diarization endpoint
#[derive(Debug, Clone)]
pub struct HttpDiarizerConfig {
    pub endpoint: String,
    /// Bearer token (from HUGGING_FACE_TOKEN env var)
    pub token: String,
    pub retry: RetryPolicy,
}

impl HttpDiarizerConfig {
    pub fn from_env(endpoint: String) -> PipelineResult<Self> {
        let token = std::env::var("HUGGING_FACE_TOKEN").map_err(|_| {
            PipelineError::Configuration(
                "HUGGING_FACE_TOKEN environment variable not set".to_string(),
            )
        })?;
        Ok(Self {
            endpoint,
            token,
            retry: RetryPolicy::default(),
        })
    }
}

/// Diarization over HTTP: posts the audio, expects
/// `{"segments": [{"speaker", "start", "end"}]}` back
pub struct HttpDiarizer {
    client: Client,
    config: HttpDiarizerConfig,
}

impl HttpDiarizer {
    pub fn new(config: HttpDiarizerConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn send(&self, bytes: Vec<u8>, file_name: &str) -> Result<Vec<DiarizationTurn>, CallFailure> {
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.to_string()));

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CallFailure::retryable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CallFailure::from_status(status, &body));
        }

        let body: DiarizationResponse = response
            .json()
            .await
            .map_err(|e| CallFailure::fatal(format!("failed to parse response: {}", e)))?;
        Ok(body.into_turns())
    }
}

#[async_trait]
impl Diarizer for HttpDiarizer {
    async fn diarize(&self, audio: &Path) -> PipelineResult<Vec<DiarizationTurn>> {
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        info!("Diarizing {} via {}", file_name, self.config.endpoint);
        with_retries("diarization", &self.config.retry, || {
            self.send(bytes.clone(), &file_name)
        })
        .await
        .map_err(|f| PipelineError::diarization(f.message))
    }
}

#[derive(Debug, Deserialize)]
struct DiarizationResponse {
    #[serde(default)]
    segments: Vec<DiarizationSegment>,
}

#[derive(Debug, Deserialize)]
struct DiarizationSegment {
    speaker: String,
    start: f64,
    end: f64,
}

impl DiarizationResponse {
    fn into_turns(self) -> Vec<DiarizationTurn> {
        let mut turns: Vec<DiarizationTurn> = self
            .segments
            .into_iter()
            .map(|s| DiarizationTurn::new(s.speaker, seconds_to_ms(s.start), seconds_to_ms(s.end)))
            .collect();
        turns.sort_by_key(|t| t.start_ms);
        turns
    }
}
