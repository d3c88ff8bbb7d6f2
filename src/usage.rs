//! Process-scoped usage and cost accounting.
//!
//! A `UsageLedger` is created by the caller and handed to the stage runner and
//! batch scheduler through `PipelineContext`, so each run (or test) owns its
//! own counters. An optional `UsageLog` also appends one JSON line per
//! external call, kept across runs.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PipelineError, PipelineResult};

/// File name of the persistent usage log inside an output directory
pub const USAGE_LOG_FILE: &str = "usage_log.jsonl";

/// Prices used for the cost estimate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pricing {
    /// USD per minute of transcribed audio
    pub transcription_per_minute: f64,
    /// USD per million LLM input tokens
    pub llm_input_per_million: f64,
    /// USD per million LLM output tokens
    pub llm_output_per_million: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            transcription_per_minute: 0.006,
            llm_input_per_million: 3.0,
            llm_output_per_million: 15.0,
        }
    }
}

/// Atomic counters shared by all workers of a run
#[derive(Debug, Default)]
pub struct UsageLedger {
    diarization_calls: AtomicU64,
    transcription_calls: AtomicU64,
    resolver_calls: AtomicU64,
    cache_hits: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    audio_ms: AtomicU64,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_diarization(&self) {
        self.diarization_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transcription(&self, audio_ms: u64) {
        self.transcription_calls.fetch_add(1, Ordering::Relaxed);
        self.audio_ms.fetch_add(audio_ms, Ordering::Relaxed);
    }

    pub fn record_resolver(&self, input_tokens: u64, output_tokens: u64) {
        self.resolver_calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(output_tokens, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            diarization_calls: self.diarization_calls.load(Ordering::Relaxed),
            transcription_calls: self.transcription_calls.load(Ordering::Relaxed),
            resolver_calls: self.resolver_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            audio_seconds: self.audio_ms.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Point-in-time copy of a ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub diarization_calls: u64,
    pub transcription_calls: u64,
    pub resolver_calls: u64,
    pub cache_hits: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub audio_seconds: f64,
}

impl UsageSnapshot {
    /// Total external calls made
    pub fn external_calls(&self) -> u64 {
        self.diarization_calls + self.transcription_calls + self.resolver_calls
    }

    pub fn estimated_cost_usd(&self, pricing: &Pricing) -> f64 {
        let transcription = self.audio_seconds / 60.0 * pricing.transcription_per_minute;
        let input = self.input_tokens as f64 / 1_000_000.0 * pricing.llm_input_per_million;
        let output = self.output_tokens as f64 / 1_000_000.0 * pricing.llm_output_per_million;
        transcription + input + output
    }
}

/// External service a usage record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Diarization,
    Transcription,
    Resolver,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Service::Diarization => write!(f, "diarization"),
            Service::Transcription => write!(f, "transcription"),
            Service::Resolver => write!(f, "resolver"),
        }
    }
}

/// One external call, as stored in the usage log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub audio_file: String,
    pub service: Service,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub audio_seconds: f64,
    pub success: bool,
    pub cost_usd: f64,
}

impl UsageRecord {
    pub fn new(service: Service, audio_file: impl Into<String>, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            audio_file: audio_file.into(),
            service,
            model: None,
            input_tokens: 0,
            output_tokens: 0,
            audio_seconds: 0.0,
            success,
            cost_usd: 0.0,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tokens(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn with_audio_ms(mut self, audio_ms: u64) -> Self {
        self.audio_seconds = audio_ms as f64 / 1000.0;
        self
    }

    fn priced(mut self, pricing: &Pricing) -> Self {
        self.cost_usd = self.audio_seconds / 60.0 * pricing.transcription_per_minute
            + self.input_tokens as f64 / 1_000_000.0 * pricing.llm_input_per_million
            + self.output_tokens as f64 / 1_000_000.0 * pricing.llm_output_per_million;
        self
    }
}

/// Append-only JSONL log of external calls
#[derive(Debug)]
pub struct UsageLog {
    path: PathBuf,
    pricing: Pricing,
    lock: Mutex<()>,
}

impl UsageLog {
    pub fn new(path: impl Into<PathBuf>, pricing: Pricing) -> Self {
        Self {
            path: path.into(),
            pricing,
            lock: Mutex::new(()),
        }
    }

    /// Log at `<dir>/usage_log.jsonl` with default prices
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(USAGE_LOG_FILE), Pricing::default())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Price `record` and append it as one line
    pub fn append(&self, record: UsageRecord) -> PipelineResult<UsageRecord> {
        let record = record.priced(&self.pricing);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(record)
    }

    /// Every record in the log at `path`. A missing log is empty.
    pub fn read(path: &Path) -> PipelineResult<Vec<UsageRecord>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| PipelineError::CacheCorruption {
                    path: path.to_path_buf(),
                    message: format!("line {}: {}", i + 1, e),
                })
            })
            .collect()
    }
}

/// Shared state injected into the stage runner and the batch scheduler
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub usage: Arc<UsageLedger>,
    usage_log: Option<Arc<UsageLog>>,
    halted: Arc<AtomicBool>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also append every external call to `log`
    pub fn with_usage_log(mut self, log: UsageLog) -> Self {
        self.usage_log = Some(Arc::new(log));
        self
    }

    /// Append to the usage log, if any. A log write failure never fails the call.
    pub fn log_call(&self, record: UsageRecord) {
        if let Some(log) = &self.usage_log {
            if let Err(e) = log.append(record) {
                warn!("Failed to append to {}: {}", log.path().display(), e);
            }
        }
    }

    /// Stop dispatching new work (after a fatal configuration error)
    pub fn halt_dispatch(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_snapshot_and_cost() {
        let ledger = UsageLedger::new();
        ledger.record_diarization();
        ledger.record_transcription(120_000);
        ledger.record_resolver(1_000_000, 100_000);
        ledger.record_cache_hit();

        let snap = ledger.snapshot();
        assert_eq!(snap.external_calls(), 3);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.audio_seconds, 120.0);

        let cost = snap.estimated_cost_usd(&Pricing::default());
        // 2 min * 0.006 + 1M * 3.0/M + 0.1M * 15.0/M
        assert!((cost - 4.512).abs() < 1e-9);
    }

    #[test]
    fn test_context_clones_share_state() {
        let ctx = PipelineContext::new();
        let clone = ctx.clone();
        clone.usage.record_diarization();
        clone.halt_dispatch();

        assert!(ctx.is_halted());
        assert_eq!(ctx.usage.snapshot().diarization_calls, 1);
    }

    #[test]
    fn test_usage_log_appends_priced_records() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new().with_usage_log(UsageLog::in_dir(dir.path()));

        ctx.log_call(
            UsageRecord::new(Service::Transcription, "sync.wav", true)
                .with_model("whisper-1")
                .with_audio_ms(120_000),
        );
        ctx.log_call(
            UsageRecord::new(Service::Resolver, "sync.wav", true).with_tokens(1_000_000, 100_000),
        );
        ctx.log_call(UsageRecord::new(Service::Diarization, "other.wav", false));

        let records = UsageLog::read(&dir.path().join(USAGE_LOG_FILE)).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].model.as_deref(), Some("whisper-1"));
        assert!((records[0].cost_usd - 0.012).abs() < 1e-9);
        assert!((records[1].cost_usd - 4.5).abs() < 1e-9);
        assert_eq!(records[2].service, Service::Diarization);
        assert!(!records[2].success);
    }

    #[test]
    fn test_usage_log_missing_is_empty_and_bad_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(USAGE_LOG_FILE);
        assert!(UsageLog::read(&path).unwrap().is_empty());

        std::fs::write(&path, "{not json}\n").unwrap();
        let err = UsageLog::read(&path).unwrap_err();
        assert!(matches!(err, PipelineError::CacheCorruption { .. }));
    }

    #[test]
    fn test_context_without_log_ignores_records() {
        let ctx = PipelineContext::new();
        ctx.log_call(UsageRecord::new(Service::Resolver, "a.wav", true));
        assert_eq!(ctx.usage.snapshot().resolver_calls, 0);
    }
}
