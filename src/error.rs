use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the pipeline
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Which upstream model service failed during Stage 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamService {
    /// Auth or model-access failure of the diarization service
    DiarizationUnavailable,
    /// Transcription API error after the adapter's retries
    TranscriptionFailed,
}

impl std::fmt::Display for UpstreamService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamService::DiarizationUnavailable => write!(f, "diarization unavailable"),
            UpstreamService::TranscriptionFailed => write!(f, "transcription failed"),
        }
    }
}

/// Errors that can terminate a stage
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("upstream service error ({service}): {message}")]
    UpstreamService {
        service: UpstreamService,
        message: String,
    },

    #[error("speaker name resolver unavailable: {0}")]
    ResolverUnavailable(String),

    #[error("export to {format} failed at {path:?}: {message}")]
    Export {
        format: String,
        path: PathBuf,
        message: String,
    },

    #[error("pipeline timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("cache entry {path:?} is corrupt: {message}")]
    CacheCorruption { path: PathBuf, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid audio source {path:?}: {message}")]
    InvalidSource { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn diarization(message: impl Into<String>) -> Self {
        PipelineError::UpstreamService {
            service: UpstreamService::DiarizationUnavailable,
            message: message.into(),
        }
    }

    pub fn transcription(message: impl Into<String>) -> Self {
        PipelineError::UpstreamService {
            service: UpstreamService::TranscriptionFailed,
            message: message.into(),
        }
    }

    /// Coarse classification used in batch reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::UpstreamService { .. } => ErrorKind::UpstreamService,
            PipelineError::ResolverUnavailable(_) => ErrorKind::ResolverUnavailable,
            PipelineError::Export { .. } => ErrorKind::Export,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::CacheCorruption { .. } => ErrorKind::CacheCorruption,
            PipelineError::Configuration(_) => ErrorKind::Configuration,
            PipelineError::InvalidSource { .. } => ErrorKind::InvalidSource,
            PipelineError::Io(_) | PipelineError::Json(_) => ErrorKind::Io,
        }
    }

    /// Configuration errors stop the batch from dispatching further files
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }
}

/// Serializable error classification for run reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UpstreamService,
    ResolverUnavailable,
    Export,
    Timeout,
    CacheCorruption,
    Configuration,
    InvalidSource,
    Io,
    Panicked,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::UpstreamService => "UpstreamServiceError",
            ErrorKind::ResolverUnavailable => "ResolverUnavailable",
            ErrorKind::Export => "ExportError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::CacheCorruption => "CacheCorruptionError",
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::InvalidSource => "InvalidSource",
            ErrorKind::Io => "IoError",
            ErrorKind::Panicked => "Panicked",
        };
        write!(f, "{}", name)
    }
}
