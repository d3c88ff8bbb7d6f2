//! Boundary calls to the external model services used by Stage 1.
//!
//! Retries live here: each adapter owns its retry budget, and once it is spent
//! the error surfaces to the stage runner, which does not retry again.

pub mod diarization;
pub mod transcription;

pub use diarization::*;
pub use transcription::*;

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::PipelineResult;
use crate::models::{DiarizationTurn, TranscribedSpan, TranscriptionParams};

/// Speaker diarization service
#[async_trait]
pub trait Diarizer: Send + Sync {
    /// Ordered `(label, start, end)` intervals for the audio file
    async fn diarize(&self, audio: &Path) -> PipelineResult<Vec<DiarizationTurn>>;
}

/// Speech-to-text service
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Ordered `(start, end, text)` spans for the audio file
    async fn transcribe(
        &self,
        audio: &Path,
        params: &TranscriptionParams,
    ) -> PipelineResult<Vec<TranscribedSpan>>;
}

/// Retry budget for one adapter call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Failure of a single attempt
#[derive(Debug, Clone)]
pub struct CallFailure {
    pub message: String,
    pub retryable: bool,
}

impl CallFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Classify a non-success HTTP status; auth and not-found are not retried
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("{} - {}", status, body);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::retryable(message)
        } else {
            Self::fatal(message)
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or the budget is spent
pub async fn with_retries<T, F, Fut>(
    what: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, CallFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallFailure>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) if failure.retryable && attempt < max_attempts => {
                warn!(
                    "{}: attempt {} of {} failed: {}",
                    what, attempt, max_attempts, failure.message
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(failure) => return Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", &quick(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(CallFailure::retryable("busy"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries("test", &quick(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallFailure::fatal("401 Unauthorized"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries("test", &quick(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CallFailure::retryable("503"))
        })
        .await;

        assert_eq!(result.unwrap_err().message, "503");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_status_classification() {
        assert!(CallFailure::from_status(reqwest::StatusCode::BAD_GATEWAY, "").retryable);
        assert!(CallFailure::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "").retryable);
        assert!(!CallFailure::from_status(reqwest::StatusCode::UNAUTHORIZED, "").retryable);
    }
}
