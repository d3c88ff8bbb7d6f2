use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;
use crate::models::{MeetingType, SpeakerResolution};

/// How much of the transcript a resolver call sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptScope {
    /// Head plus a middle sample, for the initial call
    Truncated,
    /// Whole timeline, for the refinement call
    Full,
}

/// Everything a resolver call needs
#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    /// Indexed, timestamped rendering of the Stage-1 segments
    pub timeline: String,
    pub context_hint: String,
    pub model: String,
    /// Diarization labels to name
    pub labels: Vec<String>,
    pub meeting_type: MeetingType,
    /// Names established as likely speakers
    pub candidate_names: Vec<String>,
    /// Names only referred to in dialogue
    pub mentioned_only_names: Vec<String>,
    pub scope: PromptScope,
    /// First-pass problems, filled in for the refinement call
    pub previous_issues: Vec<String>,
}

/// LLM call that proposes a label→name mapping
#[async_trait]
pub trait SpeakerNameResolver: Send + Sync {
    async fn resolve(&self, request: &ResolutionRequest) -> PipelineResult<SpeakerResolution>;
}
