use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::io::output::ExportFormat;
use crate::models::TranscriptionParams;

/// Default model for speaker-name resolution
pub const DEFAULT_RESOLVER_MODEL: &str = "claude-sonnet-4-20250514";

/// Top-level configuration for a single-file pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory for intermediate (cache) documents and exports
    pub output_dir: PathBuf,
    /// Stage 1 parameters
    pub transcription: TranscriptionParams,
    /// Model name passed to the resolver; part of the Stage 2 key
    pub resolver_model: String,
    /// Caller-supplied meeting description; part of the Stage 2 key
    pub speaker_context: Option<String>,
    /// Run Stage 2 at all; when false Stage 3 exports generic labels
    pub identify_speakers: bool,
    /// Formats written by Stage 3
    pub formats: Vec<ExportFormat>,
    /// Consult and populate the cache
    pub use_cache: bool,
    pub analysis: AnalysisConfig,
    pub validation: ValidationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            transcription: TranscriptionParams::default(),
            resolver_model: DEFAULT_RESOLVER_MODEL.to_string(),
            speaker_context: None,
            identify_speakers: true,
            formats: vec![ExportFormat::Text, ExportFormat::Json, ExportFormat::Srt],
            use_cache: true,
            analysis: AnalysisConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

/// Tunables for the pre-resolution transcript analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// File-name tokens that signal a one-on-one meeting
    pub one_on_one_vocabulary: Vec<String>,
    /// File-name tokens that signal a group meeting
    pub group_vocabulary: Vec<String>,
    /// Minimum share of text the quieter of two labels must hold for the
    /// two-label signal to count as a one-on-one
    pub min_label_balance: f64,
    /// Prompt size limit for the initial (truncated) resolver call
    pub max_prompt_chars: usize,
    /// Characters kept from the start of a truncated transcript
    pub head_chars: usize,
    /// Characters sampled from the middle of a truncated transcript
    pub middle_chars: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|w| w.to_string()).collect();
        Self {
            one_on_one_vocabulary: words(&[
                "1on1",
                "1-on-1",
                "1_on_1",
                "one-on-one",
                "1 on 1",
                "1:1",
                "interview",
                "review",
                "performance",
                "quarterly",
            ]),
            group_vocabulary: words(&[
                "team", "group", "panel", "standup", "stand-up", "all-hands", "townhall",
                "planning", "retro", "kickoff",
            ]),
            min_label_balance: 0.1,
            max_prompt_chars: 4_000,
            head_chars: 2_500,
            middle_chars: 1_500,
        }
    }
}

/// Tunables for post-resolution validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Unresolved-label ratio above which refinement is requested
    pub refine_unresolved_ratio: f64,
    /// Meetings with at most this many labels refine on any unresolved label
    pub small_meeting_max_speakers: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            refine_unresolved_ratio: 0.5,
            small_meeting_max_speakers: 3,
        }
    }
}

/// Worker pool settings for batch runs
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Explicit worker count; `None` derives it from available parallelism
    pub workers: Option<usize>,
    /// Upper bound applied to the derived worker count
    pub max_workers: usize,
    /// Wall-clock limit for one file's whole pipeline
    pub per_file_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: None,
            max_workers: 8,
            per_file_timeout: Duration::from_secs(300),
        }
    }
}

impl BatchConfig {
    /// Explicit override, else half the available parallelism clamped to `[1, max_workers]`
    pub fn worker_count(&self) -> usize {
        if let Some(n) = self.workers {
            return n.max(1);
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        (cores / 2).clamp(1, self.max_workers.max(1))
    }
}
