pub mod adapters;
pub mod analysis;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod io;
pub mod llm;
pub mod models;
pub mod stages;
pub mod usage;

pub use adapters::{
    Diarizer, HttpDiarizer, HttpDiarizerConfig, RetryPolicy, RttmDiarizer, Transcriber,
    WhisperClient, WhisperConfig,
};
pub use analysis::SpeakerQualityAnalyzer;
pub use batch::{BatchRun, BatchScheduler, FileOutcome, FileStatus};
pub use cache::{CacheKey, CacheStore, Stage};
pub use config::{AnalysisConfig, BatchConfig, PipelineConfig, ValidationConfig};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use io::{ExportFormat, discover_audio_files, load_stage1_document, load_stage2_document};
pub use llm::{AnthropicClient, AnthropicConfig, SpeakerNameResolver, SpeakerValidator};
pub use models::{AudioSource, SpeakerMapping, StageOneArtifact, TranscriptionParams};
pub use stages::{
    ExportBundle, FileReport, PipelineState, StageRunner, execute_stage1, execute_stage2,
    execute_stage3,
};
pub use usage::{
    PipelineContext, Pricing, Service, UsageLedger, UsageLog, UsageRecord, UsageSnapshot,
};
