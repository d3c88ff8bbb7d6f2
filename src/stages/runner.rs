use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapters::{Diarizer, Transcriber};
use crate::cache::CacheStore;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::llm::SpeakerNameResolver;
use crate::models::{AudioSource, ResolutionPass, SpeakerMapping, StageOneArtifact};
use crate::usage::PipelineContext;

use super::stage1_transcribe::{Stage1Result, execute_stage1};
use super::stage2_speakers::{Stage2Result, degraded_mapping, execute_stage2};
use super::stage3_export::{ExportBundle, execute_stage3};

/// Per-file pipeline progress. Transitions only move forward; `Failed` is
/// terminal and reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Stage1Done,
    Stage2Done,
    Stage3Done,
    Failed,
}

impl PipelineState {
    fn rank(&self) -> u8 {
        match self {
            PipelineState::Pending => 0,
            PipelineState::Stage1Done => 1,
            PipelineState::Stage2Done => 2,
            PipelineState::Stage3Done => 3,
            PipelineState::Failed => 4,
        }
    }

    /// Move to `next` if that is forward; otherwise stay put
    pub fn advance(self, next: PipelineState) -> PipelineState {
        if self == PipelineState::Failed {
            return self;
        }
        if next.rank() > self.rank() { next } else { self }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stage3Done | PipelineState::Failed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Pending => "PENDING",
            PipelineState::Stage1Done => "STAGE1_DONE",
            PipelineState::Stage2Done => "STAGE2_DONE",
            PipelineState::Stage3Done => "STAGE3_DONE",
            PipelineState::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Summary of one file's completed pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub audio_file: PathBuf,
    pub state: PipelineState,
    pub stage1_cached: bool,
    pub stage2_cached: bool,
    /// Validation corrections recorded on the final mapping
    pub corrections: usize,
    pub refined: bool,
    /// Labels that share their resolved name with another label
    pub ambiguous_labels: Vec<String>,
    /// Resolver was unavailable and labels stayed generic
    pub degraded: bool,
    pub exports: ExportBundle,
}

/// Runs the three stages for one file at a time, with cache short-circuiting
pub struct StageRunner {
    config: PipelineConfig,
    diarizer: Arc<dyn Diarizer>,
    transcriber: Arc<dyn Transcriber>,
    resolver: Option<Arc<dyn SpeakerNameResolver>>,
    cache: CacheStore,
    ctx: PipelineContext,
}

impl StageRunner {
    pub fn new(
        config: PipelineConfig,
        diarizer: Arc<dyn Diarizer>,
        transcriber: Arc<dyn Transcriber>,
        resolver: Option<Arc<dyn SpeakerNameResolver>>,
        ctx: PipelineContext,
    ) -> Self {
        let cache = CacheStore::new(&config.output_dir);
        Self {
            config,
            diarizer,
            transcriber,
            resolver,
            cache,
            ctx,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    fn cache_ref(&self) -> Option<&CacheStore> {
        self.config.use_cache.then_some(&self.cache)
    }

    pub async fn run_stage1(&self, source: &AudioSource) -> PipelineResult<Stage1Result> {
        execute_stage1(
            source,
            &self.config.transcription,
            self.diarizer.as_ref(),
            self.transcriber.as_ref(),
            self.cache_ref(),
            &self.ctx,
        )
        .await
    }

    pub async fn run_stage2(&self, artifact: &StageOneArtifact) -> PipelineResult<Stage2Result> {
        let resolver = self.resolver.as_deref().ok_or_else(|| {
            PipelineError::Configuration("no speaker name resolver configured".to_string())
        })?;
        execute_stage2(artifact, &self.config, resolver, self.cache_ref(), &self.ctx).await
    }

    pub fn run_stage3(
        &self,
        artifact: &StageOneArtifact,
        mapping: Option<&SpeakerMapping>,
    ) -> PipelineResult<ExportBundle> {
        execute_stage3(artifact, mapping, &self.config.formats, &self.config.output_dir)
    }

    /// Stage 2 with resolver failures degraded to generic labels
    async fn resolve_speakers(
        &self,
        artifact: &StageOneArtifact,
    ) -> PipelineResult<(SpeakerMapping, bool)> {
        match self.run_stage2(artifact).await {
            Ok(result) => Ok((result.mapping, result.cached)),
            Err(PipelineError::ResolverUnavailable(reason)) => {
                warn!(
                    "Speaker resolution unavailable for {}; exporting generic labels: {}",
                    artifact.file_name(),
                    reason
                );
                Ok((degraded_mapping(artifact, &self.config, &reason), false))
            }
            Err(e) => Err(e),
        }
    }

    /// Run all three stages for one audio file
    pub async fn run_file(&self, path: &Path) -> PipelineResult<FileReport> {
        let mut state = PipelineState::Pending;
        match self.drive(path, &mut state).await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!("{} failed after {}: {}", path.display(), state, e);
                state = state.advance(PipelineState::Failed);
                debug!("{} -> {}", path.display(), state);
                Err(e)
            }
        }
    }

    async fn drive(&self, path: &Path, state: &mut PipelineState) -> PipelineResult<FileReport> {
        let owned = path.to_path_buf();
        let source = tokio::task::spawn_blocking(move || AudioSource::from_path(&owned))
            .await
            .map_err(|e| PipelineError::Io(std::io::Error::other(e.to_string())))??;
        info!("Processing {} ({} bytes)", source.file_name(), source.byte_size);

        let stage1 = self.run_stage1(&source).await?;
        *state = state.advance(PipelineState::Stage1Done);
        debug!("{} -> {}", source.file_name(), state);

        let resolved = if self.config.identify_speakers && self.resolver.is_some() {
            Some(self.resolve_speakers(&stage1.artifact).await?)
        } else {
            debug!("Speaker identification skipped for {}", source.file_name());
            None
        };
        *state = state.advance(PipelineState::Stage2Done);
        debug!("{} -> {}", source.file_name(), state);

        let mapping = resolved.as_ref().map(|(m, _)| m);
        let exports = self.run_stage3(&stage1.artifact, mapping)?;
        *state = state.advance(PipelineState::Stage3Done);
        debug!("{} -> {}", source.file_name(), state);

        Ok(FileReport {
            audio_file: source.path.clone(),
            state: *state,
            stage1_cached: stage1.cached,
            stage2_cached: resolved.as_ref().is_some_and(|(_, cached)| *cached),
            corrections: mapping.map(|m| m.validation_notes.len()).unwrap_or(0),
            refined: mapping.is_some_and(|m| m.final_pass == ResolutionPass::Refined),
            ambiguous_labels: mapping
                .map(|m| m.ambiguous_labels.iter().cloned().collect())
                .unwrap_or_default(),
            degraded: mapping.is_some_and(|m| m.degraded),
            exports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_are_monotonic() {
        let state = PipelineState::Pending
            .advance(PipelineState::Stage1Done)
            .advance(PipelineState::Stage2Done);
        assert_eq!(state, PipelineState::Stage2Done);

        assert_eq!(state.advance(PipelineState::Stage1Done), PipelineState::Stage2Done);
        assert_eq!(state.advance(PipelineState::Stage2Done), PipelineState::Stage2Done);
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_failed_is_terminal_from_any_state() {
        for state in [
            PipelineState::Pending,
            PipelineState::Stage1Done,
            PipelineState::Stage2Done,
            PipelineState::Stage3Done,
        ] {
            let failed = state.advance(PipelineState::Failed);
            assert_eq!(failed, PipelineState::Failed);
            assert_eq!(failed.advance(PipelineState::Stage3Done), PipelineState::Failed);
        }
        assert_eq!(PipelineState::Stage1Done.to_string(), "STAGE1_DONE");
    }
}
