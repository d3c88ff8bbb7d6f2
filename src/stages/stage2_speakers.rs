use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::SpeakerQualityAnalyzer;
use crate::cache::{CacheKey, CacheStore, Stage};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{
    PromptScope, ResolutionRequest, SpeakerNameResolver, SpeakerValidator, ValidationOutcome,
    format_timeline,
};
use crate::models::{
    MeetingContext, NoteKind, PreAnalysis, ResolutionPass, ResolverMetadata, SpeakerMapping,
    SpeakerResolution, StageOneArtifact, ValidationNote,
};
use crate::usage::{PipelineContext, Service, UsageRecord};

/// Parameters that feed the Stage-2 cache key
#[derive(Debug, Serialize)]
struct Stage2KeyParams<'a> {
    model: &'a str,
    speaker_context: Option<&'a str>,
}

/// Result of Stage 2
#[derive(Debug)]
pub struct Stage2Result {
    pub mapping: SpeakerMapping,
    /// True when the mapping came from the cache
    pub cached: bool,
    pub cache_path: Option<PathBuf>,
}

/// Cache key for Stage 2: artifact fingerprint plus model and caller hint
pub fn stage2_cache_key(artifact: &StageOneArtifact, config: &PipelineConfig) -> PipelineResult<CacheKey> {
    let params = Stage2KeyParams {
        model: &config.resolver_model,
        speaker_context: caller_hint(config),
    };
    CacheKey::derive(&artifact.fingerprint()?, Stage::SpeakerMapping, &params)
}

fn caller_hint(config: &PipelineConfig) -> Option<&str> {
    config
        .speaker_context
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Execute Stage 2: analyze, resolve, validate, refine at most once
///
/// Fails with `ResolverUnavailable` only when the initial resolver call
/// errors. A failed refinement call keeps the first-pass result.
pub async fn execute_stage2(
    artifact: &StageOneArtifact,
    config: &PipelineConfig,
    resolver: &dyn SpeakerNameResolver,
    cache: Option<&CacheStore>,
    ctx: &PipelineContext,
) -> PipelineResult<Stage2Result> {
    let base_name = artifact.base_name();
    let key = stage2_cache_key(artifact, config)?;

    if let Some(store) = cache {
        if let Some(mapping) = store.get::<SpeakerMapping>(Stage::SpeakerMapping, &base_name, &key) {
            info!("Stage 2: using cached speaker mapping for {} ({})", artifact.file_name(), key);
            ctx.usage.record_cache_hit();
            return Ok(Stage2Result {
                mapping,
                cached: true,
                cache_path: Some(store.path_for(Stage::SpeakerMapping, &base_name)),
            });
        }
        debug!("Stage 2: cache miss for {} ({})", artifact.file_name(), key);
    }

    let analyzer = SpeakerQualityAnalyzer::new(config.analysis.clone());
    let validator = SpeakerValidator::new(config.validation.clone());
    let (context, pre_analysis) = analyzer.analyze(artifact, caller_hint(config));
    let labels = artifact.speaker_labels();

    let mapping = if labels.is_empty() {
        info!("Stage 2: {} has no speaker labels; nothing to resolve", artifact.file_name());
        build_mapping(
            artifact,
            config,
            &context,
            pre_analysis,
            ValidationOutcome::default(),
            ResolverMetadata {
                model: config.resolver_model.clone(),
                ..Default::default()
            },
            ResolutionPass::Initial,
            0.0,
        )
    } else {
        resolve_and_validate(
            artifact,
            config,
            resolver,
            &analyzer,
            &validator,
            &context,
            pre_analysis,
            &labels,
            ctx,
        )
        .await?
    };

    let cache_path = match cache {
        Some(store) => Some(store.put(Stage::SpeakerMapping, &base_name, &key, &mapping)?),
        None => None,
    };

    Ok(Stage2Result {
        mapping,
        cached: false,
        cache_path,
    })
}

#[allow(clippy::too_many_arguments)]
async fn resolve_and_validate(
    artifact: &StageOneArtifact,
    config: &PipelineConfig,
    resolver: &dyn SpeakerNameResolver,
    analyzer: &SpeakerQualityAnalyzer,
    validator: &SpeakerValidator,
    context: &MeetingContext,
    pre_analysis: PreAnalysis,
    labels: &[String],
    ctx: &PipelineContext,
) -> PipelineResult<SpeakerMapping> {
    let volumes = artifact.text_volume_by_label();
    let mut request = ResolutionRequest {
        timeline: format_timeline(&artifact.segments),
        context_hint: context.context_hint.clone(),
        model: config.resolver_model.clone(),
        labels: labels.to_vec(),
        meeting_type: context.inferred_type,
        candidate_names: context.candidate_names.iter().cloned().collect(),
        mentioned_only_names: context.mentioned_only_names.iter().cloned().collect(),
        scope: PromptScope::Truncated,
        previous_issues: vec![],
    };

    info!(
        "Stage 2: resolving {} label(s) for {} ({} meeting)",
        labels.len(),
        artifact.file_name(),
        context.inferred_type
    );
    let first = call_resolver(resolver, &request, &artifact.file_name(), ctx).await?;
    let mut metadata = first.metadata.clone();
    let outcome = validator.validate(&first, labels, &volumes, context, ResolutionPass::Initial);

    if !outcome.refine {
        let score = analyzer.score(context, labels, &outcome.mappings);
        return Ok(build_mapping(
            artifact,
            config,
            context,
            pre_analysis,
            outcome,
            metadata,
            ResolutionPass::Initial,
            score,
        ));
    }

    // Single refinement: full timeline plus the first pass's problems
    let trigger = ValidationNote::new(
        ResolutionPass::Initial,
        NoteKind::RefinementTriggered,
        format!(
            "Refinement requested: {} of {} label(s) unresolved",
            outcome.unresolved.len(),
            labels.len()
        ),
    );
    info!("Stage 2: {}", trigger.message);
    request.scope = PromptScope::Full;
    request.previous_issues = outcome.issues();

    match call_resolver(resolver, &request, &artifact.file_name(), ctx).await {
        Ok(second) => {
            metadata.absorb(second.metadata.clone());
            let refined =
                validator.validate(&second, labels, &volumes, context, ResolutionPass::Refined);

            let mut notes = outcome.notes;
            notes.push(trigger);
            notes.extend(refined.notes.iter().cloned());
            let refined = ValidationOutcome { notes, ..refined };

            let score = analyzer.score(context, labels, &refined.mappings);
            Ok(build_mapping(
                artifact,
                config,
                context,
                pre_analysis,
                refined,
                metadata,
                ResolutionPass::Refined,
                score,
            ))
        }
        Err(e) => {
            warn!("Stage 2: refinement failed, keeping first pass: {}", e);
            let mut outcome = outcome;
            outcome.notes.push(trigger);
            outcome.notes.push(ValidationNote::new(
                ResolutionPass::Refined,
                NoteKind::RefinementFailed,
                format!("Refinement call failed: {}", e),
            ));
            metadata.calls += 1;
            let score = analyzer.score(context, labels, &outcome.mappings);
            Ok(build_mapping(
                artifact,
                config,
                context,
                pre_analysis,
                outcome,
                metadata,
                ResolutionPass::Initial,
                score,
            ))
        }
    }
}

async fn call_resolver(
    resolver: &dyn SpeakerNameResolver,
    request: &ResolutionRequest,
    file_name: &str,
    ctx: &PipelineContext,
) -> PipelineResult<SpeakerResolution> {
    let record = UsageRecord::new(Service::Resolver, file_name, true).with_model(&request.model);
    match resolver.resolve(request).await {
        Ok(resolution) => {
            let (input, output) = (resolution.metadata.input_tokens, resolution.metadata.output_tokens);
            ctx.usage.record_resolver(input, output);
            ctx.log_call(record.with_tokens(input, output));
            Ok(resolution)
        }
        Err(e) => {
            ctx.usage.record_resolver(0, 0);
            ctx.log_call(UsageRecord { success: false, ..record });
            Err(match e {
                PipelineError::ResolverUnavailable(_) | PipelineError::Configuration(_) => e,
                other => PipelineError::ResolverUnavailable(other.to_string()),
            })
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_mapping(
    artifact: &StageOneArtifact,
    config: &PipelineConfig,
    context: &MeetingContext,
    pre_analysis: PreAnalysis,
    outcome: ValidationOutcome,
    resolver_metadata: ResolverMetadata,
    final_pass: ResolutionPass,
    quality_score: f64,
) -> SpeakerMapping {
    SpeakerMapping {
        audio_file: artifact.audio_file.clone(),
        model: config.resolver_model.clone(),
        speaker_context: caller_hint(config).map(str::to_string),
        meeting_type: context.inferred_type,
        mappings: outcome.mappings,
        ambiguous_labels: outcome.ambiguous,
        validation_notes: outcome.notes,
        resolver_metadata,
        pre_analysis,
        quality_score,
        final_pass,
        degraded: false,
    }
}

/// Mapping used when the resolver is unavailable: every label stays
/// generic. Never cached, so a later run retries the resolver.
pub fn degraded_mapping(
    artifact: &StageOneArtifact,
    config: &PipelineConfig,
    reason: &str,
) -> SpeakerMapping {
    let analyzer = SpeakerQualityAnalyzer::new(config.analysis.clone());
    let (context, pre_analysis) = analyzer.analyze(artifact, caller_hint(config));

    let mut mapping = build_mapping(
        artifact,
        config,
        &context,
        pre_analysis,
        ValidationOutcome::default(),
        ResolverMetadata {
            model: config.resolver_model.clone(),
            ..Default::default()
        },
        ResolutionPass::Initial,
        0.0,
    );
    mapping.degraded = true;
    mapping.validation_notes.push(ValidationNote::new(
        ResolutionPass::Initial,
        NoteKind::ResolverDegraded,
        format!("Resolver unavailable, labels left unresolved: {}", reason),
    ));
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioSource, Segment, TranscriptionParams};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedResolver {
        responses: Mutex<Vec<PipelineResult<SpeakerResolution>>>,
        scopes: Mutex<Vec<PromptScope>>,
    }

    impl ScriptedResolver {
        fn new(responses: Vec<PipelineResult<SpeakerResolution>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                scopes: Mutex::new(vec![]),
            }
        }

        fn scopes(&self) -> Vec<PromptScope> {
            self.scopes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpeakerNameResolver for ScriptedResolver {
        async fn resolve(&self, request: &ResolutionRequest) -> PipelineResult<SpeakerResolution> {
            self.scopes.lock().unwrap().push(request.scope);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(PipelineError::ResolverUnavailable("script exhausted".to_string()));
            }
            responses.remove(0)
        }
    }

    fn artifact() -> StageOneArtifact {
        let source = AudioSource {
            path: PathBuf::from("team_sync.wav"),
            byte_size: 10,
            fingerprint: "abc".to_string(),
        };
        let segments = vec![
            Segment::new(0, 4_000, "SPEAKER_00", "Hi everyone, my name is Priya."),
            Segment::new(4_000, 8_000, "SPEAKER_01", "And this is Marco, good morning."),
            Segment::new(8_000, 12_000, "SPEAKER_02", "Morning all, let's start."),
        ];
        StageOneArtifact::new(&source, TranscriptionParams::default(), segments)
    }

    #[tokio::test]
    async fn test_complete_mapping_uses_one_call() {
        let resolver = ScriptedResolver::new(vec![Ok(SpeakerResolution::from_pairs(&[
            ("SPEAKER_00", "Priya"),
            ("SPEAKER_01", "Marco"),
            ("SPEAKER_02", "Lee"),
        ]))]);
        let ctx = PipelineContext::new();

        let result = execute_stage2(&artifact(), &PipelineConfig::default(), &resolver, None, &ctx)
            .await
            .unwrap();

        assert_eq!(resolver.scopes(), vec![PromptScope::Truncated]);
        assert_eq!(result.mapping.final_pass, ResolutionPass::Initial);
        assert_eq!(result.mapping.mappings.len(), 3);
        assert_eq!(ctx.usage.snapshot().resolver_calls, 1);
    }

    #[tokio::test]
    async fn test_refinement_runs_once_with_full_scope() {
        let resolver = ScriptedResolver::new(vec![
            Ok(SpeakerResolution::from_pairs(&[("SPEAKER_00", "Priya")])),
            Ok(SpeakerResolution::from_pairs(&[
                ("SPEAKER_00", "Priya"),
                ("SPEAKER_01", "Marco"),
            ])),
        ]);
        let ctx = PipelineContext::new();

        let result = execute_stage2(&artifact(), &PipelineConfig::default(), &resolver, None, &ctx)
            .await
            .unwrap();
        let mapping = result.mapping;

        assert_eq!(resolver.scopes(), vec![PromptScope::Truncated, PromptScope::Full]);
        assert_eq!(mapping.final_pass, ResolutionPass::Refined);
        assert_eq!(mapping.resolver_metadata.calls, 2);
        assert_eq!(mapping.notes_of(NoteKind::RefinementTriggered), 1);
        assert_eq!(mapping.display_name("SPEAKER_01"), "Marco");
        assert_eq!(mapping.display_name("SPEAKER_02"), "SPEAKER_02");
    }

    #[tokio::test]
    async fn test_failed_refinement_keeps_first_pass() {
        let resolver = ScriptedResolver::new(vec![Ok(SpeakerResolution::from_pairs(&[(
            "SPEAKER_00",
            "Priya",
        )]))]);
        let ctx = PipelineContext::new();

        let mapping = execute_stage2(&artifact(), &PipelineConfig::default(), &resolver, None, &ctx)
            .await
            .unwrap()
            .mapping;

        assert_eq!(resolver.scopes().len(), 2);
        assert_eq!(mapping.final_pass, ResolutionPass::Initial);
        assert_eq!(mapping.notes_of(NoteKind::RefinementFailed), 1);
        assert_eq!(mapping.display_name("SPEAKER_00"), "Priya");
    }

    #[tokio::test]
    async fn test_initial_failure_is_resolver_unavailable() {
        let resolver = ScriptedResolver::new(vec![Err(PipelineError::Io(std::io::Error::other(
            "connection reset",
        )))]);
        let ctx = PipelineContext::new();

        let err = execute_stage2(&artifact(), &PipelineConfig::default(), &resolver, None, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ResolverUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cached_mapping_skips_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let config = PipelineConfig::default();
        let ctx = PipelineContext::new();
        let answer = SpeakerResolution::from_pairs(&[
            ("SPEAKER_00", "Priya"),
            ("SPEAKER_01", "Marco"),
            ("SPEAKER_02", "Lee"),
        ]);

        let resolver = ScriptedResolver::new(vec![Ok(answer)]);
        let first = execute_stage2(&artifact(), &config, &resolver, Some(&store), &ctx)
            .await
            .unwrap();
        assert!(!first.cached);

        let idle = ScriptedResolver::new(vec![]);
        let second = execute_stage2(&artifact(), &config, &idle, Some(&store), &ctx)
            .await
            .unwrap();
        assert!(second.cached);
        assert!(idle.scopes().is_empty());
        assert_eq!(first.mapping, second.mapping);
    }

    #[test]
    fn test_speaker_context_changes_key() {
        let mut config = PipelineConfig::default();
        let plain = stage2_cache_key(&artifact(), &config).unwrap();

        config.speaker_context = Some("   ".to_string());
        assert_eq!(stage2_cache_key(&artifact(), &config).unwrap(), plain);

        config.speaker_context = Some("Weekly sync with Priya".to_string());
        assert_ne!(stage2_cache_key(&artifact(), &config).unwrap(), plain);
    }

    #[test]
    fn test_degraded_mapping_is_annotated() {
        let mapping = degraded_mapping(&artifact(), &PipelineConfig::default(), "timeout");

        assert!(mapping.degraded);
        assert!(!mapping.has_resolved_names());
        assert_eq!(mapping.notes_of(NoteKind::ResolverDegraded), 1);
    }
}
