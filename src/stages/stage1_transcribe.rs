use std::path::PathBuf;

use tracing::{debug, info};

use crate::adapters::{Diarizer, Transcriber};
use crate::cache::{CacheKey, CacheStore, Stage};
use crate::error::PipelineResult;
use crate::models::{
    AudioSource, DiarizationTurn, Segment, StageOneArtifact, TranscribedSpan, TranscriptionParams,
    UNASSIGNED_LABEL,
};
use crate::usage::{PipelineContext, Service, UsageRecord};

/// Result of Stage 1
#[derive(Debug)]
pub struct Stage1Result {
    pub artifact: StageOneArtifact,
    /// True when the artifact came from the cache
    pub cached: bool,
    /// Where the artifact is persisted, when caching is on
    pub cache_path: Option<PathBuf>,
}

/// Cache key for Stage 1: source fingerprint plus transcription parameters
pub fn stage1_cache_key(source: &AudioSource, params: &TranscriptionParams) -> PipelineResult<CacheKey> {
    CacheKey::derive(&source.fingerprint, Stage::Transcript, params)
}

/// Execute Stage 1: diarize, transcribe, align
///
/// A cache entry matching the source fingerprint and parameters is returned
/// without calling either service. Service errors are returned as they come
/// from the adapter; retries already happened there.
pub async fn execute_stage1(
    source: &AudioSource,
    params: &TranscriptionParams,
    diarizer: &dyn Diarizer,
    transcriber: &dyn Transcriber,
    cache: Option<&CacheStore>,
    ctx: &PipelineContext,
) -> PipelineResult<Stage1Result> {
    let base_name = source.base_name();
    let key = stage1_cache_key(source, params)?;

    if let Some(store) = cache {
        if let Some(artifact) = store.get::<StageOneArtifact>(Stage::Transcript, &base_name, &key) {
            info!("Stage 1: using cached transcript for {} ({})", source.file_name(), key);
            ctx.usage.record_cache_hit();
            return Ok(Stage1Result {
                artifact,
                cached: true,
                cache_path: Some(store.path_for(Stage::Transcript, &base_name)),
            });
        }
        debug!("Stage 1: cache miss for {} ({})", source.file_name(), key);
    }

    info!("Stage 1: diarizing {}", source.file_name());
    ctx.usage.record_diarization();
    let turns = diarizer.diarize(&source.path).await;
    ctx.log_call(UsageRecord::new(Service::Diarization, source.file_name(), turns.is_ok()));
    let turns = turns?;

    info!("Stage 1: transcribing {}", source.file_name());
    let spans = transcriber.transcribe(&source.path, params).await;
    let audio_ms = spans
        .as_ref()
        .map(|s| s.iter().map(|t| t.end_ms).max().unwrap_or(0))
        .unwrap_or(0);
    ctx.usage.record_transcription(audio_ms);
    ctx.log_call(
        UsageRecord::new(Service::Transcription, source.file_name(), spans.is_ok())
            .with_model(&params.model)
            .with_audio_ms(audio_ms),
    );
    let spans = spans?;

    let segments = align_segments(&spans, &turns);
    let artifact = StageOneArtifact::new(source, params.clone(), segments);
    info!(
        "Stage 1: {} segments, {} speaker labels",
        artifact.segments.len(),
        artifact.speaker_label_count
    );

    let cache_path = match cache {
        Some(store) => Some(store.put(Stage::Transcript, &base_name, &key, &artifact)?),
        None => None,
    };

    Ok(Stage1Result {
        artifact,
        cached: false,
        cache_path,
    })
}

/// Give each transcribed span the diarization label it overlaps most.
/// Ties go to the turn that starts first; spans no turn overlaps are
/// `UNASSIGNED`.
pub fn align_segments(spans: &[TranscribedSpan], turns: &[DiarizationTurn]) -> Vec<Segment> {
    let mut turns: Vec<&DiarizationTurn> = turns.iter().collect();
    turns.sort_by(|a, b| a.start_ms.cmp(&b.start_ms).then(a.end_ms.cmp(&b.end_ms)));

    let mut segments: Vec<Segment> = spans
        .iter()
        .map(|span| {
            let label = best_turn(span, &turns)
                .map(|t| t.label.clone())
                .unwrap_or_else(|| UNASSIGNED_LABEL.to_string());
            Segment::new(span.start_ms, span.end_ms, label, span.text.trim())
        })
        .collect();

    segments.sort_by_key(|s| s.start_ms);
    segments
}

fn best_turn<'a>(span: &TranscribedSpan, turns: &[&'a DiarizationTurn]) -> Option<&'a DiarizationTurn> {
    // Zero-length spans take the turn containing their instant
    if span.end_ms <= span.start_ms {
        return turns
            .iter()
            .find(|t| t.start_ms <= span.start_ms && span.start_ms < t.end_ms)
            .copied();
    }

    let mut best: Option<(&DiarizationTurn, u64)> = None;
    for turn in turns {
        let overlap = turn.overlap_ms(span.start_ms, span.end_ms);
        if overlap > 0 && best.is_none_or(|(_, b)| overlap > b) {
            best = Some((turn, overlap));
        }
    }
    best.map(|(t, _)| t)
}
