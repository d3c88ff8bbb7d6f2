//! Pre-resolution transcript analysis.
//!
//! Runs before the resolver call: infers the meeting type, separates
//! self-introduced names (likely speakers) from names only mentioned in
//! dialogue, and produces the diagnostics stored with the Stage-2 mapping.

pub mod filename;
pub mod names;
pub mod rules;

pub use filename::*;
pub use names::*;
pub use rules::*;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::AnalysisConfig;
use crate::models::{MeetingContext, MeetingType, PreAnalysis, Segment, StageOneArtifact};

/// Heuristic pass over Stage-1 text
#[derive(Debug, Clone, Default)]
pub struct SpeakerQualityAnalyzer {
    config: AnalysisConfig,
}

impl SpeakerQualityAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// One-on-one from vocabulary or a balanced two-label transcript; group
    /// from vocabulary or three or more labels; unknown otherwise
    pub fn detect_meeting_type(
        &self,
        hint_text: &str,
        label_volumes: &BTreeMap<String, usize>,
    ) -> MeetingType {
        let hint = hint_text.to_lowercase();
        let mentions = |vocabulary: &[String]| {
            vocabulary
                .iter()
                .any(|term| hint.contains(term.to_lowercase().as_str()))
        };

        if mentions(&self.config.one_on_one_vocabulary) {
            return MeetingType::OneOnOne;
        }
        if mentions(&self.config.group_vocabulary) {
            return MeetingType::Group;
        }

        match label_volumes.len() {
            2 if self.is_balanced(label_volumes) => MeetingType::OneOnOne,
            n if n >= 3 => MeetingType::Group,
            _ => MeetingType::Unknown,
        }
    }

    fn is_balanced(&self, label_volumes: &BTreeMap<String, usize>) -> bool {
        let total: usize = label_volumes.values().sum();
        let quieter = label_volumes.values().copied().min().unwrap_or(0);
        total > 0 && quieter as f64 / total as f64 >= self.config.min_label_balance
    }

    pub fn extract_self_introductions(&self, segments: &[Segment]) -> BTreeSet<String> {
        names::extract_self_introductions(segments)
    }

    pub fn extract_mentioned_names(&self, segments: &[Segment]) -> BTreeSet<String> {
        names::extract_mentioned_names(segments)
    }

    /// Build the meeting context and pre-analysis report for one artifact
    pub fn analyze(
        &self,
        artifact: &StageOneArtifact,
        speaker_context: Option<&str>,
    ) -> (MeetingContext, PreAnalysis) {
        let file_name = artifact.file_name();
        let from_filename = extract_context_from_filename(&file_name);
        let caller_hint = speaker_context.map(str::trim).filter(|s| !s.is_empty());

        let hint_text = format!("{} {}", file_name, caller_hint.unwrap_or_default());
        let volumes = artifact.text_volume_by_label();
        let inferred_type = self.detect_meeting_type(&hint_text, &volumes);

        let self_introductions = self_introductions_by_label(&artifact.segments);
        let introduced: BTreeSet<String> = self_introductions.values().flatten().cloned().collect();
        let mentioned = names::extract_mentioned_names(&artifact.segments);

        let mut candidate_names = introduced.clone();
        candidate_names.extend(from_filename.participants.iter().cloned());

        // With no self-introductions at all, mentioned names are the only
        // evidence and stay eligible
        let mentioned_only_names: BTreeSet<String> = if introduced.is_empty() {
            candidate_names.extend(mentioned.iter().cloned());
            BTreeSet::new()
        } else {
            mentioned
                .iter()
                .filter(|n| {
                    !from_filename
                        .participants
                        .iter()
                        .any(|p| p.eq_ignore_ascii_case(n))
                })
                .cloned()
                .collect()
        };

        let context_hint = caller_hint
            .map(str::to_string)
            .or_else(|| from_filename.hint())
            .unwrap_or_default();

        let context = MeetingContext {
            inferred_type,
            candidate_names,
            mentioned_only_names,
            self_introductions,
            filename_names: from_filename.participants.clone(),
            context_hint,
            speaker_count: artifact.speaker_label_count,
        };

        let report = self.pre_analysis(&context, &mentioned);
        debug!(
            "Pre-analysis of {}: {} labels, {} meeting, score {:.2}, {} issue(s)",
            file_name,
            report.speaker_count,
            report.meeting_type,
            report.quality_score,
            report.issues.len()
        );
        (context, report)
    }

    fn pre_analysis(&self, context: &MeetingContext, mentioned: &BTreeSet<String>) -> PreAnalysis {
        let count = context.speaker_count;
        let mut score: f64 = 1.0;
        let mut issues = Vec::new();

        if count == 0 {
            score -= 0.5;
            issues.push("No speaker labels detected".to_string());
        }

        if let Some(expected) = rules_for(context.inferred_type).expected_speakers() {
            if count != expected {
                score -= 0.3;
                issues.push(format!(
                    "{} meeting but {} speakers detected (expected {})",
                    context.inferred_type, count, expected
                ));
            } else {
                score += 0.1;
            }
        }

        if mentioned.len() > count * 2 {
            score -= 0.2;
            issues.push(format!(
                "Many names mentioned ({}) vs {} speakers - may cause confusion",
                mentioned.len(),
                count
            ));
        }

        if !context.self_introductions.is_empty() {
            score += 0.1;
        }
        if !context.filename_names.is_empty() {
            score += 0.1;
        }

        PreAnalysis {
            speaker_count: count,
            meeting_type: context.inferred_type,
            quality_score: score.clamp(0.0, 1.0),
            issues,
        }
    }

    /// Diagnostic score of a candidate mapping: label coverage (0.4),
    /// absence of mentioned-only names (0.3), count match (0.3)
    pub fn score(
        &self,
        context: &MeetingContext,
        labels: &[String],
        mappings: &BTreeMap<String, String>,
    ) -> f64 {
        if labels.is_empty() {
            return 0.0;
        }

        let resolved: Vec<(&String, &String)> = mappings
            .iter()
            .filter(|(label, name)| labels.contains(label) && !is_placeholder_name(name, label))
            .collect();

        let coverage = resolved.len() as f64 / labels.len() as f64;

        let mention_free = if resolved.is_empty() {
            1.0
        } else {
            let mentioned = resolved
                .iter()
                .filter(|(_, name)| {
                    context.is_mentioned_only(name) && !context.is_self_introduced(name)
                })
                .count();
            1.0 - mentioned as f64 / resolved.len() as f64
        };

        let identities: BTreeSet<String> = resolved.iter().map(|(_, n)| n.to_lowercase()).collect();
        let rules = rules_for(context.inferred_type);
        let count_ok = match rules.expected_speakers() {
            Some(expected) => labels.len() == expected && identities.len() <= expected,
            None => identities.len() <= rules.max_identities(labels.len()),
        };
        let count_match = if count_ok { 1.0 } else { 0.0 };

        0.4 * coverage + 0.3 * mention_free + 0.3 * count_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioSource, TranscriptionParams};
    use std::path::PathBuf;

    fn artifact(file: &str, segments: Vec<Segment>) -> StageOneArtifact {
        let source = AudioSource {
            path: PathBuf::from(file),
            byte_size: 1,
            fingerprint: "fp".to_string(),
        };
        StageOneArtifact::new(&source, TranscriptionParams::default(), segments)
    }

    fn volumes(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(l, v)| (l.to_string(), *v)).collect()
    }

    #[test]
    fn test_detect_meeting_type() {
        let analyzer = SpeakerQualityAnalyzer::default();

        let two = volumes(&[("L0", 500), ("L1", 400)]);
        let lopsided = volumes(&[("L0", 990), ("L1", 10)]);
        let three = volumes(&[("L0", 1), ("L1", 1), ("L2", 1)]);

        assert_eq!(analyzer.detect_meeting_type("Dana_1on1.m4a", &three), MeetingType::OneOnOne);
        assert_eq!(analyzer.detect_meeting_type("weekly team sync.wav", &two), MeetingType::Group);
        assert_eq!(analyzer.detect_meeting_type("call.wav", &two), MeetingType::OneOnOne);
        assert_eq!(analyzer.detect_meeting_type("call.wav", &lopsided), MeetingType::Unknown);
        assert_eq!(analyzer.detect_meeting_type("call.wav", &three), MeetingType::Group);
        assert_eq!(
            analyzer.detect_meeting_type("call.wav", &volumes(&[("L0", 5)])),
            MeetingType::Unknown
        );
    }

    #[test]
    fn test_analyze_separates_speakers_from_mentions() {
        let analyzer = SpeakerQualityAnalyzer::default();
        let a = artifact(
            "/audio/Dana 1on1.m4a",
            vec![
                Segment::new(0, 2000, "L0", "Hi, this is Dana."),
                Segment::new(2000, 4000, "L1", "Thanks, Sam said you would call."),
                Segment::new(4000, 6000, "L0", "Right, let's start."),
            ],
        );

        let (context, report) = analyzer.analyze(&a, None);

        assert_eq!(context.inferred_type, MeetingType::OneOnOne);
        assert!(context.is_self_introduced("Dana"));
        assert!(context.is_mentioned_only("Sam"));
        assert!(!context.candidate_names.contains("Sam"));
        assert_eq!(context.filename_names, vec!["Dana"]);
        assert_eq!(context.context_hint, "1-on-1 meeting with Dana");
        assert_eq!(report.speaker_count, 2);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_mentions_are_candidates_without_introductions() {
        let analyzer = SpeakerQualityAnalyzer::default();
        let a = artifact(
            "/audio/recording.wav",
            vec![
                Segment::new(0, 2000, "L0", "Thanks, Priya."),
                Segment::new(2000, 4000, "L1", "Sure thing."),
            ],
        );

        let (context, _) = analyzer.analyze(&a, Some("budget sync with Priya"));

        assert!(context.mentioned_only_names.is_empty());
        assert!(context.candidate_names.contains("Priya"));
        assert_eq!(context.context_hint, "budget sync with Priya");
    }

    #[test]
    fn test_pre_analysis_flags_wrong_one_on_one_count() {
        let analyzer = SpeakerQualityAnalyzer::default();
        let a = artifact(
            "/audio/1on1.wav",
            vec![
                Segment::new(0, 1000, "L0", "a"),
                Segment::new(1000, 2000, "L1", "b"),
                Segment::new(2000, 3000, "L2", "c"),
            ],
        );

        let (_, report) = analyzer.analyze(&a, None);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].contains("expected 2"));
        assert!((report.quality_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_score_weights() {
        let analyzer = SpeakerQualityAnalyzer::default();
        let mut context = MeetingContext {
            inferred_type: MeetingType::OneOnOne,
            ..Default::default()
        };
        context.mentioned_only_names.insert("Sam".to_string());
        let labels = vec!["L0".to_string(), "L1".to_string()];

        let full: BTreeMap<String, String> =
            [("L0", "Dana"), ("L1", "Lee")].iter().map(|(l, n)| (l.to_string(), n.to_string())).collect();
        assert!((analyzer.score(&context, &labels, &full) - 1.0).abs() < 1e-9);

        let half: BTreeMap<String, String> =
            [("L0", "Dana"), ("L1", "Unknown")].iter().map(|(l, n)| (l.to_string(), n.to_string())).collect();
        assert!((analyzer.score(&context, &labels, &half) - 0.8).abs() < 1e-9);

        let mentioned: BTreeMap<String, String> =
            [("L0", "Dana"), ("L1", "Sam")].iter().map(|(l, n)| (l.to_string(), n.to_string())).collect();
        assert!((analyzer.score(&context, &labels, &mentioned) - 0.85).abs() < 1e-9);

        assert_eq!(analyzer.score(&context, &[], &full), 0.0);
    }
}
