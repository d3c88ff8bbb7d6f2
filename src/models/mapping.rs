use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::meeting::{MeetingType, PreAnalysis};
use crate::analysis::is_placeholder_name;

/// Which resolver call produced a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPass {
    /// First call, truncated transcript
    #[default]
    Initial,
    /// The single permitted second call, full transcript
    Refined,
}

/// Category of an audited mapping correction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// Proposal keyed by something that is not a diarization label
    UnknownLabel,
    /// Proposal with an empty name
    EmptyName,
    /// Second proposal for an already-mapped label
    DuplicateLabel,
    /// Identity dropped to satisfy the meeting's speaker-count limit
    CountEnforced,
    /// Mentioned-only name reverted to the diarization label
    MentionedOnlyDiscarded,
    /// Mentioned-only name kept because nothing else was offered
    MentionedOnlyAccepted,
    /// Two labels resolved to the same name
    Ambiguous,
    /// Validator requested the refinement pass
    RefinementTriggered,
    /// Refinement call failed; first-pass result kept
    RefinementFailed,
    /// Resolver unavailable; all labels left unresolved
    ResolverDegraded,
}

/// One audited correction. Corrections are never silent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationNote {
    pub pass: ResolutionPass,
    pub kind: NoteKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub message: String,
}

impl ValidationNote {
    pub fn new(pass: ResolutionPass, kind: NoteKind, message: impl Into<String>) -> Self {
        Self {
            pass,
            kind,
            label: None,
            name: None,
            message: message.into(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A single label→name proposal from the resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerProposal {
    /// Diarization label the resolver claims to be naming
    pub label: String,
    /// Proposed human name or role
    pub name: String,
    /// Resolver-reported confidence (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Resolver's stated evidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Other names the resolver considered for this label
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
}

impl SpeakerProposal {
    pub fn new(label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            name: name.into(),
            confidence: None,
            reasoning: None,
            alternatives: vec![],
        }
    }

    pub fn with_alternatives(mut self, alternatives: &[&str]) -> Self {
        self.alternatives = alternatives.iter().map(|a| a.to_string()).collect();
        self
    }
}

/// Metadata about the resolver calls behind a mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolverMetadata {
    pub model: String,
    /// Number of resolver calls made (1 or 2)
    pub calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Resolver's overall analysis, if provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Per-label confidence reported by the resolver
    #[serde(default)]
    pub confidence: BTreeMap<String, f64>,
    /// Per-label reasoning reported by the resolver
    #[serde(default)]
    pub reasoning: BTreeMap<String, String>,
}

impl ResolverMetadata {
    /// Fold a later call's metadata into this one
    pub fn absorb(&mut self, later: ResolverMetadata) {
        self.calls += later.calls;
        self.input_tokens += later.input_tokens;
        self.output_tokens += later.output_tokens;
        if later.summary.is_some() {
            self.summary = later.summary;
        }
        self.confidence = later.confidence;
        self.reasoning = later.reasoning;
    }
}

/// Raw response of one resolver call, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeakerResolution {
    pub proposals: Vec<SpeakerProposal>,
    pub metadata: ResolverMetadata,
}

impl SpeakerResolution {
    /// Build from plain label→name pairs
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            proposals: pairs
                .iter()
                .map(|(label, name)| SpeakerProposal::new(*label, *name))
                .collect(),
            metadata: ResolverMetadata {
                calls: 1,
                ..Default::default()
            },
        }
    }
}

/// Finalized Stage-2 output, persisted as the Stage-2 cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerMapping {
    pub audio_file: PathBuf,
    pub model: String,
    pub speaker_context: Option<String>,
    pub meeting_type: MeetingType,
    /// label → resolved name; labels absent here are unresolved
    pub mappings: BTreeMap<String, String>,
    /// Labels that share their resolved name with another label
    #[serde(default)]
    pub ambiguous_labels: BTreeSet<String>,
    #[serde(default)]
    pub validation_notes: Vec<ValidationNote>,
    pub resolver_metadata: ResolverMetadata,
    pub pre_analysis: PreAnalysis,
    /// Diagnostic score of the final mapping (0-1)
    pub quality_score: f64,
    pub final_pass: ResolutionPass,
    /// True when the resolver was unavailable and labels stayed generic
    #[serde(default)]
    pub degraded: bool,
}

impl SpeakerMapping {
    /// Name to show for a label: the resolved name, or the label itself
    /// when unmapped or mapped to a placeholder
    pub fn display_name<'a>(&'a self, label: &'a str) -> &'a str {
        self.mappings
            .get(label)
            .map(|s| s.as_str())
            .filter(|name| !is_placeholder_name(name, label))
            .unwrap_or(label)
    }

    pub fn has_resolved_names(&self) -> bool {
        self.mappings
            .iter()
            .any(|(label, name)| !is_placeholder_name(name, label))
    }

    /// Count of corrections of a given kind
    pub fn notes_of(&self, kind: NoteKind) -> usize {
        self.validation_notes.iter().filter(|n| n.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proposal_without_optional_fields() {
        let json = r#"{"label": "SPEAKER_00", "name": "Dana"}"#;
        let proposal: SpeakerProposal = serde_json::from_str(json).unwrap();

        assert_eq!(proposal.label, "SPEAKER_00");
        assert_eq!(proposal.name, "Dana");
        assert!(proposal.alternatives.is_empty());
        assert!(proposal.confidence.is_none());
    }

    #[test]
    fn test_metadata_absorb_accumulates_usage() {
        let mut first = ResolverMetadata {
            model: "m".to_string(),
            calls: 1,
            input_tokens: 100,
            output_tokens: 20,
            summary: Some("first".to_string()),
            ..Default::default()
        };
        first.absorb(ResolverMetadata {
            calls: 1,
            input_tokens: 300,
            output_tokens: 30,
            ..Default::default()
        });

        assert_eq!(first.calls, 2);
        assert_eq!(first.input_tokens, 400);
        assert_eq!(first.output_tokens, 50);
        assert_eq!(first.summary.as_deref(), Some("first"));
    }
}
