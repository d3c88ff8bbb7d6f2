use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Meeting shape inferred before name resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingType {
    OneOnOne,
    Group,
    #[default]
    Unknown,
}

impl std::fmt::Display for MeetingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeetingType::OneOnOne => write!(f, "one-on-one"),
            MeetingType::Group => write!(f, "group"),
            MeetingType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Derived per Stage-2 run from the Stage-1 text plus hints; never persisted alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeetingContext {
    pub inferred_type: MeetingType,
    /// Names the resolver may legitimately assign
    pub candidate_names: BTreeSet<String>,
    /// Names referenced in dialogue but not established as speakers
    pub mentioned_only_names: BTreeSet<String>,
    /// Self-introduced names, keyed by the label that spoke them
    pub self_introductions: BTreeMap<String, BTreeSet<String>>,
    /// Participant names parsed from the file name
    pub filename_names: Vec<String>,
    /// Free-text description handed to the resolver
    pub context_hint: String,
    /// Number of distinct diarization labels
    pub speaker_count: usize,
}

impl MeetingContext {
    /// All self-introduced names regardless of label
    pub fn self_introduced_names(&self) -> BTreeSet<String> {
        self.self_introductions.values().flatten().cloned().collect()
    }

    pub fn is_self_introduced(&self, name: &str) -> bool {
        self.self_introductions
            .values()
            .flatten()
            .any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn is_mentioned_only(&self, name: &str) -> bool {
        self.mentioned_only_names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(name))
    }

    /// Self-introduced names spoken under `label`
    pub fn introductions_for(&self, label: &str) -> Option<&BTreeSet<String>> {
        self.self_introductions.get(label)
    }
}

/// Pre-analysis diagnostics stored alongside the Stage-2 mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreAnalysis {
    pub speaker_count: usize,
    pub meeting_type: MeetingType,
    pub quality_score: f64,
    pub issues: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_lookups_ignore_case() {
        let mut context = MeetingContext::default();
        context
            .self_introductions
            .entry("SPEAKER_00".to_string())
            .or_default()
            .insert("Dana".to_string());
        context.mentioned_only_names.insert("Sam".to_string());

        assert!(context.is_self_introduced("dana"));
        assert!(context.is_mentioned_only("SAM"));
        assert!(!context.is_mentioned_only("Dana"));
        assert_eq!(context.self_introduced_names().len(), 1);
    }

    #[test]
    fn test_meeting_type_serde() {
        let json = serde_json::to_string(&MeetingType::OneOnOne).unwrap();
        assert_eq!(json, "\"one_on_one\"");
        assert_eq!(MeetingType::Group.to_string(), "group");
    }
}
