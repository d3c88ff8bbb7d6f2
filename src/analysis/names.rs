//! Name extraction from transcript text.
//!
//! Names are capitalized words following first-person (self-introduction) or
//! second/third-person (mention) cues. Cue words match case-insensitively; the
//! name itself must be capitalized.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Segment;

static SELF_INTRO_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i:\bmy name is)\s+([A-Z][a-z]+)",
        r"(?i:\b(?:this is|i['’]m|i am))\s+([A-Z][a-z]+)",
        r"^(?:(?i:hi|hello|hey)[,!]?\s+)?([A-Z][a-z]+)\s+(?i:here)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid regex"))
    .collect()
});

static MENTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i:\b(?:thanks|thank you|hi|hello|hey)),?\s+([A-Z][a-z]+)",
        r"\b([A-Z][a-z]+)\s+(?i:said|mentioned|told|asked)\b",
        r"\b([A-Z][a-z]+)['’]s\s+(?i:meeting|call|interview)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid regex"))
    .collect()
});

static PLACEHOLDER_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^speaker[ _-]?\d+$").expect("Invalid regex"));

/// Capitalized words the cue patterns catch that are never names
const STOPWORDS: &[&str] = &[
    "the", "this", "that", "there", "here", "he", "she", "they", "we", "you", "it", "everyone",
    "everybody", "all", "guys", "team", "folks", "just", "so", "well", "okay", "ok", "yes",
    "yeah", "no", "sure", "not", "also", "again", "going", "glad", "happy", "sorry", "good",
    "great", "really", "actually", "calling", "speaking", "back", "from", "with", "and", "but",
    "for", "what", "who", "how", "now", "then", "today", "very", "still", "always", "nobody",
    "somebody", "someone", "anybody", "anyone", "people", "everything", "nothing", "something",
];

fn is_name_like(word: &str) -> bool {
    !STOPWORDS.contains(&word.to_ascii_lowercase().as_str())
}

fn captures<'a>(patterns: &'a [Regex], text: &'a str) -> impl Iterator<Item = String> + 'a {
    patterns
        .iter()
        .flat_map(move |re| re.captures_iter(text))
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| is_name_like(name))
}

/// Self-introduced names, keyed by the label that spoke them
pub fn self_introductions_by_label(segments: &[Segment]) -> BTreeMap<String, BTreeSet<String>> {
    let mut intros: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for segment in segments.iter().filter(|s| s.is_assigned()) {
        for name in captures(&SELF_INTRO_PATTERNS, segment.text.trim()) {
            intros.entry(segment.speaker.clone()).or_default().insert(name);
        }
    }
    intros
}

/// All self-introduced names
pub fn extract_self_introductions(segments: &[Segment]) -> BTreeSet<String> {
    self_introductions_by_label(segments)
        .into_values()
        .flatten()
        .collect()
}

/// Names referenced in second or third person that nobody introduced as themself
pub fn extract_mentioned_names(segments: &[Segment]) -> BTreeSet<String> {
    let introduced = extract_self_introductions(segments);
    segments
        .iter()
        .flat_map(|s| captures(&MENTION_PATTERNS, s.text.trim()).collect::<Vec<_>>())
        .filter(|name| !introduced.iter().any(|i| i.eq_ignore_ascii_case(name)))
        .collect()
}

/// A resolver answer that names nobody ("Unknown", "Speaker 2", the label itself)
pub fn is_placeholder_name(name: &str, label: &str) -> bool {
    let name = name.trim();
    let lower = name.to_ascii_lowercase();
    name.is_empty()
        || name.eq_ignore_ascii_case(label)
        || lower.starts_with("unknown")
        || matches!(lower.as_str(), "unidentified" | "n/a" | "none" | "?")
        || PLACEHOLDER_LABEL.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(speaker: &str, text: &str) -> Segment {
        Segment::new(0, 1000, speaker, text)
    }

    #[test]
    fn test_self_introductions() {
        let segments = vec![
            seg("L0", "Hi everyone, this is Dana from finance."),
            seg("L1", "My name is Priya."),
            seg("L1", "Ravi here, by the way."),
            seg("L0", "I'm going to share my screen."),
        ];
        let by_label = self_introductions_by_label(&segments);

        assert_eq!(by_label["L0"].iter().collect::<Vec<_>>(), vec!["Dana"]);
        assert!(by_label["L1"].contains("Priya"));
        assert!(by_label["L1"].contains("Ravi"));
        assert_eq!(extract_self_introductions(&segments).len(), 3);
    }

    #[test]
    fn test_leading_here_form() {
        let segments = vec![seg("L0", "Hey, Marco here, can you hear me?")];
        assert!(extract_self_introductions(&segments).contains("Marco"));
    }

    #[test]
    fn test_pronoun_here_is_not_an_introduction() {
        let segments = vec![
            seg("L0", "Nobody here has seen the numbers yet."),
            seg("L1", "People here want the release out."),
            seg("L0", "Somebody here should own it."),
        ];
        assert!(extract_self_introductions(&segments).is_empty());
    }

    #[test]
    fn test_mentions_exclude_self_introduced() {
        let segments = vec![
            seg("L0", "This is Dana."),
            seg("L1", "Thanks, Dana. Sam said the numbers are late."),
            seg("L0", "Thank you, Sam is out today. It was Alex's meeting anyway."),
        ];
        let mentioned = extract_mentioned_names(&segments);

        assert!(mentioned.contains("Sam"));
        assert!(mentioned.contains("Alex"));
        assert!(!mentioned.contains("Dana"));
    }

    #[test]
    fn test_stopwords_are_not_names() {
        let segments = vec![seg("L0", "Thanks, everyone. He said it was fine. Hello There.")];
        assert!(extract_mentioned_names(&segments).is_empty());
    }

    #[test]
    fn test_placeholder_names() {
        assert!(is_placeholder_name("Unknown", "L1"));
        assert!(is_placeholder_name("Unknown Speaker", "L1"));
        assert!(is_placeholder_name("Speaker 2", "L1"));
        assert!(is_placeholder_name("SPEAKER_01", "SPEAKER_01"));
        assert!(is_placeholder_name("  ", "L1"));
        assert!(!is_placeholder_name("Dana", "L0"));
    }
}
