use crate::analysis::rules_for;
use crate::config::AnalysisConfig;
use crate::io::output::ms_to_hhmmss;
use crate::models::Segment;

use super::resolver::{PromptScope, ResolutionRequest};

/// System prompt for speaker-name resolution
pub const SYSTEM_PROMPT: &str = r#"You are an expert at identifying speakers in diarized meeting transcripts.

Each line of the transcript is "[index] [HH:MM:SS] LABEL: text". LABEL is a diarization tag, not a name. Your task is to name the person behind each LABEL.

## Evidence, strongest first

1. Self-introductions by that label: "I'm X", "My name is X", "This is X", "X here"
2. Being addressed by name in the reply to their turn: "Thanks X", "Hi X"
3. The role they play in the conversation (Interviewer, Manager, Candidate) when no name is given

## Rules

- Only use the labels listed in the request. Never invent a label.
- A name that is only talked about ("Sam said...", "Alex's meeting") is usually NOT a speaker.
- The same person must not appear under two labels unless the evidence is clear.
- If you cannot tell, answer "Unknown" for that label.
- Keep reasoning short and quote the line index you relied on.

Use the submit_speaker_mappings tool to provide your answer."#;

/// Render segments as indexed, timestamped lines
pub fn format_timeline(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter(|s| !s.text.trim().is_empty())
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[{}] [{}] {}: {}",
                i,
                ms_to_hhmmss(s.start_ms),
                s.speaker,
                s.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep the start (introductions) and a sample of the middle when the
/// timeline exceeds `max_prompt_chars`
pub fn truncate_timeline(timeline: &str, config: &AnalysisConfig) -> String {
    let chars: Vec<char> = timeline.chars().collect();
    if chars.len() <= config.max_prompt_chars {
        return timeline.to_string();
    }

    let head: String = chars[..config.head_chars.min(chars.len())].iter().collect();
    let middle_start = (chars.len() / 2).saturating_sub(config.middle_chars / 2);
    let middle_end = (middle_start + config.middle_chars).min(chars.len());
    let middle: String = chars[middle_start..middle_end].iter().collect();

    format!("{}\n\n[... middle section ...]\n\n{}", head, middle)
}

/// Build the user prompt for one resolver call
pub fn build_resolution_prompt(request: &ResolutionRequest, config: &AnalysisConfig) -> String {
    let mut prompt = String::new();

    prompt.push_str("# Speakers to Name\n\n");
    prompt.push_str(&format!(
        "The transcript contains {} labels: {}\n\n",
        request.labels.len(),
        request.labels.join(", ")
    ));

    prompt.push_str("# Context\n\n");
    prompt.push_str(&format!("- {}\n", rules_for(request.meeting_type).guidance()));
    if !request.context_hint.is_empty() {
        prompt.push_str(&format!("- Meeting context: {}\n", request.context_hint));
    }
    if !request.candidate_names.is_empty() {
        prompt.push_str(&format!(
            "- Likely speakers: {}\n",
            request.candidate_names.join(", ")
        ));
    }
    if !request.mentioned_only_names.is_empty() {
        prompt.push_str(&format!(
            "- Mentioned but probably not speaking: {}\n",
            request.mentioned_only_names.join(", ")
        ));
    }
    prompt.push('\n');

    if !request.previous_issues.is_empty() {
        prompt.push_str("# Problems With the Previous Answer\n\n");
        for issue in &request.previous_issues {
            prompt.push_str(&format!("- {}\n", issue));
        }
        prompt.push_str("\nYou now see the full transcript. Correct these problems.\n\n");
    }

    prompt.push_str("# Transcript\n\n");
    match request.scope {
        PromptScope::Truncated => prompt.push_str(&truncate_timeline(&request.timeline, config)),
        PromptScope::Full => prompt.push_str(&request.timeline),
    }
    prompt.push_str("\n\nName every label listed above.");

    prompt
}
