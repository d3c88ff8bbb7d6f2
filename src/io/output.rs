use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{MeetingType, SpeakerMapping, StageOneArtifact};

/// Export formats written by Stage 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Timestamped plain text (`.txt`, plus `_speakers.txt` with names)
    Text,
    /// Metadata + segments (`.json`)
    Json,
    /// Subtitle track (`.srt`)
    Srt,
    /// Rich document (`.md`)
    Markdown,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Text,
        ExportFormat::Json,
        ExportFormat::Srt,
        ExportFormat::Markdown,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Json => "json",
            ExportFormat::Srt => "srt",
            ExportFormat::Markdown => "md",
        }
    }

    /// Write this format for one transcript into `dir`
    pub fn write(&self, doc: &ExportDocument<'_>, dir: &Path) -> PipelineResult<Vec<PathBuf>> {
        let paths = match self {
            ExportFormat::Text => write_text(doc, dir)?,
            ExportFormat::Json => vec![write_json(doc, dir)?],
            ExportFormat::Srt => vec![write_srt(doc, dir)?],
            ExportFormat::Markdown => vec![write_markdown(doc, dir)?],
        };
        for path in &paths {
            info!("Created: {}", path.display());
        }
        Ok(paths)
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(ExportFormat::Text),
            "json" => Ok(ExportFormat::Json),
            "srt" => Ok(ExportFormat::Srt),
            "md" | "markdown" | "doc" | "docx" => Ok(ExportFormat::Markdown),
            other => Err(format!(
                "unknown export format '{}' (expected txt, json, srt or md)",
                other
            )),
        }
    }
}

/// A cleaned segment with its resolved speaker name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    /// Diarization label
    pub label: String,
    /// Resolved name, or the label when unresolved
    pub speaker: String,
    pub text: String,
}

/// Stage-1 segments joined with a Stage-2 mapping, ready to serialize
pub struct ExportDocument<'a> {
    pub artifact: &'a StageOneArtifact,
    pub mapping: Option<&'a SpeakerMapping>,
    pub segments: Vec<NamedSegment>,
}

impl<'a> ExportDocument<'a> {
    /// Segments whose text survives cleaning, named through `mapping`
    pub fn new(artifact: &'a StageOneArtifact, mapping: Option<&'a SpeakerMapping>) -> Self {
        let segments = artifact
            .segments
            .iter()
            .filter_map(|s| {
                let text = clean_text(&s.text);
                if text.is_empty() {
                    return None;
                }
                let speaker = mapping
                    .map(|m| m.display_name(&s.speaker).to_string())
                    .unwrap_or_else(|| s.speaker.clone());
                Some(NamedSegment {
                    start_ms: s.start_ms,
                    end_ms: s.end_ms,
                    label: s.speaker.clone(),
                    speaker,
                    text,
                })
            })
            .collect();

        Self {
            artifact,
            mapping,
            segments,
        }
    }

    pub fn base_name(&self) -> String {
        self.artifact.base_name()
    }

    pub fn has_resolved_names(&self) -> bool {
        self.mapping.is_some_and(|m| m.has_resolved_names())
    }

    pub fn duration_ms(&self) -> u64 {
        self.artifact
            .segments
            .iter()
            .map(|s| s.end_ms)
            .max()
            .unwrap_or(0)
    }

    /// label → display name for every label present
    pub fn roster(&self) -> BTreeMap<String, String> {
        self.artifact
            .speaker_labels()
            .into_iter()
            .map(|label| {
                let name = self
                    .mapping
                    .map(|m| m.display_name(&label).to_string())
                    .unwrap_or_else(|| label.clone());
                (label, name)
            })
            .collect()
    }
}

fn write_file(format: ExportFormat, path: PathBuf, content: &str) -> PipelineResult<PathBuf> {
    let export_error = |e: std::io::Error| PipelineError::Export {
        format: format.to_string(),
        path: path.clone(),
        message: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(export_error)?;
    }
    std::fs::write(&path, content).map_err(export_error)?;
    Ok(path)
}

fn text_lines(segments: &[NamedSegment], named: bool) -> String {
    let mut out = String::new();
    for s in segments {
        let who = if named { &s.speaker } else { &s.label };
        let _ = writeln!(
            out,
            "[{} - {}] {}: {}",
            ms_to_hhmmss(s.start_ms),
            ms_to_hhmmss(s.end_ms),
            who,
            s.text
        );
    }
    out
}

/// `<base>.txt` with diarization labels; `<base>_speakers.txt` with names
/// when any label resolved
pub fn write_text(doc: &ExportDocument<'_>, dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    let base = doc.base_name();
    let mut paths = vec![write_file(
        ExportFormat::Text,
        dir.join(format!("{}.txt", base)),
        &text_lines(&doc.segments, false),
    )?];

    if doc.has_resolved_names() {
        paths.push(write_file(
            ExportFormat::Text,
            dir.join(format!("{}_speakers.txt", base)),
            &text_lines(&doc.segments, true),
        )?);
    }
    Ok(paths)
}

#[derive(Serialize)]
struct JsonExport<'a> {
    metadata: JsonMetadata<'a>,
    segments: Vec<JsonSegment<'a>>,
}

#[derive(Serialize)]
struct JsonMetadata<'a> {
    audio_file: &'a Path,
    source_fingerprint: &'a str,
    transcription_model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    duration: String,
    speaker_count: usize,
    speakers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meeting_type: Option<MeetingType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolver_model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality_score: Option<f64>,
    corrections: usize,
}

#[derive(Serialize)]
struct JsonSegment<'a> {
    start_ms: u64,
    end_ms: u64,
    start: String,
    end: String,
    label: &'a str,
    speaker: &'a str,
    text: &'a str,
}

pub fn write_json(doc: &ExportDocument<'_>, dir: &Path) -> PipelineResult<PathBuf> {
    let artifact = doc.artifact;
    let payload = JsonExport {
        metadata: JsonMetadata {
            audio_file: &artifact.audio_file,
            source_fingerprint: &artifact.source_fingerprint,
            transcription_model: &artifact.parameters.model,
            language: artifact.parameters.language.as_deref(),
            duration: ms_to_hhmmss(doc.duration_ms()),
            speaker_count: artifact.speaker_label_count,
            speakers: doc.roster(),
            meeting_type: doc.mapping.map(|m| m.meeting_type),
            resolver_model: doc.mapping.map(|m| m.model.as_str()),
            quality_score: doc.mapping.map(|m| m.quality_score),
            corrections: doc.mapping.map_or(0, |m| m.validation_notes.len()),
        },
        segments: doc
            .segments
            .iter()
            .map(|s| JsonSegment {
                start_ms: s.start_ms,
                end_ms: s.end_ms,
                start: ms_to_hhmmss(s.start_ms),
                end: ms_to_hhmmss(s.end_ms),
                label: &s.label,
                speaker: &s.speaker,
                text: &s.text,
            })
            .collect(),
    };

    let mut content = serde_json::to_string_pretty(&payload)?;
    content.push('\n');
    write_file(
        ExportFormat::Json,
        dir.join(format!("{}.json", doc.base_name())),
        &content,
    )
}

pub fn write_srt(doc: &ExportDocument<'_>, dir: &Path) -> PipelineResult<PathBuf> {
    let mut out = String::new();
    for (i, s) in doc.segments.iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}: {}\n\n",
            i + 1,
            ms_to_srt_timestamp(s.start_ms),
            ms_to_srt_timestamp(s.end_ms),
            s.speaker,
            s.text
        );
    }
    write_file(
        ExportFormat::Srt,
        dir.join(format!("{}.srt", doc.base_name())),
        &out,
    )
}

/// Title, speaker roster, then one block per run of same-speaker segments
pub fn write_markdown(doc: &ExportDocument<'_>, dir: &Path) -> PipelineResult<PathBuf> {
    let mut out = String::new();
    let _ = writeln!(out, "# Meeting Transcript: {}\n", doc.base_name());
    let _ = writeln!(out, "- **Source:** {}", doc.artifact.file_name());
    let _ = writeln!(out, "- **Duration:** {}", ms_to_hhmmss(doc.duration_ms()));
    if let Some(mapping) = doc.mapping {
        let _ = writeln!(out, "- **Meeting type:** {}", mapping.meeting_type);
    }

    out.push_str("\n## Speakers\n\n| Label | Speaker |\n|---|---|\n");
    for (label, name) in doc.roster() {
        let _ = writeln!(out, "| {} | {} |", label, name);
    }

    out.push_str("\n## Transcript\n");
    let mut i = 0;
    while i < doc.segments.len() {
        let first = &doc.segments[i];
        let mut j = i;
        while j + 1 < doc.segments.len() && doc.segments[j + 1].label == first.label {
            j += 1;
        }
        let text = doc.segments[i..=j]
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let _ = write!(
            out,
            "\n**{}** [{}]\n\n{}\n",
            first.speaker,
            ms_to_hhmmss(first.start_ms),
            wrap_text(&text, 80)
        );
        i = j + 1;
    }

    write_file(
        ExportFormat::Markdown,
        dir.join(format!("{}.md", doc.base_name())),
        &out,
    )
}

/// Drop invisible characters and collapse whitespace. Returns an empty
/// string for text with no alphanumeric content or mostly `?` noise.
pub fn clean_text(text: &str) -> String {
    let visible: String = text
        .chars()
        .filter(|c| !matches!(c, '\u{200b}' | '\u{feff}'))
        .map(|c| if c == '\u{a0}' { ' ' } else { c })
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    let cleaned = visible.split_whitespace().collect::<Vec<_>>().join(" ");

    if !cleaned.chars().any(|c| c.is_alphanumeric()) {
        return String::new();
    }
    let questions = cleaned.chars().filter(|&c| c == '?').count();
    if questions * 2 > cleaned.chars().count() {
        return String::new();
    }
    cleaned
}

/// Milliseconds as HH:MM:SS, rounded to the nearest second
pub fn ms_to_hhmmss(ms: u64) -> String {
    let seconds = (ms + 500) / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Milliseconds as an SRT timestamp, HH:MM:SS,mmm
pub fn ms_to_srt_timestamp(ms: u64) -> String {
    format!(
        "{:02}:{:02}:{:02},{:03}",
        ms / 3_600_000,
        (ms % 3_600_000) / 60_000,
        (ms % 60_000) / 1000,
        ms % 1000
    )
}

/// Wrap text at approximately the given width
pub fn wrap_text(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut line_len = 0;

    for word in text.split_whitespace() {
        if line_len + word.len() + 1 > width && line_len > 0 {
            result.push('\n');
            line_len = 0;
        }
        if line_len > 0 {
            result.push(' ');
            line_len += 1;
        }
        result.push_str(word);
        line_len += word.len();
    }

    result
}
