use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::audio::{base_name_of, AudioSource};
use super::segment::Segment;
use crate::error::PipelineResult;

/// Parameters that determine Stage 1 output, and therefore its cache key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionParams {
    /// Transcription model (e.g. "whisper-1")
    pub model: String,
    /// Optional language hint (ISO code)
    pub language: Option<String>,
    /// Sampling temperature
    pub temperature: f64,
}

impl Default for TranscriptionParams {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            language: None,
            temperature: 0.0,
        }
    }
}

/// Output of Stage 1: diarized, transcribed segments for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOneArtifact {
    pub audio_file: PathBuf,
    pub source_fingerprint: String,
    pub parameters: TranscriptionParams,
    pub segments: Vec<Segment>,
    pub speaker_label_count: usize,
}

impl StageOneArtifact {
    pub fn new(source: &AudioSource, parameters: TranscriptionParams, segments: Vec<Segment>) -> Self {
        let speaker_label_count = distinct_labels(&segments).len();
        Self {
            audio_file: source.path.clone(),
            source_fingerprint: source.fingerprint.clone(),
            parameters,
            segments,
            speaker_label_count,
        }
    }

    /// Distinct diarization labels, sorted
    pub fn speaker_labels(&self) -> Vec<String> {
        distinct_labels(&self.segments).into_iter().collect()
    }

    pub fn base_name(&self) -> String {
        base_name_of(&self.audio_file)
    }

    pub fn file_name(&self) -> String {
        self.audio_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Characters of text attributed to each label
    pub fn text_volume_by_label(&self) -> BTreeMap<String, usize> {
        let mut volume = BTreeMap::new();
        for segment in self.segments.iter().filter(|s| s.is_assigned()) {
            *volume.entry(segment.speaker.clone()).or_insert(0) += segment.text.trim().len();
        }
        volume
    }

    /// Content fingerprint of the artifact itself, used to key Stage 2
    pub fn fingerprint(&self) -> PipelineResult<String> {
        let encoded = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn distinct_labels(segments: &[Segment]) -> BTreeSet<String> {
    segments
        .iter()
        .filter(|s| s.is_assigned())
        .map(|s| s.speaker.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::segment::UNASSIGNED_LABEL;

    fn artifact(segments: Vec<Segment>) -> StageOneArtifact {
        let source = AudioSource {
            path: PathBuf::from("/tmp/standup.wav"),
            byte_size: 10,
            fingerprint: "abc".to_string(),
        };
        StageOneArtifact::new(&source, TranscriptionParams::default(), segments)
    }

    #[test]
    fn test_labels_exclude_unassigned() {
        let a = artifact(vec![
            Segment::new(0, 1000, "SPEAKER_01", "hello"),
            Segment::new(1000, 2000, "SPEAKER_00", "hi there"),
            Segment::new(2000, 2500, UNASSIGNED_LABEL, "mm"),
            Segment::new(2500, 3000, "SPEAKER_01", "okay"),
        ]);

        assert_eq!(a.speaker_label_count, 2);
        assert_eq!(a.speaker_labels(), vec!["SPEAKER_00", "SPEAKER_01"]);
        assert_eq!(a.text_volume_by_label()["SPEAKER_01"], 9);
        assert_eq!(a.base_name(), "standup");
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = artifact(vec![Segment::new(0, 1000, "SPEAKER_00", "hello")]);
        let b = artifact(vec![Segment::new(0, 1000, "SPEAKER_00", "hello")]);
        let c = artifact(vec![Segment::new(0, 1000, "SPEAKER_00", "goodbye")]);

        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }
}
