use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::io::{ExportDocument, ExportFormat};
use crate::models::{SpeakerMapping, StageOneArtifact};

/// One format that could not be written
#[derive(Debug, Clone, Serialize)]
pub struct ExportFailure {
    pub format: ExportFormat,
    pub message: String,
}

/// Result of Stage 3: every file written plus per-format failures
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportBundle {
    pub written: Vec<PathBuf>,
    pub failures: Vec<ExportFailure>,
}

impl ExportBundle {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Execute Stage 3: export
///
/// Each format is written independently; a failing format is recorded and
/// the others still write. Fails only when every requested format failed.
pub fn execute_stage3(
    artifact: &StageOneArtifact,
    mapping: Option<&SpeakerMapping>,
    formats: &[ExportFormat],
    output_dir: &Path,
) -> PipelineResult<ExportBundle> {
    let document = ExportDocument::new(artifact, mapping);
    let mut bundle = ExportBundle::default();
    let mut first_error: Option<PipelineError> = None;

    let mut requested: Vec<ExportFormat> = Vec::new();
    for format in formats {
        if !requested.contains(format) {
            requested.push(*format);
        }
    }

    for format in requested {
        match format.write(&document, output_dir) {
            Ok(paths) => bundle.written.extend(paths),
            Err(e) => {
                warn!("Stage 3: {} export of {} failed: {}", format, document.base_name(), e);
                bundle.failures.push(ExportFailure {
                    format,
                    message: e.to_string(),
                });
                first_error.get_or_insert(e);
            }
        }
    }

    if bundle.written.is_empty() {
        if let Some(e) = first_error {
            return Err(e);
        }
    }
    info!(
        "Stage 3: {} file(s) written for {}, {} format(s) failed",
        bundle.written.len(),
        document.base_name(),
        bundle.failures.len()
    );
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioSource, Segment, TranscriptionParams};

    fn artifact() -> StageOneArtifact {
        let source = AudioSource {
            path: PathBuf::from("standup.wav"),
            byte_size: 10,
            fingerprint: "abc".to_string(),
        };
        StageOneArtifact::new(
            &source,
            TranscriptionParams::default(),
            vec![Segment::new(0, 2_000, "SPEAKER_00", "Morning, quick update from me.")],
        )
    }

    #[test]
    fn test_writes_each_requested_format_once() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = execute_stage3(
            &artifact(),
            None,
            &[ExportFormat::Json, ExportFormat::Srt, ExportFormat::Json],
            dir.path(),
        )
        .unwrap();

        assert!(bundle.is_complete());
        assert_eq!(bundle.written.len(), 2);
        assert!(dir.path().join("standup.json").exists());
        assert!(dir.path().join("standup.srt").exists());
    }

    #[test]
    fn test_failing_format_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("standup.srt")).unwrap();

        let bundle = execute_stage3(
            &artifact(),
            None,
            &[ExportFormat::Srt, ExportFormat::Text],
            dir.path(),
        )
        .unwrap();

        assert!(!bundle.is_complete());
        let failed: Vec<ExportFormat> = bundle.failures.iter().map(|f| f.format).collect();
        assert_eq!(failed, vec![ExportFormat::Srt]);
        assert!(bundle.written.contains(&dir.path().join("standup.txt")));
        assert!(dir.path().join("standup.txt").is_file());
    }

    #[test]
    fn test_unwritable_destination_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = execute_stage3(&artifact(), None, &[ExportFormat::Text], &blocker).unwrap_err();
        assert!(matches!(err, PipelineError::Export { .. }));
    }
}
