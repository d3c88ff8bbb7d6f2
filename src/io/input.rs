use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cache::{Stage, read_document};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{SpeakerMapping, StageOneArtifact, has_supported_extension};

/// Supported audio files directly inside `dir`, in file-name order.
/// Validation happens per file when the pipeline runs.
pub fn discover_audio_files(dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::Configuration(format!(
            "input directory not found: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_supported_extension(&path) {
            files.push(path);
        } else {
            debug!("Skipping {:?}", path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Read a Stage-1 document written by the cache
pub fn load_stage1_document(path: &Path) -> PipelineResult<StageOneArtifact> {
    read_document(path, Stage::Transcript).map(|(_, artifact)| artifact)
}

/// Read a Stage-2 document written by the cache
pub fn load_stage2_document(path: &Path) -> PipelineResult<SpeakerMapping> {
    read_document(path, Stage::SpeakerMapping).map(|(_, mapping)| mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_sorts_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.wav", "a.MP3", "notes.txt", "c.flac"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("d.wav")).unwrap();

        let files = discover_audio_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.MP3", "b.wav", "c.flac"]);
    }

    #[test]
    fn test_discover_missing_directory() {
        let err = discover_audio_files(Path::new("/definitely/not/here")).unwrap_err();
        assert!(err.is_fatal_configuration());
    }
}
