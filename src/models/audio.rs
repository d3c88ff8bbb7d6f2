use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, PipelineResult};

/// Audio container extensions accepted as pipeline input
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "flac"];

/// Largest accepted input file (2 GiB)
pub const MAX_AUDIO_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// One discovered input file. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSource {
    pub path: PathBuf,
    pub byte_size: u64,
    /// SHA-256 of the file contents, lowercase hex
    pub fingerprint: String,
}

impl AudioSource {
    /// Validate the file and compute its content fingerprint
    pub fn from_path(path: &Path) -> PipelineResult<Self> {
        let invalid = |message: String| PipelineError::InvalidSource {
            path: path.to_path_buf(),
            message,
        };

        let meta = std::fs::metadata(path).map_err(|e| invalid(format!("not found: {}", e)))?;
        if !meta.is_file() {
            return Err(invalid("not a regular file".to_string()));
        }
        if !has_supported_extension(path) {
            return Err(invalid(format!(
                "unsupported format (allowed: {})",
                SUPPORTED_EXTENSIONS.join(", ")
            )));
        }
        if meta.len() > MAX_AUDIO_BYTES {
            return Err(invalid(format!(
                "file is too large: {} > {}",
                bytes_to_readable(meta.len()),
                bytes_to_readable(MAX_AUDIO_BYTES)
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            byte_size: meta.len(),
            fingerprint: fingerprint_file(path)?,
        })
    }

    /// File stem used to name intermediate and exported files
    pub fn base_name(&self) -> String {
        base_name_of(&self.path)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// File stem of a path, or "transcript" when it has none
pub fn base_name_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "transcript".to_string())
}

pub fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Stream a file through SHA-256
pub fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Human-friendly byte size
pub fn bytes_to_readable(num_bytes: u64) -> String {
    if num_bytes < 1024 {
        return format!("{} B", num_bytes);
    }
    let mut value = num_bytes as f64;
    for unit in ["KB", "MB", "GB", "TB"] {
        value /= 1024.0;
        if value < 1024.0 {
            return format!("{:.2} {}", value, unit);
        }
    }
    format!("{:.2} PB", value / 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_fingerprints_contents() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        std::fs::write(&a, b"RIFF-one").unwrap();
        std::fs::write(&b, b"RIFF-one").unwrap();

        let sa = AudioSource::from_path(&a).unwrap();
        let sb = AudioSource::from_path(&b).unwrap();

        assert_eq!(sa.byte_size, 8);
        assert_eq!(sa.fingerprint.len(), 64);
        assert_eq!(sa.fingerprint, sb.fingerprint);
        assert_eq!(sa.base_name(), "a");

        std::fs::write(&b, b"RIFF-two").unwrap();
        let sb = AudioSource::from_path(&b).unwrap();
        assert_ne!(sa.fingerprint, sb.fingerprint);
    }

    #[test]
    fn test_from_path_rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let err = AudioSource::from_path(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported format"));
    }

    #[test]
    fn test_bytes_to_readable() {
        assert_eq!(bytes_to_readable(512), "512 B");
        assert_eq!(bytes_to_readable(2048), "2.00 KB");
        assert_eq!(bytes_to_readable(5 * 1024 * 1024), "5.00 MB");
    }
}
