//! Stage artifact cache.
//!
//! Each cached stage output lives in one JSON document under the output
//! directory, named `<base>_stage1_transcript.json` or
//! `<base>_stage2_speaker_mappings.json`. The document records the cache key it
//! was produced under; a lookup with a different key is a miss. Writes go to a
//! temporary file in the same directory and are renamed into place, so
//! concurrent writers of the same key resolve last-writer-wins.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

/// Cached pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Stage 1: transcribed and diarized segments
    Transcript,
    /// Stage 2: validated speaker mapping
    SpeakerMapping,
}

impl Stage {
    pub fn id(&self) -> &'static str {
        match self {
            Stage::Transcript => "stage1",
            Stage::SpeakerMapping => "stage2",
        }
    }

    pub fn file_suffix(&self) -> &'static str {
        match self {
            Stage::Transcript => "_stage1_transcript.json",
            Stage::SpeakerMapping => "_stage2_speaker_mappings.json",
        }
    }
}

/// Deterministic key over (fingerprint, stage, parameters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive<P: Serialize>(fingerprint: &str, stage: Stage, params: &P) -> PipelineResult<Self> {
        let params = serde_json::to_string(params)?;
        let mut hasher = Sha256::new();
        hasher.update(stage.id().as_bytes());
        hasher.update(b":");
        hasher.update(fingerprint.as_bytes());
        hasher.update(b":");
        hasher.update(params.as_bytes());
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..self.0.len().min(16)])
    }
}

#[derive(Serialize)]
struct DocumentRef<'a, T> {
    cache_key: &'a CacheKey,
    stage: Stage,
    data: &'a T,
}

#[derive(Deserialize)]
struct Document<T> {
    cache_key: CacheKey,
    stage: Stage,
    data: T,
}

/// File-backed store of stage artifacts
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic document path for a source base name
    pub fn path_for(&self, stage: Stage, base_name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", base_name, stage.file_suffix()))
    }

    /// Look up an entry. Missing or stale entries are `Ok(None)`; an entry
    /// that fails to parse is `Err(CacheCorruption)`.
    pub fn lookup<T: DeserializeOwned>(
        &self,
        stage: Stage,
        base_name: &str,
        key: &CacheKey,
    ) -> PipelineResult<Option<T>> {
        let path = self.path_for(stage, base_name);
        if !path.exists() {
            return Ok(None);
        }

        let (cached_key, data) = read_document::<T>(&path, stage)?;
        if &cached_key != key {
            debug!(
                "Cache entry {:?} is stale (key {} != {})",
                path, cached_key, key
            );
            return Ok(None);
        }
        Ok(Some(data))
    }

    /// Like `lookup`, but a corrupt entry is logged and treated as a miss
    pub fn get<T: DeserializeOwned>(&self, stage: Stage, base_name: &str, key: &CacheKey) -> Option<T> {
        match self.lookup(stage, base_name, key) {
            Ok(found) => found,
            Err(e) => {
                warn!("{}; recomputing", e);
                None
            }
        }
    }

    /// Persist an entry atomically and return its path
    pub fn put<T: Serialize>(
        &self,
        stage: Stage,
        base_name: &str,
        key: &CacheKey,
        data: &T,
    ) -> PipelineResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(stage, base_name);

        let document = DocumentRef {
            cache_key: key,
            stage,
            data,
        };
        let mut bytes = serde_json::to_vec_pretty(&document)?;
        bytes.push(b'\n');

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| PipelineError::Io(e.error))?;

        debug!("Cached {} entry at {:?}", stage.id(), path);
        Ok(path)
    }

    /// Intermediate documents currently in the directory, per stage
    pub fn list(&self) -> std::io::Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut stage1 = Vec::new();
        let mut stage2 = Vec::new();
        if !self.dir.exists() {
            return Ok((stage1, stage2));
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.ends_with(Stage::Transcript.file_suffix()) {
                stage1.push(path);
            } else if name.ends_with(Stage::SpeakerMapping.file_suffix()) {
                stage2.push(path);
            }
        }
        stage1.sort();
        stage2.sort();
        Ok((stage1, stage2))
    }
}

/// Read a cache document of the expected stage from an explicit path
pub fn read_document<T: DeserializeOwned>(path: &Path, stage: Stage) -> PipelineResult<(CacheKey, T)> {
    let corrupt = |message: String| PipelineError::CacheCorruption {
        path: path.to_path_buf(),
        message,
    };

    let content = std::fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
    let document: Document<T> =
        serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
    if document.stage != stage {
        return Err(corrupt(format!(
            "expected a {} document, found {}",
            stage.id(),
            document.stage.id()
        )));
    }
    Ok((document.cache_key, document.data))
}
