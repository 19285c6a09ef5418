//! Artifact persistence.
//!
//! Every generated image is written once under a fresh [`ArtifactId`] and
//! never modified afterwards. Retention is left to whoever operates the
//! output directory.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StoreError;

/// File extension of every stored artifact.
pub const ARTIFACT_EXTENSION: &str = "png";

/// Filename-safe, globally unique artifact identity (a hyphenated UUIDv7).
///
/// UUIDv7 leads with a millisecond timestamp, so lexical order of
/// identities follows creation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().hyphenated().to_string())
    }

    /// Accepts only strings this store could have produced.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::try_parse(raw)
            .ok()
            .map(|uuid| Self(uuid.hyphenated().to_string()))
            .filter(|id| id.0 == raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.{ARTIFACT_EXTENSION}", self.0)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted generated image.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub id: ArtifactId,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

pub trait ArtifactStore: Send + Sync {
    /// Persists `bytes` under a fresh identity; never overwrites an existing one.
    fn save(&self, bytes: &[u8]) -> Result<ArtifactId, StoreError>;

    fn load(&self, id: &ArtifactId) -> Result<Vec<u8>, StoreError>;

    /// Every complete artifact, in identity order.
    fn list(&self) -> Result<Vec<ArtifactId>, StoreError>;
}

/// Flat directory of `<id>.png` files.
///
/// Writes go to a hidden `.partial` file first and are linked into place
/// once complete, so readers never observe a half-written artifact.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(StoreError::WriteFailed)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, id: &ArtifactId) -> PathBuf {
        self.root.join(id.file_name())
    }

    fn write_partial(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }
}

impl ArtifactStore for FsArtifactStore {
    fn save(&self, bytes: &[u8]) -> Result<ArtifactId, StoreError> {
        loop {
            let id = ArtifactId::generate();
            let partial = self.root.join(format!(".{id}.partial"));
            let target = self.path_of(&id);

            if let Err(err) = Self::write_partial(&partial, bytes) {
                let _ = fs::remove_file(&partial);
                return Err(StoreError::WriteFailed(err));
            }
            // hard_link refuses to replace an existing file, unlike rename.
            let linked = fs::hard_link(&partial, &target);
            let _ = fs::remove_file(&partial);
            match linked {
                Ok(()) => {
                    tracing::debug!(artifact_id = %id, bytes = bytes.len(), "Saved artifact");
                    return Ok(id);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::warn!(artifact_id = %id, "Artifact identity collision, retrying");
                }
                Err(err) => return Err(StoreError::WriteFailed(err)),
            }
        }
    }

    fn load(&self, id: &ArtifactId) -> Result<Vec<u8>, StoreError> {
        fs::read(self.path_of(id)).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => StoreError::not_found(id),
            _ => StoreError::ReadFailed(err),
        })
    }

    fn list(&self) -> Result<Vec<ArtifactId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(StoreError::ReadFailed)? {
            let entry = entry.map_err(StoreError::ReadFailed)?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(ArtifactId::parse)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Process-local store, for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<BTreeMap<ArtifactId, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn save(&self, bytes: &[u8]) -> Result<ArtifactId, StoreError> {
        let mut artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
        let mut id = ArtifactId::generate();
        while artifacts.contains_key(&id) {
            id = ArtifactId::generate();
        }
        artifacts.insert(id.clone(), bytes.to_vec());
        Ok(id)
    }

    fn load(&self, id: &ArtifactId) -> Result<Vec<u8>, StoreError> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))
    }

    fn list(&self) -> Result<Vec<ArtifactId>, StoreError> {
        Ok(self
            .artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}
