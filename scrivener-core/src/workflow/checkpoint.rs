//! Checkpoint persistence for run state.
//!
//! A checkpoint is the whole [`RunState`] plus a SHA-256 digest of its
//! serialized form. Stores replace a run's checkpoint all-or-nothing, so a
//! reader sees either the previous or the next state, never a mix.

use super::run::{RunId, RunState};
use crate::error::CheckpointError;
use crate::persistence::{atomic_write, remove_if_exists};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Current on-disk checkpoint format.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// A sealed snapshot of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub run_id: RunId,
    pub seq: u64,
    pub saved_at: DateTime<Utc>,
    /// Hex SHA-256 of the serialized `state`.
    pub digest: String,
    pub state: RunState,
}

impl Checkpoint {
    /// Seal `state` into a checkpoint at its current sequence number.
    pub fn seal(state: &RunState) -> Result<Self, CheckpointError> {
        Ok(Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            run_id: state.id,
            seq: state.checkpoint_seq,
            saved_at: Utc::now(),
            digest: digest(state)?,
            state: state.clone(),
        })
    }

    /// Check the format version and digest, returning the state.
    pub fn verify(self) -> Result<RunState, CheckpointError> {
        if self.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.format_version,
                expected: CHECKPOINT_FORMAT_VERSION,
            });
        }
        if self.run_id != self.state.id || digest(&self.state)? != self.digest {
            return Err(CheckpointError::IntegrityViolation {
                run_id: self.run_id.to_string(),
            });
        }
        Ok(self.state)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CheckpointError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn digest(state: &RunState) -> Result<String, CheckpointError> {
    let bytes = serde_json::to_vec(state)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Durable storage for run checkpoints. One checkpoint per run; each save
/// replaces the previous one.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist the state as the run's latest checkpoint.
    async fn save(&self, state: &RunState) -> Result<(), CheckpointError>;

    /// Load and verify the latest checkpoint, if any.
    async fn load(&self, run_id: RunId) -> Result<Option<RunState>, CheckpointError>;

    /// Remove a run's checkpoint. Returns whether one existed.
    async fn delete(&self, run_id: RunId) -> Result<bool, CheckpointError>;

    /// Ids of every stored run, sorted.
    async fn list(&self) -> Result<Vec<RunId>, CheckpointError>;

    /// Encoded bytes of the latest checkpoint, exactly as stored.
    async fn load_raw(&self, run_id: RunId) -> Result<Option<Vec<u8>>, CheckpointError>;
}

/// In-process store, lost on restart.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<RunId, Vec<u8>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &RunState) -> Result<(), CheckpointError> {
        let bytes = Checkpoint::seal(state)?.encode()?;
        self.entries.lock().await.insert(state.id, bytes);
        Ok(())
    }

    async fn load(&self, run_id: RunId) -> Result<Option<RunState>, CheckpointError> {
        match self.entries.lock().await.get(&run_id) {
            Some(bytes) => Checkpoint::decode(bytes)?.verify().map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, run_id: RunId) -> Result<bool, CheckpointError> {
        Ok(self.entries.lock().await.remove(&run_id).is_some())
    }

    async fn list(&self) -> Result<Vec<RunId>, CheckpointError> {
        let mut ids: Vec<RunId> = self.entries.lock().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn load_raw(&self, run_id: RunId) -> Result<Option<Vec<u8>>, CheckpointError> {
        Ok(self.entries.lock().await.get(&run_id).cloned())
    }
}

/// JSON files, one per run, written with tmp+rename.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the checkpoint file for `run_id`.
    pub fn checkpoint_path(&self, run_id: RunId) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, CheckpointError>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
        .map_err(CheckpointError::from)
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, state: &RunState) -> Result<(), CheckpointError> {
        let bytes = Checkpoint::seal(state)?.encode()?;
        let path = self.checkpoint_path(state.id);
        debug!(run_id = %state.id, seq = state.checkpoint_seq, path = %path.display(), "Writing checkpoint");
        blocking(move || atomic_write(&path, &bytes)).await
    }

    async fn load(&self, run_id: RunId) -> Result<Option<RunState>, CheckpointError> {
        match self.load_raw(run_id).await? {
            Some(bytes) => Checkpoint::decode(&bytes)?.verify().map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, run_id: RunId) -> Result<bool, CheckpointError> {
        let path = self.checkpoint_path(run_id);
        blocking(move || remove_if_exists(&path)).await
    }

    async fn list(&self) -> Result<Vec<RunId>, CheckpointError> {
        let dir = self.dir.clone();
        blocking(move || {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };
            let mut ids = Vec::new();
            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<RunId>().ok())
                {
                    ids.push(id);
                }
            }
            ids.sort();
            Ok(ids)
        })
        .await
    }

    async fn load_raw(&self, run_id: RunId) -> Result<Option<Vec<u8>>, CheckpointError> {
        let path = self.checkpoint_path(run_id);
        blocking(move || read_optional(&path)).await
    }
}
