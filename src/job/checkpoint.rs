//! Checkpoint persistence.
//!
//! A checkpoint is the resumable offset of a job: every item before it has
//! been pulled from the source. Starting a fresh job from a checkpoint never
//! retests an item confirmed before it was saved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::data::SourceRef;
use crate::error::CheckpointError;

/// Persisted resume point of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub job_id: Uuid,
    pub source: SourceRef,
    pub offset: u64,
    pub saved_at: DateTime<Utc>,
}

/// Sink for checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &JobCheckpoint) -> Result<(), CheckpointError>;

    async fn load(&self, job_id: Uuid) -> Result<JobCheckpoint, CheckpointError>;
}

/// One JSON file per job under a directory.
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

    fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    /// Most recently saved checkpoint in the directory, if any.
    pub async fn latest(&self) -> Result<Option<JobCheckpoint>, CheckpointError> {
        self.latest_matching(|_| true).await
    }

    /// Most recently saved checkpoint taken against `source`.
    pub async fn latest_for(
        &self,
        source: &SourceRef,
    ) -> Result<Option<JobCheckpoint>, CheckpointError> {
        self.latest_matching(|checkpoint| checkpoint.source == *source)
            .await
    }

    async fn latest_matching(
        &self,
        keep: impl Fn(&JobCheckpoint) -> bool,
    ) -> Result<Option<JobCheckpoint>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut latest: Option<JobCheckpoint> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let checkpoint: JobCheckpoint = serde_json::from_slice(&tokio::fs::read(&path).await?)?;
            if !keep(&checkpoint) {
                continue;
            }
            if latest.as_ref().is_none_or(|l| checkpoint.saved_at > l.saved_at) {
                latest = Some(checkpoint);
            }
        }
        Ok(latest)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &JobCheckpoint) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(checkpoint.job_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(checkpoint)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(job_id = %checkpoint.job_id, offset = checkpoint.offset, "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<JobCheckpoint, CheckpointError> {
        let bytes = match tokio::fs::read(self.path_for(job_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(job_id));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// In-memory store, mostly for tests and embedding.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<Uuid, JobCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &JobCheckpoint) -> Result<(), CheckpointError> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.job_id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<JobCheckpoint, CheckpointError> {
        self.checkpoints
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(CheckpointError::NotFound(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(offset: u64) -> JobCheckpoint {
        JobCheckpoint {
            job_id: Uuid::new_v4(),
            source: SourceRef::List { len: 10 },
            offset,
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn file_store_overwrites_per_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints"));
        let mut cp = checkpoint(3);

        store.save(&cp).await.unwrap();
        cp.offset = 7;
        store.save(&cp).await.unwrap();

        let loaded = store.load(cp.job_id).await.unwrap();
        assert_eq!(loaded.offset, 7);
        assert_eq!(loaded.source, SourceRef::List { len: 10 });
        assert_eq!(store.latest().await.unwrap().unwrap().job_id, cp.job_id);
    }

    #[tokio::test]
    async fn missing_checkpoint_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let id = Uuid::new_v4();
        assert!(matches!(
            store.load(id).await,
            Err(CheckpointError::NotFound(missing)) if missing == id
        ));
        assert!(store.latest().await.unwrap().is_none());
        assert!(
            FileCheckpointStore::new(dir.path().join("absent"))
                .latest()
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn latest_for_skips_other_sources() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let wordlist = SourceRef::File {
            path: "combos.txt".into(),
        };

        let mut ours = checkpoint(4);
        ours.source = wordlist.clone();
        store.save(&ours).await.unwrap();
        // newer, but for a different list
        let mut other = checkpoint(9);
        other.saved_at = ours.saved_at + chrono::Duration::seconds(5);
        store.save(&other).await.unwrap();

        assert_eq!(store.latest().await.unwrap().unwrap().job_id, other.job_id);
        let found = store.latest_for(&wordlist).await.unwrap().unwrap();
        assert_eq!(found.job_id, ours.job_id);
        assert_eq!(found.offset, 4);
        assert!(
            store
                .latest_for(&SourceRef::Infinite)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryCheckpointStore::new();
        let cp = checkpoint(5);
        store.save(&cp).await.unwrap();
        assert_eq!(store.load(cp.job_id).await.unwrap(), cp);
    }
}
