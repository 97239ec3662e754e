//! Persistent record of the last published etag per dataset.
//!
//! The ledger is a JSON object `relpath → etag`. It is rewritten wholesale
//! after every mutation (temp file, fsync, rename), so a crash leaves either
//! the old or the new content on disk, never a torn file.

use crate::error::{StorageError, StorageResult};
use crate::files::write_atomic;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tessera_core::{DatasetPath, Etag};
use tokio::sync::Mutex;
use tracing::instrument;

type Entries = BTreeMap<DatasetPath, Etag>;

/// Etag ledger backed by a JSON file.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl Ledger {
    /// Load the ledger at `path`, creating an empty one (and its parent
    /// directories) when absent.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<Entries>(&raw).map_err(|e| {
                StorageError::Format(format!("corrupt ledger {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let entries = Entries::new();
                persist(&path, &entries).await?;
                entries
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(entries = entries.len(), "Ledger loaded");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, rel: &DatasetPath) -> Option<Etag> {
        self.entries.lock().await.get(rel).cloned()
    }

    /// Record `etag` for `rel` and flush to disk.
    pub async fn insert(&self, rel: DatasetPath, etag: Etag) -> StorageResult<()> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(rel.clone(), etag);
        if let Err(e) = persist(&self.path, &entries).await {
            // Keep memory and disk in agreement.
            match previous {
                Some(old) => entries.insert(rel, old),
                None => entries.remove(&rel),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Forget `rel` and flush to disk. Returns whether an entry existed.
    pub async fn remove(&self, rel: &DatasetPath) -> StorageResult<bool> {
        let mut entries = self.entries.lock().await;
        let Some(old) = entries.remove(rel) else {
            return Ok(false);
        };
        if let Err(e) = persist(&self.path, &entries).await {
            entries.insert(rel.clone(), old);
            return Err(e);
        }
        Ok(true)
    }

    /// Copy of every entry.
    pub async fn snapshot(&self) -> BTreeMap<DatasetPath, Etag> {
        self.entries.lock().await.clone()
    }
}

async fn persist(path: &Path, entries: &Entries) -> StorageResult<()> {
    let json = serde_json::to_vec_pretty(entries).map_err(|e| StorageError::Format(e.to_string()))?;
    write_atomic(path, &json).await
}
