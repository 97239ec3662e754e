//! Metadata index keyed by `root/relpath`.
//!
//! Stored as a JSON object `id → {metadata, etag}` next to the roots
//! database and rewritten atomically on every change, so cached chunks stay
//! valid across restarts as long as the publisher etag still matches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tessera_core::{DatasetId, Etag, Metadata};
use tessera_storage::files::write_atomic;
use tessera_storage::{StorageError, StorageResult};
use tokio::sync::RwLock;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub metadata: Metadata,
    /// Publisher etag of the version `metadata` describes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<Etag>,
}

type Entries = BTreeMap<DatasetId, Entry>;

#[derive(Debug)]
pub struct MetadataIndex {
    path: PathBuf,
    entries: RwLock<Entries>,
}

impl MetadataIndex {
    /// Load the index at `path`; a missing file is an empty index.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let stored = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<BTreeMap<String, Entry>>(&raw).map_err(|e| {
                StorageError::Format(format!("corrupt metadata index {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Entries::new();
        for (key, entry) in stored {
            match DatasetId::parse(&key) {
                Ok(id) => {
                    entries.insert(id, entry);
                }
                Err(e) => tracing::warn!(id = %key, error = %e, "Skipping invalid index entry"),
            }
        }
        tracing::debug!(path = %path.display(), entries = entries.len(), "Metadata index loaded");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub async fn get(&self, id: &DatasetId) -> Option<Entry> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn etag(&self, id: &DatasetId) -> Option<Etag> {
        self.entries
            .read()
            .await
            .get(id)
            .and_then(|e| e.etag.clone())
    }

    pub async fn insert(&self, id: DatasetId, entry: Entry) -> StorageResult<Option<Entry>> {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(id, entry);
        persist(&self.path, &entries).await?;
        Ok(previous)
    }

    pub async fn remove(&self, id: &DatasetId) -> StorageResult<Option<Entry>> {
        let mut entries = self.entries.write().await;
        let previous = entries.remove(id);
        if previous.is_some() {
            persist(&self.path, &entries).await?;
        }
        Ok(previous)
    }

    pub async fn ids(&self) -> Vec<DatasetId> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn ids_in_root(&self, root: &str) -> Vec<DatasetId> {
        self.entries
            .read()
            .await
            .keys()
            .filter(|id| id.root() == root)
            .cloned()
            .collect()
    }
}

async fn persist(path: &Path, entries: &Entries) -> StorageResult<()> {
    let stored: BTreeMap<String, &Entry> = entries
        .iter()
        .map(|(id, entry)| (id.to_string(), entry))
        .collect();
    let raw = serde_json::to_vec(&stored)
        .map_err(|e| StorageError::Format(format!("failed to encode metadata index: {e}")))?;
    write_atomic(path, &raw).await
}
