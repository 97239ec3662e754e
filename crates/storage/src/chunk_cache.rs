//! Subscriber-side cache of compressed chunks.
//!
//! Layout: `cache/<root>/<relpath>.chunks/<n>`. Chunks are fetched lazily,
//! written atomically and only dropped when their dataset changes.

use crate::error::{StorageError, StorageResult};
use crate::files::write_atomic;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tessera_core::DatasetId;
use tokio::fs;
use tracing::instrument;

const CHUNKS_SUFFIX: &str = ".chunks";

#[derive(Clone, Debug)]
pub struct ChunkCache {
    dir: PathBuf,
}

impl ChunkCache {
    pub async fn new(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding the cached chunks of one dataset.
    pub fn dataset_dir(&self, id: &DatasetId) -> PathBuf {
        self.dir
            .join(id.root())
            .join(format!("{}{CHUNKS_SUFFIX}", id.path().as_str()))
    }

    fn chunk_path(&self, id: &DatasetId, n: u64) -> PathBuf {
        self.dataset_dir(id).join(n.to_string())
    }

    pub async fn get(&self, id: &DatasetId, n: u64) -> StorageResult<Option<Bytes>> {
        match fs::read(self.chunk_path(id, n)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn contains(&self, id: &DatasetId, n: u64) -> StorageResult<bool> {
        fs::try_exists(self.chunk_path(id, n))
            .await
            .map_err(StorageError::Io)
    }

    #[instrument(skip(self, data), fields(dataset = %id, size = data.len()))]
    pub async fn put(&self, id: &DatasetId, n: u64, data: &[u8]) -> StorageResult<()> {
        write_atomic(&self.chunk_path(id, n), data).await
    }

    /// Drop every cached chunk of a dataset.
    #[instrument(skip(self), fields(dataset = %id))]
    pub async fn purge(&self, id: &DatasetId) -> StorageResult<()> {
        match fs::remove_dir_all(self.dataset_dir(id)).await {
            Ok(()) => {
                tracing::debug!("Purged cached chunks");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
