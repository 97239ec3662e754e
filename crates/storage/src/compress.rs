//! Publisher-side compression cache.
//!
//! Plain files under the root are compressed into containers under a cache
//! directory that mirrors the root (`root/a/b.txt` → `cache/a/b.txt.tsr`).
//! Files that already are containers are served in place. A cached copy is
//! valid while the etag recorded in it matches the source file.

use crate::container::{self, Container};
use crate::error::{StorageError, StorageResult};
use crate::files::contained_path;
use std::path::{Path, PathBuf};
use tessera_core::{CONTAINER_SUFFIX, DatasetPath, Etag, Layout, Metadata};
use tokio::fs;
use tracing::instrument;

/// Maps dataset paths to containers, compressing plain files on demand.
#[derive(Clone, Debug)]
pub struct CompressionCache {
    root: PathBuf,
    cache_dir: PathBuf,
    chunk_size: u64,
    clevel: i32,
}

impl CompressionCache {
    /// Create a cache, creating the cache directory when absent.
    pub async fn new(
        root: impl AsRef<Path>,
        cache_dir: impl AsRef<Path>,
        chunk_size: u64,
        clevel: i32,
    ) -> StorageResult<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        fs::create_dir_all(&cache_dir).await?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            cache_dir,
            chunk_size,
            clevel,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Location of the source file under the root.
    pub fn source_path(&self, rel: &DatasetPath) -> StorageResult<PathBuf> {
        contained_path(&self.root, rel)
    }

    /// Location of the container serving `rel`.
    pub fn container_path(&self, rel: &DatasetPath) -> StorageResult<PathBuf> {
        if rel.is_container() {
            self.source_path(rel)
        } else {
            Ok(self
                .cache_dir
                .join(format!("{}{CONTAINER_SUFFIX}", rel.as_str())))
        }
    }

    /// Make sure an up-to-date container exists for `rel` and return its path.
    ///
    /// Plain files are (re)compressed when the cached copy is missing,
    /// unreadable or was built from a different version of the source.
    #[instrument(skip(self), fields(path = %rel))]
    pub async fn ensure_compressed(&self, rel: &DatasetPath) -> StorageResult<PathBuf> {
        let source = self.source_path(rel)?;
        let source_meta = fs::metadata(&source)
            .await
            .map_err(|e| StorageError::from_io(e, rel))?;
        if !source_meta.is_file() {
            return Err(StorageError::NotFound(rel.to_string()));
        }
        if rel.is_container() {
            return Ok(source);
        }

        let cached = self.container_path(rel)?;
        let etag = Etag::from_metadata(&source_meta)?;
        if is_current(&cached, &etag).await? {
            return Ok(cached);
        }

        let chunk_size = self.chunk_size;
        let clevel = self.clevel;
        let target = cached.clone();
        tokio::task::spawn_blocking(move || {
            let data = std::fs::read(&source)?;
            let layout = Layout::for_bytes(data.len() as u64, chunk_size)?;
            container::create_from_source(&target, &layout, clevel, &data, Some(etag))
        })
        .await
        .map_err(StorageError::join)??;

        tracing::info!(cached = %cached.display(), "Compressed dataset");
        Ok(cached)
    }

    /// Open the container serving `rel`, compressing it first if needed.
    pub async fn open(&self, rel: &DatasetPath) -> StorageResult<Container> {
        let path = self.ensure_compressed(rel).await?;
        Container::open(path).await
    }

    /// Metadata of the container serving `rel`.
    pub async fn metadata(&self, rel: &DatasetPath) -> StorageResult<Metadata> {
        Ok(self.open(rel).await?.metadata())
    }

    /// Delete the cached copy of `rel`, if any.
    #[instrument(skip(self), fields(path = %rel))]
    pub async fn remove(&self, rel: &DatasetPath) -> StorageResult<()> {
        if rel.is_container() {
            return Ok(());
        }
        let cached = self.container_path(rel)?;
        match fs::remove_file(&cached).await {
            Ok(()) => {
                tracing::debug!(cached = %cached.display(), "Removed cached container");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether `cached` was compressed from the source version `etag`.
async fn is_current(cached: &Path, etag: &Etag) -> StorageResult<bool> {
    match Container::open(cached).await {
        Ok(container) => Ok(container.source() == Some(etag)),
        Err(e) if e.is_not_found() => Ok(false),
        Err(StorageError::Io(e)) => Err(e.into()),
        Err(e) => {
            tracing::warn!(cached = %cached.display(), error = %e, "Rebuilding unreadable cached container");
            Ok(false)
        }
    }
}
