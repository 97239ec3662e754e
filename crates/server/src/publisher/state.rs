//! Shared publisher state.

use anyhow::{Context, Result};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::DatasetPath;
use tessera_core::config::PublisherConfig;
use tessera_storage::files::{self, to_dataset_path};
use tessera_storage::{CompressionCache, Ledger, StorageResult};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// State shared by the HTTP handlers and the publish workers.
#[derive(Clone)]
pub struct PublisherState {
    pub config: Arc<PublisherConfig>,
    /// Canonical root directory.
    pub root: PathBuf,
    pub ledger: Arc<Ledger>,
    pub cache: CompressionCache,
    skip: Arc<Vec<PathBuf>>,
    /// Serializes workers handling the same dataset path.
    locks: Arc<DashMap<DatasetPath, Arc<Mutex<()>>>>,
}

impl PublisherState {
    /// Open the ledger and the compression cache for `config`.
    pub async fn open(mut config: PublisherConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid publisher configuration: {e}"))?;

        let root = tokio::fs::canonicalize(&config.root)
            .await
            .with_context(|| format!("root directory not found: {}", config.root.display()))?;
        tokio::fs::create_dir_all(&config.statedir)
            .await
            .with_context(|| format!("failed to create {}", config.statedir.display()))?;
        config.statedir = tokio::fs::canonicalize(&config.statedir).await?;
        let statedir = config.statedir.clone();

        let ledger = Ledger::open(config.ledger_path())
            .await
            .context("failed to open ledger")?;
        let cache = CompressionCache::new(
            &root,
            config.cache_dir(),
            config.chunk_size,
            config.clevel,
        )
        .await
        .context("failed to create compression cache")?;

        tracing::info!(
            root = %root.display(),
            statedir = %statedir.display(),
            entries = ledger.snapshot().await.len(),
            "Publisher state opened"
        );

        Ok(Self {
            config: Arc::new(config),
            root,
            ledger: Arc::new(ledger),
            cache,
            // The state directory may live inside the root.
            skip: Arc::new(vec![statedir]),
            locks: Arc::new(DashMap::new()),
        })
    }

    /// Hold exclusive access to `path` until the guard is dropped.
    pub(crate) async fn lock(&self, path: &DatasetPath) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(path.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Topic this publisher announces changes on.
    pub fn topic(&self) -> &str {
        &self.config.name
    }

    pub fn skip_dirs(&self) -> &[PathBuf] {
        &self.skip
    }

    /// Every publishable file under the root, sorted.
    pub async fn walk(&self) -> StorageResult<Vec<(DatasetPath, std::fs::Metadata)>> {
        files::walk(&self.root, &self.skip).await
    }

    /// Map an absolute path reported by the watcher to a dataset path.
    pub fn relative(&self, path: &Path) -> Option<DatasetPath> {
        relative_to(&self.root, &self.skip, path)
    }
}

/// Shared by [`PublisherState::relative`] and the watcher thread.
pub(crate) fn relative_to(root: &Path, skip: &[PathBuf], path: &Path) -> Option<DatasetPath> {
    if skip.iter().any(|s| path.starts_with(s)) || files::is_temp_file(path) {
        return None;
    }
    to_dataset_path(path.strip_prefix(root).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path, statedir: &Path) -> PublisherConfig {
        PublisherConfig {
            name: "foo".to_string(),
            root: root.to_path_buf(),
            statedir: statedir.to_path_buf(),
            ..PublisherConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = PublisherState::open(config(&dir.path().join("absent"), dir.path())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_statedir_inside_root_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let state = PublisherState::open(config(dir.path(), &dir.path().join("_state")))
            .await
            .unwrap();

        std::fs::write(state.skip_dirs()[0].join("cache/x.txt"), b"x").unwrap();
        let listed: Vec<String> = state
            .walk()
            .await
            .unwrap()
            .into_iter()
            .map(|(p, _)| p.to_string())
            .collect();
        assert_eq!(listed, vec!["a.txt"]);

        assert_eq!(
            state.relative(&state.root.join("sub/b.txt")).unwrap().as_str(),
            "sub/b.txt"
        );
        assert!(state.relative(&state.skip_dirs()[0].join("db.json")).is_none());
        assert!(state.relative(Path::new("/elsewhere/a.txt")).is_none());
    }

    #[tokio::test]
    async fn test_state_files_live_in_canonical_statedir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("root")).unwrap();
        let relative = dir.path().join("root/../state");
        let state = PublisherState::open(config(&dir.path().join("root"), &relative))
            .await
            .unwrap();

        let statedir = dir.path().join("state").canonicalize().unwrap();
        assert_eq!(state.config.statedir, statedir);
        assert_eq!(state.ledger.path(), statedir.join("db.json"));
        assert_eq!(state.cache.cache_dir(), statedir.join("cache"));
    }
}
