//! Persistent roots table of the subscriber.
//!
//! Stored as a JSON object `name → {name, http, subscribed}` and rewritten
//! atomically on every change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tessera_core::Root;
use tessera_storage::files::write_atomic;
use tessera_storage::{StorageError, StorageResult};
use tokio::sync::RwLock;

type Roots = BTreeMap<String, Root>;

#[derive(Debug)]
pub struct RootsDb {
    path: PathBuf,
    roots: RwLock<Roots>,
}

impl RootsDb {
    /// Load the table at `path`; a missing file is an empty table.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut roots = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<Roots>(&raw).map_err(|e| {
                StorageError::Format(format!("corrupt roots database {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Roots::new(),
            Err(e) => return Err(e.into()),
        };
        for root in roots.values_mut() {
            root.subscribed.get_or_insert(false);
        }
        tracing::debug!(path = %path.display(), roots = roots.len(), "Roots database loaded");
        Ok(Self {
            path,
            roots: RwLock::new(roots),
        })
    }

    pub async fn snapshot(&self) -> Roots {
        self.roots.read().await.clone()
    }

    pub async fn get(&self, name: &str) -> Option<Root> {
        self.roots.read().await.get(name).cloned()
    }

    pub async fn is_subscribed(&self, name: &str) -> bool {
        self.roots
            .read()
            .await
            .get(name)
            .is_some_and(|r| r.subscribed == Some(true))
    }

    /// Names of every root marked as followed.
    pub async fn subscribed(&self) -> Vec<String> {
        self.roots
            .read()
            .await
            .values()
            .filter(|r| r.subscribed == Some(true))
            .map(|r| r.name.clone())
            .collect()
    }

    /// Replace the table with the broker's view, keeping follow flags.
    ///
    /// Returns whether anything changed.
    pub async fn sync(&self, remote: BTreeMap<String, Root>) -> StorageResult<bool> {
        let mut roots = self.roots.write().await;
        let before = roots.clone();

        roots.retain(|name, _| remote.contains_key(name));
        for (name, root) in remote {
            let entry = roots.entry(name).or_insert_with(|| Root {
                subscribed: Some(false),
                ..root.clone()
            });
            entry.http = root.http;
        }

        let changed = *roots != before;
        if changed {
            persist(&self.path, &roots).await?;
        }
        Ok(changed)
    }

    /// Insert or update one root, keeping its follow flag.
    pub async fn upsert(&self, root: Root) -> StorageResult<()> {
        let mut roots = self.roots.write().await;
        let subscribed = roots
            .get(&root.name)
            .and_then(|r| r.subscribed)
            .unwrap_or(false);
        roots.insert(
            root.name.clone(),
            Root {
                subscribed: Some(subscribed),
                ..root
            },
        );
        persist(&self.path, &roots).await
    }

    /// Set the follow flag. Returns `false` when the root is unknown.
    pub async fn set_subscribed(&self, name: &str, subscribed: bool) -> StorageResult<bool> {
        let mut roots = self.roots.write().await;
        let Some(root) = roots.get_mut(name) else {
            return Ok(false);
        };
        if root.subscribed != Some(subscribed) {
            root.subscribed = Some(subscribed);
            persist(&self.path, &roots).await?;
        }
        Ok(true)
    }
}

async fn persist(path: &Path, roots: &Roots) -> StorageResult<()> {
    let raw = serde_json::to_vec_pretty(roots)
        .map_err(|e| StorageError::Format(format!("failed to encode roots: {e}")))?;
    write_atomic(path, &raw).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(entries: &[(&str, &str)]) -> BTreeMap<String, Root> {
        entries
            .iter()
            .map(|(name, http)| (name.to_string(), Root::new(*name, *http)))
            .collect()
    }

    #[tokio::test]
    async fn test_sync_keeps_flags_and_drops_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let db = RootsDb::open(&path).await.unwrap();

        assert!(db.sync(remote(&[("foo", "h:1"), ("bar", "h:2")])).await.unwrap());
        assert!(db.set_subscribed("foo", true).await.unwrap());
        assert!(!db.set_subscribed("nope", true).await.unwrap());

        assert!(db.sync(remote(&[("foo", "h:9")])).await.unwrap());
        let roots = db.snapshot().await;
        assert_eq!(roots.len(), 1);
        assert_eq!(roots["foo"].http, "h:9");
        assert_eq!(roots["foo"].subscribed, Some(true));

        assert!(!db.sync(remote(&[("foo", "h:9")])).await.unwrap());

        let reopened = RootsDb::open(&path).await.unwrap();
        assert_eq!(reopened.subscribed().await, vec!["foo"]);
    }

    #[tokio::test]
    async fn test_upsert_preserves_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let db = RootsDb::open(dir.path().join("db.json")).await.unwrap();

        db.upsert(Root::new("foo", "h:1")).await.unwrap();
        assert!(!db.is_subscribed("foo").await);
        db.set_subscribed("foo", true).await.unwrap();
        db.upsert(Root::new("foo", "h:2")).await.unwrap();

        let root = db.get("foo").await.unwrap();
        assert_eq!(root.http, "h:2");
        assert!(db.is_subscribed("foo").await);
    }

    #[tokio::test]
    async fn test_corrupt_database_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            RootsDb::open(&path).await,
            Err(StorageError::Format(_))
        ));
    }
}
