//! Filesystem helpers: atomic writes, contained paths and tree walks.

use crate::error::{StorageError, StorageResult};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tessera_core::DatasetPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Unique sibling temp path used for write-then-rename.
fn temp_path(path: &Path) -> PathBuf {
    let temp_name = format!(".tmp.{}", Uuid::new_v4());
    path.with_file_name(
        path.file_name()
            .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
            .unwrap_or_else(|| temp_name.clone()),
    )
}

/// Whether a file name belongs to an in-flight atomic write.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().contains(".tmp."))
}

/// Atomically replace `path` with `data` (temp file, fsync, rename).
pub async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp = temp_path(path);
    {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(data).await?;
        // Data must be on disk before the rename makes it visible.
        file.sync_all().await?;
    }
    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Blocking counterpart of [`write_atomic`] for use on the blocking pool.
pub fn write_atomic_blocking(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = temp_path(path);
    {
        let mut file = std::fs::File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

/// Resolve a dataset path under `root`, refusing anything that escapes it.
///
/// Existing entries are canonicalized so a symlink pointing outside the root
/// is rejected as well.
pub fn contained_path(root: &Path, rel: &DatasetPath) -> StorageResult<PathBuf> {
    let path = root.join(rel.as_str());
    match std::fs::symlink_metadata(&path) {
        Ok(_) => {
            let root_canonical = root.canonicalize()?;
            let canonical = path
                .canonicalize()
                .map_err(|e| StorageError::from_io(e, rel))?;
            if !canonical.starts_with(&root_canonical) {
                return Err(StorageError::InvalidPath(format!(
                    "resolved path escapes root: {rel}"
                )));
            }
            Ok(path)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path),
        Err(e) => Err(e.into()),
    }
}

/// Convert a path relative to a root into a dataset path.
pub fn to_dataset_path(rel: &Path) -> Option<DatasetPath> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    DatasetPath::new(parts.join("/")).ok()
}

/// Walk `root` recursively and return every regular file, sorted by path.
///
/// Symlinks are ignored, as are directories listed in `skip` and leftover
/// temp files. A missing root yields an empty listing.
pub async fn walk(
    root: &Path,
    skip: &[PathBuf],
) -> StorageResult<Vec<(DatasetPath, std::fs::Metadata)>> {
    let mut results = Vec::new();

    match fs::try_exists(root).await {
        Ok(false) => return Ok(results),
        Ok(true) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
        Err(e) => return Err(StorageError::Io(e)),
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // file_type() does not follow symlinks.
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if !skip.iter().any(|s| path.starts_with(s)) {
                    stack.push(path);
                }
            } else if file_type.is_file()
                && !is_temp_file(&path)
                && let Ok(rel) = path.strip_prefix(root)
            {
                match to_dataset_path(rel) {
                    Some(dataset) => results.push((dataset, entry.metadata().await?)),
                    None => tracing::debug!(path = %path.display(), "Skipping unaddressable file"),
                }
            }
        }
    }

    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}
