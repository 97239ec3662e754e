//! Dataset path types and parsing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix carried by array container files.
pub const CONTAINER_SUFFIX: &str = ".tsr";

/// A dataset path relative to a root (`dir/file.txt`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetPath(String);

impl DatasetPath {
    /// Create from a string, validating format.
    ///
    /// Only relative paths made of normal components are accepted, so a
    /// dataset path can never address anything outside its root.
    pub fn new(path: impl Into<String>) -> crate::Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(crate::Error::InvalidPath(
                "path cannot be empty".to_string(),
            ));
        }
        if path.starts_with('/') {
            return Err(crate::Error::InvalidPath(format!(
                "path is not relative: {path}"
            )));
        }
        if path.contains('\\') || path.contains('\0') {
            return Err(crate::Error::InvalidPath(format!(
                "invalid character in path: {path}"
            )));
        }
        for component in path.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(crate::Error::InvalidPath(format!(
                    "unsafe path component {component:?} in: {path}"
                )));
            }
        }
        Ok(Self(path))
    }

    /// Get the path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the path names an array container rather than a plain file.
    pub fn is_container(&self) -> bool {
        self.0.ends_with(CONTAINER_SUFFIX)
    }

    /// Iterate over the path components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl TryFrom<String> for DatasetPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<DatasetPath> for String {
    fn from(value: DatasetPath) -> Self {
        value.0
    }
}

impl fmt::Debug for DatasetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetPath({self})")
    }
}

impl fmt::Display for DatasetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dataset addressed across the network (`root/relpath`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatasetId {
    root: String,
    path: DatasetPath,
}

impl DatasetId {
    /// Parse a `root/relpath` string, splitting at the first `/`.
    pub fn parse(id: &str) -> crate::Result<Self> {
        let (root, path) = id
            .split_once('/')
            .ok_or_else(|| crate::Error::InvalidPath(format!("missing root name in: {id}")))?;
        Self::new(root, DatasetPath::new(path)?)
    }

    /// Create from components.
    pub fn new(root: impl Into<String>, path: DatasetPath) -> crate::Result<Self> {
        let root = root.into();
        if root.is_empty() || root.contains('/') || root == "." || root == ".." {
            return Err(crate::Error::InvalidPath(format!(
                "invalid root name: {root:?}"
            )));
        }
        Ok(Self { root, path })
    }

    /// Get the root name.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Get the path inside the root.
    pub fn path(&self) -> &DatasetPath {
        &self.path
    }

    /// Get the full `root/relpath` string.
    pub fn to_id_string(&self) -> String {
        format!("{}/{}", self.root, self.path)
    }
}

impl fmt::Debug for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetId({self})")
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.root, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_nested_path() {
        let path = DatasetPath::new("dir/sub/data.tsr").unwrap();
        assert_eq!(path.as_str(), "dir/sub/data.tsr");
        assert!(path.is_container());
        assert_eq!(path.components().count(), 3);
    }

    #[test]
    fn test_plain_file_is_not_container() {
        let path = DatasetPath::new("README.md").unwrap();
        assert!(!path.is_container());
    }

    #[test]
    fn test_rejects_traversal() {
        assert!(DatasetPath::new("../etc/passwd").is_err());
        assert!(DatasetPath::new("a/../../b").is_err());
        assert!(DatasetPath::new("a/./b").is_err());
    }

    #[test]
    fn test_rejects_absolute_and_empty() {
        assert!(DatasetPath::new("/etc/passwd").is_err());
        assert!(DatasetPath::new("").is_err());
        assert!(DatasetPath::new("a//b").is_err());
        assert!(DatasetPath::new("a\\b").is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: DatasetPath = serde_json::from_str("\"a/b.txt\"").unwrap();
        assert_eq!(ok.as_str(), "a/b.txt");
        assert!(serde_json::from_str::<DatasetPath>("\"../x\"").is_err());
    }

    #[test]
    fn test_dataset_id_splits_at_first_slash() {
        let id = DatasetId::parse("foo/dir/a.txt").unwrap();
        assert_eq!(id.root(), "foo");
        assert_eq!(id.path().as_str(), "dir/a.txt");
        assert_eq!(id.to_id_string(), "foo/dir/a.txt");
    }

    #[test]
    fn test_dataset_id_requires_root_and_path() {
        assert!(DatasetId::parse("foo").is_err());
        assert!(DatasetId::parse("/a.txt").is_err());
        assert!(DatasetId::parse("foo/").is_err());
    }
}
