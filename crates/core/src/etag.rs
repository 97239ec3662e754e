//! Change-detection fingerprints for filesystem entries.
//!
//! An etag is `"{mtime}:{size}"`, with `mtime` in fractional seconds since
//! the Unix epoch. Two observations with equal etags are assumed to be the
//! same content. This is a best-effort check: a rewrite that preserves both
//! the modification time and the size (clock skew, `touch -r` after an
//! in-place edit) goes unnoticed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Fingerprint of a filesystem entry.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(String);

impl Etag {
    /// Build an etag from a modification time and a size.
    pub fn from_parts(mtime: SystemTime, size: u64) -> Self {
        let secs = match mtime.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs_f64(),
            Err(e) => -e.duration().as_secs_f64(),
        };
        Self(format!("{secs}:{size}"))
    }

    /// Build an etag from filesystem metadata.
    pub fn from_metadata(meta: &std::fs::Metadata) -> std::io::Result<Self> {
        Ok(Self::from_parts(meta.modified()?, meta.len()))
    }

    /// Wrap an etag string received from a peer (e.g. an `If-None-Match` header).
    pub fn from_header(value: &str) -> Self {
        Self(value.trim().trim_matches('"').to_string())
    }

    /// Get the etag string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Etag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Etag({})", self.0)
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
