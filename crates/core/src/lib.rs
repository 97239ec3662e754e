//! Core domain types and shared logic for Tessera.
//!
//! This crate defines the data model used across all other crates:
//! - Dataset paths and identifiers
//! - Array metadata, roots and change events
//! - Etags for change detection
//! - The slice grammar and chunk intersection
//! - Pub/sub frames
//! - Service configuration

pub mod config;
pub mod dataset_path;
pub mod error;
pub mod etag;
pub mod model;
pub mod pubsub;
pub mod slice;

pub use dataset_path::{CONTAINER_SUFFIX, DatasetId, DatasetPath};
pub use error::{Error, Result};
pub use etag::Etag;
pub use model::{ChangeEvent, CodecParams, ContainerInfo, Dtype, Layout, Metadata, Root};
pub use pubsub::{Frame, NEW_ROOT_TOPIC};
pub use slice::{DimRange, Selection, Selector, Slice};

/// Default chunk length for plain files: 1 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Codec name recorded in container metadata.
pub const CODEC_NAME: &str = "zstd";

/// Response header carrying the dtype of a downloaded region.
pub const DTYPE_HEADER: &str = "x-tessera-dtype";

/// Response header carrying the shape of a downloaded region (`3,4`; empty for scalars).
pub const SHAPE_HEADER: &str = "x-tessera-shape";

/// Format a shape for [`SHAPE_HEADER`].
pub fn format_shape(shape: &[u64]) -> String {
    shape
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a [`SHAPE_HEADER`] value.
pub fn parse_shape(value: &str) -> Result<Vec<u64>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(',')
        .map(|dim| {
            dim.trim()
                .parse::<u64>()
                .map_err(|_| Error::InvalidShape(format!("bad shape header: {value:?}")))
        })
        .collect()
}
