//! Dataset metadata, roots and change events.
//!
//! These types are the JSON contract shared by the three services. Metadata
//! describes one array container exactly as the codec reports it and must
//! survive a publisher → subscriber round trip unchanged.

use crate::dataset_path::DatasetPath;
use crate::etag::Etag;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element type of an array dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

impl Dtype {
    /// Size of one element in bytes.
    pub fn typesize(self) -> u64 {
        match self {
            Self::Bool | Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Int64 | Self::Uint64 | Self::Float64 => 8,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Int64 => "int64",
            Self::Uint64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl FromStr for Dtype {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Ok(match s {
            "bool" => Self::Bool,
            "int8" => Self::Int8,
            "uint8" => Self::Uint8,
            "int16" => Self::Int16,
            "uint16" => Self::Uint16,
            "int32" => Self::Int32,
            "uint32" => Self::Uint32,
            "int64" => Self::Int64,
            "uint64" => Self::Uint64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            other => return Err(crate::Error::UnknownDtype(other.to_string())),
        })
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn product(dims: &[u64]) -> u64 {
    dims.iter().product()
}

fn checked_product(dims: &[u64]) -> Option<u64> {
    dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d))
}

fn round_up(value: u64, multiple: u64) -> u64 {
    value.div_ceil(multiple) * multiple
}

/// Logical layout of an array: element type, shape and partitioning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub dtype: Dtype,
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub blocks: Vec<u64>,
}

impl Layout {
    /// Create a validated layout.
    pub fn new(dtype: Dtype, shape: Vec<u64>, chunks: Vec<u64>, blocks: Vec<u64>) -> crate::Result<Self> {
        if chunks.len() != shape.len() || blocks.len() != shape.len() {
            return Err(crate::Error::InvalidShape(format!(
                "shape has {} dims, chunks {}, blocks {}",
                shape.len(),
                chunks.len(),
                blocks.len()
            )));
        }
        for (i, (&c, &b)) in chunks.iter().zip(&blocks).enumerate() {
            if c == 0 || b == 0 {
                return Err(crate::Error::InvalidShape(format!(
                    "chunk and block extents must be positive (dim {i})"
                )));
            }
            if b > c {
                return Err(crate::Error::InvalidShape(format!(
                    "block extent {b} exceeds chunk extent {c} (dim {i})"
                )));
            }
        }
        let layout = Self {
            dtype,
            shape,
            chunks,
            blocks,
        };
        layout.check_extents()?;
        Ok(layout)
    }

    /// Every derived size must fit in a `u64`, including the padded total.
    fn check_extents(&self) -> crate::Result<()> {
        let typesize = self.typesize();
        let padded = |dims: &[u64], by: &[u64]| {
            dims.iter()
                .zip(by)
                .map(|(&d, &c)| d.div_ceil(c).checked_mul(c))
                .collect::<Option<Vec<u64>>>()
        };
        let fits = padded(&self.shape, &self.chunks)
            .and_then(|ext| checked_product(&ext))
            .and_then(|items| items.checked_mul(typesize))
            .is_some()
            && padded(&self.chunks, &self.blocks).is_some()
            && checked_product(&self.chunks)
                .and_then(|items| items.checked_mul(typesize))
                .is_some();
        if fits {
            Ok(())
        } else {
            Err(crate::Error::InvalidShape(format!(
                "layout too large: shape {:?}, chunks {:?}",
                self.shape, self.chunks
            )))
        }
    }

    /// Layout used for plain files: a 1-D `uint8` array split in `chunk_len` byte chunks.
    pub fn for_bytes(len: u64, chunk_len: u64) -> crate::Result<Self> {
        let chunk = len.clamp(1, chunk_len.max(1));
        Self::new(Dtype::Uint8, vec![len], vec![chunk], vec![chunk])
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn typesize(&self) -> u64 {
        self.dtype.typesize()
    }

    /// Shape padded up to whole chunks.
    pub fn ext_shape(&self) -> Vec<u64> {
        self.shape
            .iter()
            .zip(&self.chunks)
            .map(|(&s, &c)| round_up(s, c))
            .collect()
    }

    /// Chunk shape padded up to whole blocks.
    pub fn ext_chunks(&self) -> Vec<u64> {
        self.chunks
            .iter()
            .zip(&self.blocks)
            .map(|(&c, &b)| round_up(c, b))
            .collect()
    }

    /// Number of chunks along each dimension.
    pub fn chunk_grid(&self) -> Vec<u64> {
        self.shape
            .iter()
            .zip(&self.chunks)
            .map(|(&s, &c)| s.div_ceil(c))
            .collect()
    }

    pub fn nchunks(&self) -> u64 {
        product(&self.chunk_grid())
    }

    /// Elements held by one (padded) chunk.
    pub fn chunk_items(&self) -> u64 {
        product(&self.chunks)
    }

    /// Nominal uncompressed bytes per chunk.
    pub fn chunksize(&self) -> u64 {
        self.chunk_items() * self.typesize()
    }

    pub fn blocksize(&self) -> u64 {
        product(&self.blocks) * self.typesize()
    }

    /// Logical uncompressed size in bytes.
    pub fn size(&self) -> u64 {
        product(&self.shape) * self.typesize()
    }
}

/// Codec parameters of a container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodecParams {
    pub codec: String,
    pub clevel: i32,
    pub typesize: u64,
}

/// Storage-level description of a container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub blocksize: u64,
    /// Compressed bytes of all chunks.
    pub cbytes: u64,
    /// Elements per chunk.
    pub chunkshape: u64,
    pub chunksize: u64,
    pub contiguous: bool,
    pub cparams: CodecParams,
    pub cratio: f64,
    /// Uncompressed bytes of all (padded) chunks.
    pub nbytes: u64,
    pub typesize: u64,
    /// Backing file of the container on the publisher.
    pub urlpath: String,
    pub nchunks: u64,
}

/// Metadata of one array dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub dtype: Dtype,
    pub ndim: usize,
    pub shape: Vec<u64>,
    pub ext_shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub ext_chunks: Vec<u64>,
    pub blocks: Vec<u64>,
    pub blocksize: u64,
    pub chunksize: u64,
    pub schunk: ContainerInfo,
    pub size: u64,
}

impl Metadata {
    /// Derive the full metadata record from a layout and codec statistics.
    pub fn from_layout(layout: &Layout, cparams: CodecParams, cbytes: u64, urlpath: String) -> Self {
        let nchunks = layout.nchunks();
        let nbytes = nchunks * layout.chunksize();
        let cratio = if cbytes == 0 {
            0.0
        } else {
            nbytes as f64 / cbytes as f64
        };
        Self {
            dtype: layout.dtype,
            ndim: layout.ndim(),
            shape: layout.shape.clone(),
            ext_shape: layout.ext_shape(),
            chunks: layout.chunks.clone(),
            ext_chunks: layout.ext_chunks(),
            blocks: layout.blocks.clone(),
            blocksize: layout.blocksize(),
            chunksize: layout.chunksize(),
            schunk: ContainerInfo {
                blocksize: layout.blocksize(),
                cbytes,
                chunkshape: layout.chunk_items(),
                chunksize: layout.chunksize(),
                contiguous: true,
                cparams,
                cratio,
                nbytes,
                typesize: layout.typesize(),
                urlpath,
                nchunks,
            },
            size: layout.size(),
        }
    }

    /// Rebuild the logical layout described by this metadata.
    pub fn layout(&self) -> crate::Result<Layout> {
        Layout::new(
            self.dtype,
            self.shape.clone(),
            self.chunks.clone(),
            self.blocks.clone(),
        )
    }
}

/// A named collection of datasets served by one publisher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub name: String,
    /// Publisher HTTP address (`host:port`).
    pub http: String,
    /// Only set by the subscriber.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<bool>,
}

impl Root {
    pub fn new(name: impl Into<String>, http: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            http: http.into(),
            subscribed: None,
        }
    }
}

/// Announcement that a dataset was created, updated or deleted.
///
/// Carries metadata and the publisher etag for creations and updates; a
/// bare path means deletion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: DatasetPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<Etag>,
}

impl ChangeEvent {
    pub fn updated(path: DatasetPath, metadata: Metadata, etag: Etag) -> Self {
        Self {
            path,
            metadata: Some(metadata),
            etag: Some(etag),
        }
    }

    pub fn deleted(path: DatasetPath) -> Self {
        Self {
            path,
            metadata: None,
            etag: None,
        }
    }

    pub fn is_deletion(&self) -> bool {
        self.metadata.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cparams() -> CodecParams {
        CodecParams {
            codec: "zstd".to_string(),
            clevel: 3,
            typesize: 8,
        }
    }

    #[test]
    fn test_layout_derivations() {
        let layout = Layout::new(Dtype::Float64, vec![10, 7], vec![4, 5], vec![2, 5]).unwrap();
        assert_eq!(layout.ext_shape(), vec![12, 10]);
        assert_eq!(layout.chunk_grid(), vec![3, 2]);
        assert_eq!(layout.nchunks(), 6);
        assert_eq!(layout.chunksize(), 4 * 5 * 8);
        assert_eq!(layout.blocksize(), 2 * 5 * 8);
        assert_eq!(layout.size(), 10 * 7 * 8);
    }

    #[test]
    fn test_layout_rejects_mismatched_dims() {
        assert!(Layout::new(Dtype::Int32, vec![10], vec![4, 4], vec![4]).is_err());
        assert!(Layout::new(Dtype::Int32, vec![10], vec![0], vec![1]).is_err());
        assert!(Layout::new(Dtype::Int32, vec![10], vec![4], vec![8]).is_err());
    }

    #[test]
    fn test_layout_rejects_overflowing_extents() {
        let huge = 1u64 << 32;
        assert!(Layout::new(Dtype::Uint8, vec![huge; 3], vec![1; 3], vec![1; 3]).is_err());
        assert!(Layout::new(Dtype::Float64, vec![u64::MAX], vec![u64::MAX], vec![1]).is_err());
        assert!(Layout::new(Dtype::Uint8, vec![u64::MAX], vec![2], vec![2]).is_err());
        assert!(Layout::new(Dtype::Uint8, vec![1 << 31; 2], vec![1 << 31; 2], vec![1; 2]).is_ok());
    }

    #[test]
    fn test_layout_for_bytes() {
        let layout = Layout::for_bytes(2500, 1024).unwrap();
        assert_eq!(layout.chunks, vec![1024]);
        assert_eq!(layout.nchunks(), 3);

        let small = Layout::for_bytes(10, 1024).unwrap();
        assert_eq!(small.chunks, vec![10]);
        assert_eq!(small.nchunks(), 1);

        let empty = Layout::for_bytes(0, 1024).unwrap();
        assert_eq!(empty.chunks, vec![1]);
        assert_eq!(empty.nchunks(), 0);
    }

    #[test]
    fn test_metadata_round_trips_through_json() {
        let layout = Layout::new(Dtype::Float64, vec![10, 7], vec![4, 5], vec![2, 5]).unwrap();
        let meta = Metadata::from_layout(&layout, cparams(), 480, "cache/x.tsr".to_string());
        assert_eq!(meta.schunk.nbytes, 6 * 160);
        assert_eq!(meta.schunk.cratio, 2.0);

        let json = serde_json::to_string(&meta).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.layout().unwrap(), layout);
    }

    #[test]
    fn test_dtype_names() {
        assert_eq!("float32".parse::<Dtype>().unwrap(), Dtype::Float32);
        assert!("complex128".parse::<Dtype>().is_err());
        assert_eq!(serde_json::to_string(&Dtype::Uint16).unwrap(), "\"uint16\"");
    }

    #[test]
    fn test_change_event_discriminator() {
        let path = DatasetPath::new("a.txt").unwrap();
        let deleted = ChangeEvent::deleted(path.clone());
        let json = serde_json::to_value(&deleted).unwrap();
        assert_eq!(json, serde_json::json!({"path": "a.txt"}));
        assert!(deleted.is_deletion());

        let layout = Layout::for_bytes(3, 16).unwrap();
        let meta = Metadata::from_layout(&layout, cparams(), 12, String::new());
        let updated = ChangeEvent::updated(path, meta, Etag::from("1.5:3".to_string()));
        let json = serde_json::to_value(&updated).unwrap();
        assert_eq!(json["etag"], "1.5:3");
        let back: ChangeEvent = serde_json::from_value(json).unwrap();
        assert!(!back.is_deletion());
        assert_eq!(back.etag.unwrap().as_str(), "1.5:3");
    }

    #[test]
    fn test_root_omits_subscribed_when_unset() {
        let root = Root::new("foo", "localhost:8001");
        let json = serde_json::to_value(&root).unwrap();
        assert_eq!(json, serde_json::json!({"name": "foo", "http": "localhost:8001"}));
    }
}
