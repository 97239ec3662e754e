//! Chunked array container format.
//!
//! ```text
//! +------+---------+------------+-------------+----------------------+
//! | TSRA | version | header len | JSON header | compressed chunks... |
//! | 4 B  | u32 LE  | u32 LE     |             |                      |
//! +------+---------+------------+-------------+----------------------+
//! ```
//!
//! The header records the array layout, the codec and a chunk table of
//! `(offset, length)` pairs relative to the start of the chunk section.
//! Containers built from a plain file also record the etag of that file. Every
//! chunk decompresses to exactly `prod(chunks) * typesize` bytes; edge chunks
//! are zero-padded. The same input always produces the same bytes.

use crate::error::{StorageError, StorageResult};
use crate::files::write_atomic_blocking;
use crate::region;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tessera_core::{CODEC_NAME, CodecParams, Dtype, Etag, Layout, Metadata, Selection};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::instrument;

const MAGIC: &[u8; 4] = b"TSRA";
const FORMAT_VERSION: u32 = 1;
const PREAMBLE_LEN: u64 = 12;

/// Upper bound on the JSON header, to reject garbage before allocating.
const MAX_HEADER_LEN: u32 = 64 * 1024 * 1024;

/// Upper bound on the decompressed size of one chunk.
const MAX_CHUNK_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Header {
    dtype: Dtype,
    shape: Vec<u64>,
    chunks: Vec<u64>,
    blocks: Vec<u64>,
    codec: String,
    clevel: i32,
    chunk_table: Vec<(u64, u64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<Etag>,
}

/// Create a container at `path` holding `data`, laid out as `layout`.
///
/// `data` is the whole array in C order and must hold exactly
/// `layout.size()` bytes. CPU bound; call it from the blocking pool.
pub fn create(path: &Path, layout: &Layout, clevel: i32, data: &[u8]) -> StorageResult<Container> {
    create_from_source(path, layout, clevel, data, None)
}

/// Like [`create`], recording the etag of the file `data` was read from.
pub fn create_from_source(
    path: &Path,
    layout: &Layout,
    clevel: i32,
    data: &[u8],
    source: Option<Etag>,
) -> StorageResult<Container> {
    if layout.chunksize() > MAX_CHUNK_BYTES {
        return Err(StorageError::Format(format!(
            "chunk of {} bytes exceeds maximum",
            layout.chunksize()
        )));
    }
    if data.len() as u64 != layout.size() {
        return Err(StorageError::Format(format!(
            "array data has {} bytes, layout needs {}",
            data.len(),
            layout.size()
        )));
    }

    let mut chunk_table = Vec::with_capacity(layout.nchunks() as usize);
    let mut body = Vec::new();
    for n in 0..layout.nchunks() {
        let raw = region::extract_chunk(layout, data, n);
        let compressed = zstd::bulk::compress(&raw, clevel)
            .map_err(|e| StorageError::Codec(format!("compressing chunk {n}: {e}")))?;
        chunk_table.push((body.len() as u64, compressed.len() as u64));
        body.extend_from_slice(&compressed);
    }

    let header = Header {
        dtype: layout.dtype,
        shape: layout.shape.clone(),
        chunks: layout.chunks.clone(),
        blocks: layout.blocks.clone(),
        codec: CODEC_NAME.to_string(),
        clevel,
        chunk_table,
        source,
    };
    let header_json =
        serde_json::to_vec(&header).map_err(|e| StorageError::Format(e.to_string()))?;

    let mut file = Vec::with_capacity(PREAMBLE_LEN as usize + header_json.len() + body.len());
    file.extend_from_slice(MAGIC);
    file.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    file.extend_from_slice(&(header_json.len() as u32).to_le_bytes());
    file.extend_from_slice(&header_json);
    file.extend_from_slice(&body);
    write_atomic_blocking(path, &file)?;

    tracing::debug!(
        path = %path.display(),
        nchunks = header.chunk_table.len(),
        size = file.len(),
        "Container written"
    );

    Ok(Container {
        path: path.to_path_buf(),
        layout: layout.clone(),
        data_offset: PREAMBLE_LEN + header_json.len() as u64,
        header,
    })
}

/// Decompress one chunk, checking it has the expected length.
pub fn decompress_chunk(data: &[u8], expected_len: usize) -> StorageResult<Vec<u8>> {
    let raw = zstd::bulk::decompress(data, expected_len)
        .map_err(|e| StorageError::Codec(format!("decompressing chunk: {e}")))?;
    if raw.len() != expected_len {
        return Err(StorageError::Codec(format!(
            "chunk decompressed to {} bytes, expected {expected_len}",
            raw.len()
        )));
    }
    Ok(raw)
}

/// An open container file.
#[derive(Clone, Debug)]
pub struct Container {
    path: PathBuf,
    layout: Layout,
    data_offset: u64,
    header: Header,
}

impl Container {
    /// Open a container and parse its header.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| StorageError::from_io(e, path.display()))?;

        let mut preamble = [0u8; PREAMBLE_LEN as usize];
        file.read_exact(&mut preamble)
            .await
            .map_err(|_| StorageError::Format(format!("truncated preamble: {}", path.display())))?;
        if &preamble[0..4] != MAGIC {
            return Err(StorageError::Format(format!(
                "bad magic in {}",
                path.display()
            )));
        }
        let version = u32::from_le_bytes([preamble[4], preamble[5], preamble[6], preamble[7]]);
        if version != FORMAT_VERSION {
            return Err(StorageError::Format(format!(
                "unsupported format version {version}"
            )));
        }
        let header_len = u32::from_le_bytes([preamble[8], preamble[9], preamble[10], preamble[11]]);
        if header_len > MAX_HEADER_LEN {
            return Err(StorageError::Format(format!(
                "header length {header_len} exceeds maximum"
            )));
        }

        let mut header_json = vec![0u8; header_len as usize];
        file.read_exact(&mut header_json)
            .await
            .map_err(|_| StorageError::Format(format!("truncated header: {}", path.display())))?;
        let header: Header = serde_json::from_slice(&header_json)
            .map_err(|e| StorageError::Format(format!("invalid header: {e}")))?;

        let layout = Layout::new(
            header.dtype,
            header.shape.clone(),
            header.chunks.clone(),
            header.blocks.clone(),
        )?;
        if layout.chunksize() > MAX_CHUNK_BYTES {
            return Err(StorageError::Format(format!(
                "chunk of {} bytes exceeds maximum",
                layout.chunksize()
            )));
        }
        if header.chunk_table.len() as u64 != layout.nchunks() {
            return Err(StorageError::Format(format!(
                "chunk table has {} entries, layout has {} chunks",
                header.chunk_table.len(),
                layout.nchunks()
            )));
        }

        let data_offset = PREAMBLE_LEN + u64::from(header_len);
        let file_len = file.metadata().await?.len();
        for (n, &(offset, len)) in header.chunk_table.iter().enumerate() {
            let end = data_offset
                .checked_add(offset)
                .and_then(|start| start.checked_add(len));
            if !end.is_some_and(|end| end <= file_len) {
                return Err(StorageError::Format(format!(
                    "chunk {n} lies outside {} ({file_len} bytes)",
                    path.display()
                )));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            layout,
            data_offset,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn nchunks(&self) -> u64 {
        self.header.chunk_table.len() as u64
    }

    /// Etag of the plain file this container was compressed from.
    pub fn source(&self) -> Option<&Etag> {
        self.header.source.as_ref()
    }

    /// Sum of compressed chunk lengths.
    pub fn cbytes(&self) -> u64 {
        self.header.chunk_table.iter().map(|(_, len)| len).sum()
    }

    /// Read the raw compressed bytes of chunk `n`.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn read_chunk(&self, n: u64) -> StorageResult<Bytes> {
        let &(offset, len) =
            self.header
                .chunk_table
                .get(n as usize)
                .ok_or_else(|| StorageError::NoSuchChunk {
                    path: self.path.display().to_string(),
                    nchunk: n,
                    nchunks: self.nchunks(),
                })?;

        let mut file = fs::File::open(&self.path)
            .await
            .map_err(|e| StorageError::from_io(e, self.path.display()))?;
        file.seek(std::io::SeekFrom::Start(self.data_offset + offset))
            .await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Decompress a chunk of this container.
    pub fn decompress_chunk(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        decompress_chunk(data, self.layout.chunksize() as usize)
    }

    /// Read and assemble a selected region.
    pub async fn read_region(&self, selection: &Selection) -> StorageResult<Vec<u8>> {
        let mut chunks = std::collections::HashMap::new();
        for n in selection.chunk_indices(&self.layout) {
            chunks.insert(n, self.read_chunk(n).await?);
        }
        region::assemble(&self.layout, selection, |n| {
            let data = chunks
                .get(&n)
                .ok_or_else(|| StorageError::Codec(format!("chunk {n} was not read")))?;
            self.decompress_chunk(data)
        })
    }

    /// Metadata record describing this container.
    pub fn metadata(&self) -> Metadata {
        let cparams = CodecParams {
            codec: self.header.codec.clone(),
            clevel: self.header.clevel,
            typesize: self.layout.typesize(),
        };
        Metadata::from_layout(
            &self.layout,
            cparams,
            self.cbytes(),
            self.path.display().to_string(),
        )
    }
}
