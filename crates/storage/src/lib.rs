//! On-disk state for Tessera.
//!
//! This crate provides:
//! - The chunked array container format (zstd-compressed chunks)
//! - The publisher's compression cache and etag ledger
//! - The subscriber's chunk cache
//! - Region assembly from decompressed chunks

pub mod chunk_cache;
pub mod compress;
pub mod container;
pub mod error;
pub mod files;
pub mod ledger;
pub mod region;

pub use chunk_cache::ChunkCache;
pub use compress::CompressionCache;
pub use container::{Container, decompress_chunk};
pub use error::{StorageError, StorageResult};
pub use ledger::Ledger;
pub use region::assemble;
