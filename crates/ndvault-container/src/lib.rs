//! # ndvault-container
//!
//! Single-file binary container for one dense multi-dimensional array.
//!
//! A container holds a metadata blob, an empty-cell counter and an optional
//! chunked data block. While every cell still holds the fill value the data
//! block is absent and reads synthesize fill values.
//!
//! ## Container Format
//!
//! ```text
//! +------------------+
//! | Header (32B)     |  Magic, version, index offset, index length
//! +------------------+
//! | Slot payloads    |  Meta JSON, compressed chunk payloads
//! +------------------+
//! | Index            |  bincode: meta slot, empty_cells, data layout
//! +------------------+
//! ```
//!
//! Chunks that hold only the fill value have no payload. Every mutation
//! rewrites the file through a temp file plus rename.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod block;
pub mod codec;
pub mod dtype;
pub mod grid;
pub mod options;

pub use block::{cell_count, Block, Bounds};
pub use codec::{ContainerCodec, ContainerStat};
pub use dtype::{DType, Element, Scalar};
pub use grid::ChunkGrid;
pub use options::{Chunks, Compression, Filter, StorageOptions};

/// File extension of array containers
pub const FILE_EXT: &str = "ndv";

/// Errors that can occur during container operations
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Container already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("Container not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Container has no metadata slot: {}", path.display())]
    MissingMetadata { path: PathBuf },

    #[error("Corrupt container: {0}")]
    Corrupt(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Selection out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Compression error: {0}")]
    Compression(String),
}

pub type Result<T> = std::result::Result<T, ContainerError>;
