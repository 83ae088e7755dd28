//! Collection-level chunking and compression options.
//!
//! The JSON shape matches the collection document:
//!
//! ```text
//! {
//!   "chunks":      {"mode": "none"} | {"mode": "true"} | {"mode": "manual", "size": [..]},
//!   "compression": {"compression": "none" | "zstd" | "lz4", "options": [..] | null}
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ContainerError, Result};

/// Chunks produced by automatic chunking stay at or below this many bytes.
pub const AUTO_CHUNK_TARGET_BYTES: usize = 1024 * 1024;

const DEFAULT_ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOptions {
    #[serde(default)]
    pub chunks: Chunks,
    #[serde(default)]
    pub compression: Compression,
}

impl StorageOptions {
    pub fn validate(&self) -> Result<()> {
        self.chunks.validate()?;
        self.compression.filter()?;
        Ok(())
    }

    /// Chunk shape to use for a newly allocated block of `shape`.
    pub fn chunk_shape(&self, shape: &[usize], elem_size: usize) -> Result<Vec<usize>> {
        match &self.chunks {
            Chunks::None => Ok(shape.to_vec()),
            Chunks::Auto => Ok(auto_chunk_shape(shape, elem_size)),
            Chunks::Explicit { size } => {
                self.chunks.validate()?;
                if size.len() != shape.len() {
                    return Err(ContainerError::Validation(format!(
                        "chunk size {:?} does not match array rank {}",
                        size,
                        shape.len()
                    )));
                }
                Ok(size.iter().zip(shape).map(|(&c, &d)| c.min(d)).collect())
            }
        }
    }
}

/// How the dense block is split into independently stored chunks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum Chunks {
    /// A single chunk spanning the whole array
    #[default]
    #[serde(rename = "none")]
    None,
    /// Chunk shape picked from the array shape and element size
    #[serde(rename = "true")]
    Auto,
    #[serde(rename = "manual")]
    Explicit { size: Vec<usize> },
}

impl Chunks {
    pub fn validate(&self) -> Result<()> {
        if let Chunks::Explicit { size } = self {
            if size.is_empty() || size.contains(&0) {
                return Err(ContainerError::Validation(format!(
                    "invalid chunk size {:?}; non-empty list of positive integers expected",
                    size
                )));
            }
        }
        Ok(())
    }
}

/// Compression filter name plus its ordered option list.
///
/// Options are kept as raw JSON values (numbers or strings) so documents
/// written elsewhere round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compression {
    pub compression: String,
    #[serde(default)]
    pub options: Option<Vec<Value>>,
}

impl Default for Compression {
    fn default() -> Self {
        Self {
            compression: "none".to_string(),
            options: Some(Vec::new()),
        }
    }
}

impl Compression {
    pub fn zstd(level: i32) -> Self {
        Self {
            compression: "zstd".to_string(),
            options: Some(vec![Value::from(level)]),
        }
    }

    pub fn lz4() -> Self {
        Self {
            compression: "lz4".to_string(),
            options: None,
        }
    }

    fn option_list(&self) -> &[Value] {
        self.options.as_deref().unwrap_or(&[])
    }

    /// Parse into a concrete filter, rejecting malformed options.
    pub fn filter(&self) -> Result<Filter> {
        let opts = self.option_list();
        match self.compression.trim() {
            "" => Err(ContainerError::Validation(
                "compression filter name is empty".to_string(),
            )),
            "none" => {
                if !opts.is_empty() {
                    return Err(ContainerError::Validation(
                        "compression \"none\" takes no options".to_string(),
                    ));
                }
                Ok(Filter::None)
            }
            "zstd" => match opts {
                [] => Ok(Filter::Zstd(DEFAULT_ZSTD_LEVEL)),
                [raw] => {
                    let level = match raw {
                        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
                        Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    }
                    .ok_or_else(|| {
                        ContainerError::Validation(format!("invalid zstd level {}", raw))
                    })?;
                    if !(1..=22).contains(&level) {
                        return Err(ContainerError::Validation(format!(
                            "zstd level {} outside 1..=22",
                            level
                        )));
                    }
                    Ok(Filter::Zstd(level))
                }
                _ => Err(ContainerError::Validation(
                    "zstd accepts a single level option".to_string(),
                )),
            },
            "lz4" => {
                if !opts.is_empty() {
                    return Err(ContainerError::Validation(
                        "lz4 filter does not accept any options".to_string(),
                    ));
                }
                Ok(Filter::Lz4)
            }
            other => Err(ContainerError::Validation(format!(
                "unknown compression filter {:?}",
                other
            ))),
        }
    }
}

/// A resolved compression filter, recorded in each container's data layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    None,
    Zstd(i32),
    Lz4,
}

impl Filter {
    pub(crate) fn compress(self, raw: &[u8]) -> Result<Vec<u8>> {
        match self {
            Filter::None => Ok(raw.to_vec()),
            Filter::Zstd(level) => zstd::encode_all(raw, level)
                .map_err(|e| ContainerError::Compression(e.to_string())),
            Filter::Lz4 => Ok(lz4_flex::compress_prepend_size(raw)),
        }
    }

    pub(crate) fn decompress(self, stored: &[u8]) -> Result<Vec<u8>> {
        match self {
            Filter::None => Ok(stored.to_vec()),
            Filter::Zstd(_) => {
                zstd::decode_all(stored).map_err(|e| ContainerError::Compression(e.to_string()))
            }
            Filter::Lz4 => lz4_flex::decompress_size_prepended(stored)
                .map_err(|e| ContainerError::Compression(e.to_string())),
        }
    }
}

/// Halve the largest dimension until a chunk fits the auto-chunk target.
pub fn auto_chunk_shape(shape: &[usize], elem_size: usize) -> Vec<usize> {
    let mut chunk = shape.to_vec();
    loop {
        let bytes = chunk.iter().product::<usize>() * elem_size;
        if bytes <= AUTO_CHUNK_TARGET_BYTES {
            return chunk;
        }
        let Some((axis, &largest)) = chunk.iter().enumerate().max_by_key(|(_, &d)| d) else {
            return chunk;
        };
        if largest <= 1 {
            return chunk;
        }
        chunk[axis] = largest.div_ceil(2);
    }
}
