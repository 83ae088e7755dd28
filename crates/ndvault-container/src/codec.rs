//! Container codec: create, read, write and clear array containers.
//!
//! The whole container is rewritten on every mutation. Chunks that the
//! mutation does not touch are carried over as raw payload bytes, so a write
//! costs the decode and encode of the intersecting chunks plus a copy.

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ndvault_config::{log_codec_debug, ContainerConfig};

use crate::block::{cell_count, copy_region, count_in_region, fill_region, Block, Bounds};
use crate::dtype::{DType, Scalar};
use crate::grid::ChunkGrid;
use crate::options::{Filter, StorageOptions};
use crate::{ContainerError, Result};

/// Magic bytes for container identification
const CONTAINER_MAGIC: &[u8; 8] = b"NDVCONT1";
/// Current container format version
const CONTAINER_VERSION: u32 = 1;
const HEADER_SIZE: u64 = 32;

/// Key replaced by [`ContainerCodec::update_metadata`]
const CUSTOM_ATTRIBUTES_KEY: &str = "custom_attributes";

/// Container header (fixed 32 bytes, bincode leaves 4 bytes of padding)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    magic: [u8; 8],
    version: u32,
    index_offset: u64,
    index_len: u64,
}

impl Header {
    fn new(index_offset: u64, index_len: u64) -> Self {
        Self {
            magic: *CONTAINER_MAGIC,
            version: CONTAINER_VERSION,
            index_offset,
            index_len,
        }
    }

    fn validate(&self) -> Result<()> {
        if &self.magic != CONTAINER_MAGIC {
            return Err(ContainerError::Corrupt("Bad magic bytes".to_string()));
        }
        if self.version != CONTAINER_VERSION {
            return Err(ContainerError::Corrupt(format!(
                "Unsupported version: {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// Location of a payload inside the container file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct SlotRef {
    offset: u64,
    len: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DataLayout {
    dtype: DType,
    shape: Vec<usize>,
    chunk_shape: Vec<usize>,
    filter: Filter,
    /// One entry per chunk in row-major grid order; `None` = all fill
    chunks: Vec<Option<SlotRef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Index {
    meta: Option<SlotRef>,
    empty_cells: u64,
    data: Option<DataLayout>,
}

/// Summary of a container's slots
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerStat {
    pub empty_cells: u64,
    pub has_data: bool,
    pub dtype: Option<DType>,
    pub chunk_shape: Option<Vec<usize>>,
    pub filter: Option<Filter>,
    /// Chunks with a stored payload
    pub stored_chunks: usize,
    pub file_size: u64,
}

/// A container opened for reading (memory-mapped)
struct ContainerFile {
    mmap: Mmap,
    index: Index,
}

impl ContainerFile {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ContainerError::NotFound {
                path: path.to_path_buf(),
            },
            _ => ContainerError::Io(e),
        })?;
        if file.metadata()?.len() < HEADER_SIZE {
            return Err(ContainerError::Corrupt(format!(
                "{} is too small to be a container",
                path.display()
            )));
        }
        let mmap = unsafe { Mmap::map(&file)? };

        let header: Header = bincode::deserialize(&mmap[..HEADER_SIZE as usize])?;
        header.validate()?;

        let start = header.index_offset as usize;
        let end = start
            .checked_add(header.index_len as usize)
            .filter(|&end| end <= mmap.len())
            .ok_or_else(|| ContainerError::Corrupt("Index extends past EOF".to_string()))?;
        let index: Index = bincode::deserialize(&mmap[start..end])?;

        Ok(Self { mmap, index })
    }

    fn slot(&self, slot: SlotRef) -> Result<&[u8]> {
        let start = slot.offset as usize;
        let end = start + slot.len as usize;
        if end > self.mmap.len() {
            return Err(ContainerError::Corrupt("Slot extends past EOF".to_string()));
        }
        Ok(&self.mmap[start..end])
    }

    fn meta_bytes(&self, path: &Path) -> Result<&[u8]> {
        match self.index.meta {
            Some(slot) => self.slot(slot),
            None => Err(ContainerError::MissingMetadata {
                path: path.to_path_buf(),
            }),
        }
    }

    fn layout_for(&self, shape: &[usize], dtype: DType) -> Result<Option<&DataLayout>> {
        let Some(layout) = &self.index.data else {
            return Ok(None);
        };
        if layout.shape != shape || layout.dtype != dtype {
            return Err(ContainerError::Validation(format!(
                "container block is {:?} of {}, caller expects {:?} of {}",
                layout.shape, layout.dtype, shape, dtype
            )));
        }
        Ok(Some(layout))
    }

    /// Decompressed bytes of one chunk, or `None` when it holds only fill
    fn chunk_raw(&self, layout: &DataLayout, grid: &ChunkGrid, idx: usize) -> Result<Option<Vec<u8>>> {
        let Some(slot) = layout.chunks.get(idx).copied().flatten() else {
            return Ok(None);
        };
        let raw = layout.filter.decompress(self.slot(slot)?)?;
        let expected = grid.chunk_bounds(idx).cell_count() as usize * layout.dtype.size();
        if raw.len() != expected {
            return Err(ContainerError::Corrupt(format!(
                "chunk {} decodes to {} bytes, expected {}",
                idx,
                raw.len(),
                expected
            )));
        }
        Ok(Some(raw))
    }

    /// Current contents with every payload borrowed from the mapping
    fn contents(&self) -> Result<Contents<'_>> {
        let meta = self.index.meta.map(|slot| self.slot(slot)).transpose()?;
        let data = match &self.index.data {
            Some(layout) => Some(DataContents {
                dtype: layout.dtype,
                shape: layout.shape.clone(),
                chunk_shape: layout.chunk_shape.clone(),
                filter: layout.filter,
                chunks: layout
                    .chunks
                    .iter()
                    .map(|c| c.map(|slot| self.slot(slot).map(Cow::Borrowed)).transpose())
                    .collect::<Result<_>>()?,
            }),
            None => None,
        };
        Ok(Contents {
            meta: meta.map(Cow::Borrowed),
            empty_cells: self.index.empty_cells,
            data,
        })
    }
}

/// Everything a new container file is built from
struct Contents<'a> {
    meta: Option<Cow<'a, [u8]>>,
    empty_cells: u64,
    data: Option<DataContents<'a>>,
}

struct DataContents<'a> {
    dtype: DType,
    shape: Vec<usize>,
    chunk_shape: Vec<usize>,
    filter: Filter,
    chunks: Vec<Option<Cow<'a, [u8]>>>,
}

impl DataContents<'_> {
    fn is_all_fill(&self) -> bool {
        self.chunks.iter().all(Option::is_none)
    }
}

/// A fully written temp file waiting to take the container's place.
///
/// Dropping it without committing removes the temp file.
struct StagedContainer {
    final_path: PathBuf,
    temp_path: PathBuf,
    committed: bool,
}

impl StagedContainer {
    fn write(final_path: &Path, contents: Contents<'_>, sync: bool) -> Result<Self> {
        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Unique per thread so concurrent writers never share a temp file
        let temp_name = format!(
            "{}.{}.{:?}.tmp",
            file_name,
            std::process::id(),
            std::thread::current().id()
        );
        let staged = Self {
            final_path: final_path.to_path_buf(),
            temp_path: final_path.with_file_name(temp_name),
            committed: false,
        };

        let mut writer = BufWriter::new(File::create(&staged.temp_path)?);
        // Reserve space for header (written last)
        writer.write_all(&[0u8; HEADER_SIZE as usize])?;
        let mut pos = HEADER_SIZE;
        let mut append = |writer: &mut BufWriter<File>, bytes: &[u8]| -> Result<SlotRef> {
            writer.write_all(bytes)?;
            let slot = SlotRef {
                offset: pos,
                len: bytes.len() as u64,
            };
            pos += bytes.len() as u64;
            Ok(slot)
        };

        let meta = contents
            .meta
            .as_deref()
            .map(|bytes| append(&mut writer, bytes))
            .transpose()?;
        let data = match contents.data {
            Some(data) => {
                let mut chunks = Vec::with_capacity(data.chunks.len());
                for chunk in &data.chunks {
                    chunks.push(
                        chunk
                            .as_deref()
                            .map(|bytes| append(&mut writer, bytes))
                            .transpose()?,
                    );
                }
                Some(DataLayout {
                    dtype: data.dtype,
                    shape: data.shape,
                    chunk_shape: data.chunk_shape,
                    filter: data.filter,
                    chunks,
                })
            }
            None => None,
        };

        let index = Index {
            meta,
            empty_cells: contents.empty_cells,
            data,
        };
        let index_bytes = bincode::serialize(&index)?;
        writer.write_all(&index_bytes)?;

        let header_bytes = bincode::serialize(&Header::new(pos, index_bytes.len() as u64))?;
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&header_bytes)?;
        writer.flush()?;

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        if sync {
            file.sync_all()?;
        }
        Ok(staged)
    }

    /// Atomically replace the existing container.
    fn replace(mut self) -> Result<()> {
        fs::rename(&self.temp_path, &self.final_path)?;
        self.committed = true;
        Ok(())
    }

    /// Publish as a new container, failing if one already exists.
    fn publish_new(mut self) -> Result<()> {
        match fs::hard_link(&self.temp_path, &self.final_path) {
            Ok(()) => {
                let _ = fs::remove_file(&self.temp_path);
                self.committed = true;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(ContainerError::AlreadyExists {
                path: self.final_path.clone(),
            }),
            // Filesystems without hard links: check then rename
            Err(_) => {
                if self.final_path.exists() {
                    return Err(ContainerError::AlreadyExists {
                        path: self.final_path.clone(),
                    });
                }
                self.replace()
            }
        }
    }
}

impl Drop for StagedContainer {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Reads and mutates array containers.
///
/// The codec takes no file locks. Callers serialize writers per container.
#[derive(Debug, Clone)]
pub struct ContainerCodec {
    sync_on_write: bool,
}

impl Default for ContainerCodec {
    fn default() -> Self {
        Self::new(&ContainerConfig::default())
    }
}

impl ContainerCodec {
    pub fn new(config: &ContainerConfig) -> Self {
        Self {
            sync_on_write: config.sync_on_write,
        }
    }

    /// Create a container holding only `metadata`; every cell starts empty.
    #[instrument(skip(self, metadata), level = "debug")]
    pub fn create<M: Serialize>(&self, path: &Path, shape: &[usize], metadata: &M) -> Result<()> {
        if path.exists() {
            return Err(ContainerError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        let meta = serde_json::to_vec(metadata)?;
        let contents = Contents {
            meta: Some(Cow::Owned(meta)),
            empty_cells: cell_count(shape),
            data: None,
        };
        StagedContainer::write(path, contents, self.sync_on_write)?.publish_new()?;
        log_codec_debug!("Container created", path = tracing::field::display(path.display()));
        Ok(())
    }

    /// Read the cells selected by `bounds`.
    ///
    /// Without a data block, or for chunks that hold only fill, the result is
    /// synthesized from `fill`.
    pub fn read_range(
        &self,
        path: &Path,
        shape: &[usize],
        bounds: &Bounds,
        fill: Scalar,
        dtype: DType,
    ) -> Result<Block> {
        bounds.validate(shape)?;
        let file = ContainerFile::open(path)?;

        let out_shape = bounds.shape();
        let elem = dtype.size();
        let mut out = fill.encode(dtype)?.repeat(cell_count(&out_shape) as usize);

        if let Some(layout) = file.layout_for(shape, dtype)? {
            let grid = ChunkGrid::new(&layout.shape, &layout.chunk_shape);
            let out_origin = bounds.starts();
            for idx in grid.chunks_in(bounds) {
                let Some(raw) = file.chunk_raw(layout, &grid, idx)? else {
                    continue;
                };
                let chunk = grid.chunk_bounds(idx);
                let Some(inter) = chunk.intersect(bounds) else {
                    continue;
                };
                copy_region(
                    &raw,
                    &chunk.shape(),
                    &inter.offset_from(&chunk.starts()),
                    &mut out,
                    &out_shape,
                    &inter.offset_from(&out_origin),
                    &inter.shape(),
                    elem,
                );
            }
        }
        Block::from_bytes(dtype, &out_shape, out)
    }

    /// Decode the metadata slot.
    pub fn read_metadata<M: DeserializeOwned>(&self, path: &Path) -> Result<M> {
        let file = ContainerFile::open(path)?;
        Ok(serde_json::from_slice(file.meta_bytes(path)?)?)
    }

    /// Overwrite the cells selected by `bounds` with `data`.
    ///
    /// The empty-cell counter becomes
    /// `max(counter - region_cells, 0) + fill_cells_in(data)`, so it does not
    /// account for fill values that were overwritten. When it reaches the
    /// total the data block is dropped.
    ///
    /// A write that leaves every chunk holding only fill also drops the block
    /// and sets the counter to the total, even if the lenient counter is still
    /// below it. No stored cell remains in that case.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, data, options), level = "debug")]
    pub fn write_range(
        &self,
        path: &Path,
        bounds: &Bounds,
        data: &Block,
        dtype: DType,
        shape: &[usize],
        fill: Scalar,
        options: &StorageOptions,
    ) -> Result<()> {
        bounds.validate(shape)?;
        if data.dtype() != dtype {
            return Err(ContainerError::Validation(format!(
                "data holds {}, array is {}",
                data.dtype(),
                dtype
            )));
        }
        if data.shape() != bounds.shape().as_slice() {
            return Err(ContainerError::Validation(format!(
                "data of shape {:?} does not fit selection of shape {:?}",
                data.shape(),
                bounds.shape()
            )));
        }

        let file = ContainerFile::open(path)?;
        let total = cell_count(shape);
        let counter = file
            .index
            .empty_cells
            .saturating_sub(bounds.cell_count())
            + data.count_equal(fill);

        let mut contents = file.contents()?;
        if counter >= total {
            contents.data = None;
            contents.empty_cells = total;
        } else {
            let pattern = fill.encode(dtype)?;
            let mut target = match contents.data.take() {
                Some(existing) => {
                    file.layout_for(shape, dtype)?;
                    existing
                }
                None => {
                    let chunk_shape = options.chunk_shape(shape, dtype.size())?;
                    let filter = options.compression.filter()?;
                    let grid = ChunkGrid::new(shape, &chunk_shape);
                    DataContents {
                        dtype,
                        shape: shape.to_vec(),
                        chunk_shape,
                        filter,
                        chunks: vec![None; grid.chunk_count()],
                    }
                }
            };
            let grid = ChunkGrid::new(&target.shape, &target.chunk_shape);
            let elem = dtype.size();
            let data_origin = bounds.starts();

            for idx in grid.chunks_in(bounds) {
                let chunk = grid.chunk_bounds(idx);
                let Some(inter) = chunk.intersect(bounds) else {
                    continue;
                };
                let chunk_shape = chunk.shape();
                let mut raw = match &file.index.data {
                    Some(layout) => file.chunk_raw(layout, &grid, idx)?,
                    None => None,
                }
                .unwrap_or_else(|| pattern.repeat(chunk.cell_count() as usize));

                copy_region(
                    data.bytes(),
                    data.shape(),
                    &inter.offset_from(&data_origin),
                    &mut raw,
                    &chunk_shape,
                    &inter.offset_from(&chunk.starts()),
                    &inter.shape(),
                    elem,
                );
                target.chunks[idx] = encode_chunk(&raw, dtype, fill, chunk.cell_count(), target.filter)?;
            }

            if target.is_all_fill() {
                contents.empty_cells = total;
            } else {
                contents.empty_cells = counter;
                contents.data = Some(target);
            }
        }

        let staged = StagedContainer::write(path, contents, self.sync_on_write)?;
        drop(file);
        staged.replace()?;
        log_codec_debug!(
            "Range written",
            path = tracing::field::display(path.display()),
            empty_cells = counter.min(total)
        );
        Ok(())
    }

    /// Reset the cells selected by `bounds` to `fill`.
    ///
    /// The counter grows by the number of non-fill cells the region held, so
    /// clearing an already-empty region changes nothing. Clearing the whole
    /// shape, or reaching the total, drops the data block.
    #[instrument(skip(self), level = "debug")]
    pub fn clear_range(&self, path: &Path, shape: &[usize], bounds: &Bounds, fill: Scalar) -> Result<()> {
        bounds.validate(shape)?;
        let file = ContainerFile::open(path)?;
        let Some(layout) = &file.index.data else {
            return Ok(());
        };
        let dtype = layout.dtype;
        file.layout_for(shape, dtype)?;
        let total = cell_count(shape);

        let mut contents = file.contents()?;
        if bounds.covers(shape) {
            contents.data = None;
            contents.empty_cells = total;
        } else {
            let pattern = fill.encode(dtype)?;
            let grid = ChunkGrid::new(&layout.shape, &layout.chunk_shape);
            let mut cleared = 0u64;
            let mut target = contents
                .data
                .take()
                .ok_or_else(|| ContainerError::Corrupt("data layout vanished".to_string()))?;

            for idx in grid.chunks_in(bounds) {
                let Some(mut raw) = file.chunk_raw(layout, &grid, idx)? else {
                    continue;
                };
                let chunk = grid.chunk_bounds(idx);
                let Some(inter) = chunk.intersect(bounds) else {
                    continue;
                };
                let chunk_shape = chunk.shape();
                let origin = inter.offset_from(&chunk.starts());
                let extent = inter.shape();
                let already = count_in_region(&raw, &chunk_shape, &origin, &extent, dtype, fill);
                cleared += inter.cell_count() - already;

                fill_region(&mut raw, &chunk_shape, &origin, &extent, &pattern);
                target.chunks[idx] = encode_chunk(&raw, dtype, fill, chunk.cell_count(), target.filter)?;
            }

            let counter = (file.index.empty_cells + cleared).min(total);
            if counter >= total || target.is_all_fill() {
                contents.empty_cells = total;
            } else {
                contents.empty_cells = counter;
                contents.data = Some(target);
            }
        }

        let staged = StagedContainer::write(path, contents, self.sync_on_write)?;
        drop(file);
        staged.replace()?;
        log_codec_debug!("Range cleared", path = tracing::field::display(path.display()));
        Ok(())
    }

    /// Replace the `custom_attributes` member of the metadata document.
    #[instrument(skip(self, custom_attributes), level = "debug")]
    pub fn update_metadata(&self, path: &Path, custom_attributes: serde_json::Value) -> Result<()> {
        let file = ContainerFile::open(path)?;
        let mut meta: serde_json::Value = serde_json::from_slice(file.meta_bytes(path)?)?;
        let object = meta.as_object_mut().ok_or_else(|| {
            ContainerError::Corrupt(format!("metadata of {} is not an object", path.display()))
        })?;
        object.insert(CUSTOM_ATTRIBUTES_KEY.to_string(), custom_attributes);

        let mut contents = file.contents()?;
        contents.meta = Some(Cow::Owned(serde_json::to_vec(&meta)?));
        let staged = StagedContainer::write(path, contents, self.sync_on_write)?;
        drop(file);
        staged.replace()
    }

    /// Current value of the empty-cell counter
    pub fn empty_cells(&self, path: &Path) -> Result<u64> {
        Ok(ContainerFile::open(path)?.index.empty_cells)
    }

    /// True when the container has a data block
    pub fn has_data(&self, path: &Path) -> Result<bool> {
        Ok(ContainerFile::open(path)?.index.data.is_some())
    }

    /// Drop the data block and reset the counter to the total cell count.
    #[instrument(skip(self), level = "debug")]
    pub fn delete_block(&self, path: &Path, shape: &[usize]) -> Result<()> {
        let file = ContainerFile::open(path)?;
        if file.index.data.is_none() {
            return Ok(());
        }
        let mut contents = file.contents()?;
        contents.data = None;
        contents.empty_cells = cell_count(shape);
        let staged = StagedContainer::write(path, contents, self.sync_on_write)?;
        drop(file);
        staged.replace()
    }

    pub fn stat(&self, path: &Path) -> Result<ContainerStat> {
        let file = ContainerFile::open(path)?;
        let layout = file.index.data.as_ref();
        Ok(ContainerStat {
            empty_cells: file.index.empty_cells,
            has_data: layout.is_some(),
            dtype: layout.map(|l| l.dtype),
            chunk_shape: layout.map(|l| l.chunk_shape.clone()),
            filter: layout.map(|l| l.filter),
            stored_chunks: layout.map_or(0, |l| l.chunks.iter().flatten().count()),
            file_size: file.mmap.len() as u64,
        })
    }
}

/// Write a container whose index has no metadata slot, as left behind by a
/// damaged file.
#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub fn write_without_metadata(path: &Path, shape: &[usize]) -> Result<()> {
    let contents = Contents {
        meta: None,
        empty_cells: cell_count(shape),
        data: None,
    };
    StagedContainer::write(path, contents, false)?.replace()
}

/// Compress a chunk, or `None` when every cell holds `fill`
fn encode_chunk(
    raw: &[u8],
    dtype: DType,
    fill: Scalar,
    cells: u64,
    filter: Filter,
) -> Result<Option<Cow<'static, [u8]>>> {
    if dtype.count_equal(raw, fill) == cells {
        return Ok(None);
    }
    Ok(Some(Cow::Owned(filter.compress(raw)?)))
}
