//! Primary store for arrays.
//!
//! One [`ArrayStore`] serves one collection. Every array owns a container at
//! its main path and one link record in the secondary index. Arrays of a
//! virtual-array collection are keyed in the index by `(vid, v_position)`
//! instead of by schema primary attributes, so the members of one virtual
//! array form the `<links>/<vid>/` subtree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use ndvault_config::{log_store_debug, log_store_info, log_store_warn};
use ndvault_container::{Block, Bounds, ContainerCodec, DType, Scalar, FILE_EXT};

use crate::engine::StoreContext;
use crate::error::logged;
use crate::index::SecondaryIndex;
use crate::layout::{validate_name, Layout};
use crate::meta::{ordered_primary, ArrayMeta, Attributes, CollectionMeta, CollectionType};
use crate::pool::WorkerPool;
use crate::sweep::Sweeper;
use crate::{Result, StoreError};

pub struct ArrayStore {
    collection: CollectionMeta,
    layout: Layout,
    /// Where parent virtual arrays live, for the create-time parent check
    varray_layout: Layout,
    index: SecondaryIndex,
    sweeper: Sweeper,
    codec: ContainerCodec,
    pool: Arc<WorkerPool>,
    shape: Vec<usize>,
    dtype: DType,
    fill: Scalar,
}

impl std::fmt::Debug for ArrayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayStore")
            .field("collection", &self.collection.name)
            .field("data_root", &self.layout.data_root())
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .finish()
    }
}

impl ArrayStore {
    pub(crate) fn new(ctx: &StoreContext, collection_path: &Path, collection: CollectionMeta) -> Result<Self> {
        let storage = &ctx.storage;
        let layout = Layout::new(
            collection_path.join(&storage.array_data_dir),
            collection_path.join(&storage.array_links_dir),
            FILE_EXT,
        );
        let varray_layout = Layout::new(
            collection_path.join(&storage.varray_data_dir),
            collection_path.join(&storage.varray_links_dir),
            crate::varray::VARRAY_EXT,
        );
        let sweeper = Sweeper::new([layout.data_root().to_path_buf(), layout.links_root().to_path_buf()]);
        let shape = collection.array_shape()?;
        let dtype = collection.schema.dtype;
        let fill = collection.schema.fill_value();
        Ok(Self {
            index: SecondaryIndex::new(ctx.record, FILE_EXT),
            codec: ctx.codec.clone(),
            pool: Arc::clone(&ctx.pool),
            collection,
            layout,
            varray_layout,
            sweeper,
            shape,
            dtype,
            fill,
        })
    }

    pub fn collection(&self) -> &CollectionMeta {
        &self.collection
    }

    /// Shape of every array in this store
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn fill_value(&self) -> Scalar {
        self.fill
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn main_path(&self, id: &str) -> PathBuf {
        self.layout.main_path(id)
    }

    fn is_varray_collection(&self) -> bool {
        self.collection.kind == CollectionType::Varray
    }

    /// Link directory for `meta` and whether it must be vacant
    fn link_dir_for(&self, meta: &ArrayMeta) -> Result<(PathBuf, bool)> {
        if self.is_varray_collection() {
            let (Some(vid), Some(position)) = (&meta.vid, &meta.v_position) else {
                return Err(StoreError::Validation(format!(
                    "array {} of virtual-array collection {} needs vid and v_position",
                    meta.id, self.collection.name
                )));
            };
            if !meta.primary_attributes.is_empty() {
                return Err(StoreError::Validation(format!(
                    "array {} belongs to virtual array {}; primary attributes are set on the virtual array",
                    meta.id, vid
                )));
            }
            let grid = self.collection.schema.split_grid()?;
            if position.len() != grid.len() || position.iter().zip(&grid).any(|(&p, &g)| p >= g) {
                return Err(StoreError::Validation(format!(
                    "v_position {:?} is outside vgrid {:?}",
                    position, grid
                )));
            }
            return Ok((self.layout.position_dir(vid, position), true));
        }

        if meta.vid.is_some() || meta.v_position.is_some() {
            return Err(StoreError::Validation(format!(
                "collection {} is not a virtual-array collection",
                self.collection.name
            )));
        }
        let values = ordered_primary(&self.collection.schema, &meta.primary_attributes)?;
        let unique = !values.is_empty();
        Ok((self.layout.link_dir(values), unique))
    }

    /// Main path of a live array
    fn live_path(&self, id: &str) -> Result<PathBuf> {
        let path = self.layout.main_path(id);
        if !path.is_file() {
            return Err(StoreError::NotFound(format!(
                "array {} in collection {}",
                id, self.collection.name
            )));
        }
        Ok(path)
    }

    /// Create the container for `meta` and its link record.
    #[instrument(skip(self, meta), fields(id = %meta.id), level = "debug")]
    pub fn create(&self, meta: &ArrayMeta) -> Result<()> {
        logged("array.create", &meta.id, self.create_inner(meta))
    }

    fn create_inner(&self, meta: &ArrayMeta) -> Result<()> {
        validate_name("array id", &meta.id)?;
        if meta.collection != self.collection.name {
            return Err(StoreError::Validation(format!(
                "array {} names collection {}, store serves {}",
                meta.id, meta.collection, self.collection.name
            )));
        }
        let (link_dir, unique) = self.link_dir_for(meta)?;

        let main = self.layout.main_path(&meta.id);
        if main.exists() {
            return Err(StoreError::AlreadyExists(format!("array {}", meta.id)));
        }
        if let Some(vid) = &meta.vid {
            if !self.varray_layout.main_path(vid).is_file() {
                return Err(StoreError::MissingParent { vid: vid.clone() });
            }
        }
        if unique {
            self.index.ensure_vacant(&link_dir)?;
        }

        std::fs::create_dir_all(self.layout.main_dir(&meta.id))?;
        self.codec.create(&main, &self.shape, meta)?;

        let file_name = self.layout.file_name(&meta.id);
        if let Err(e) = self.index.create_link(&link_dir, &file_name, &main, unique) {
            if let Err(cleanup) = self.sweeper.remove(&main) {
                log_store_warn!(
                    "Rollback of main container failed",
                    id = meta.id.as_str(),
                    error = tracing::field::display(&cleanup)
                );
            }
            return Err(e);
        }
        log_store_debug!(
            "Array created",
            collection = self.collection.name.as_str(),
            id = meta.id.as_str()
        );
        Ok(())
    }

    /// Read the cells selected by `bounds`.
    pub fn read_data(&self, meta: &ArrayMeta, bounds: &Bounds) -> Result<Block> {
        let result = self.live_path(&meta.id).and_then(|path| {
            Ok(self
                .codec
                .read_range(&path, &self.shape, bounds, self.fill, self.dtype)?)
        });
        logged("array.read_data", &meta.id, result)
    }

    pub fn read_meta(&self, id: &str) -> Result<ArrayMeta> {
        let result = self
            .live_path(id)
            .and_then(|path| Ok(self.codec.read_metadata(&path)?));
        logged("array.read_meta", id, result)
    }

    /// Read metadata from a main container or from a link record.
    pub fn read_meta_at(&self, path: &Path) -> Result<ArrayMeta> {
        let target = if path.starts_with(self.layout.links_root()) {
            crate::link::resolve(path)?
        } else {
            path.to_path_buf()
        };
        Ok(self.codec.read_metadata(&target)?)
    }

    /// Overwrite the cells selected by `bounds`.
    ///
    /// A single-element payload is broadcast over the selection; anything
    /// else must match the selection's shape and the collection dtype.
    #[instrument(skip(self, meta, data), fields(id = %meta.id), level = "debug")]
    pub fn update(&self, meta: &ArrayMeta, bounds: &Bounds, data: Option<Block>) -> Result<()> {
        logged("array.update", &meta.id, self.update_inner(meta, bounds, data))
    }

    fn update_inner(&self, meta: &ArrayMeta, bounds: &Bounds, data: Option<Block>) -> Result<()> {
        let path = self.live_path(&meta.id)?;
        let data = data.ok_or_else(|| StoreError::Validation("update payload must not be null".to_string()))?;
        bounds.validate(&self.shape)?;
        let data = data.broadcast_to(&bounds.shape())?;
        self.codec.write_range(
            &path,
            bounds,
            &data,
            self.dtype,
            &self.shape,
            self.fill,
            &self.collection.options,
        )?;
        Ok(())
    }

    /// Replace the custom attributes; returns the updated metadata.
    #[instrument(skip(self, meta, attributes), fields(id = %meta.id), level = "debug")]
    pub fn update_custom_attributes(&self, meta: &ArrayMeta, attributes: Attributes) -> Result<ArrayMeta> {
        let result = self.live_path(&meta.id).and_then(|path| {
            self.codec
                .update_metadata(&path, Value::Object(attributes.clone()))?;
            let mut updated = meta.clone();
            updated.custom_attributes = attributes;
            Ok(updated)
        });
        logged("array.update_custom_attributes", &meta.id, result)
    }

    /// Reset the cells selected by `bounds` to the fill value.
    #[instrument(skip(self, meta), fields(id = %meta.id), level = "debug")]
    pub fn clear(&self, meta: &ArrayMeta, bounds: &Bounds) -> Result<()> {
        let result = self.live_path(&meta.id).and_then(|path| {
            Ok(self.codec.clear_range(&path, &self.shape, bounds, self.fill)?)
        });
        logged("array.clear", &meta.id, result)
    }

    /// Remove the link record and the container, pruning emptied shards.
    ///
    /// Deleting an array that is already gone is a no-op.
    #[instrument(skip(self, meta), fields(id = %meta.id), level = "debug")]
    pub fn delete(&self, meta: &ArrayMeta) -> Result<()> {
        logged("array.delete", &meta.id, self.delete_inner(meta))
    }

    fn delete_inner(&self, meta: &ArrayMeta) -> Result<()> {
        let (link_dir, _) = self.link_dir_for(meta)?;
        self.sweeper.remove(&link_dir.join(self.layout.file_name(&meta.id)))?;
        self.sweeper.remove(&self.layout.main_path(&meta.id))?;
        log_store_debug!(
            "Array deleted",
            collection = self.collection.name.as_str(),
            id = meta.id.as_str()
        );
        Ok(())
    }

    /// Delete every member array of virtual array `vid` on the worker pool.
    ///
    /// The first failure is returned; members deleted before it stay deleted.
    #[instrument(skip(self), level = "debug")]
    pub fn delete_all_by_vid(&self, vid: &str) -> Result<usize> {
        let result = (|| -> Result<usize> {
            let dir = self.layout.vid_dir(vid);
            let records = self.index.records_under(&dir)?;
            let metas = self.pool.try_map(records, |link| self.read_meta_at(&link))?;
            let count = metas.len();
            self.pool.try_for_each(metas, |meta| self.delete(&meta))?;
            Ok(count)
        })();
        if let Ok(count) = &result {
            log_store_info!("Virtual array members deleted", vid = vid, count = *count);
        }
        logged("array.delete_all_by_vid", vid, result)
    }

    /// Direct lookup at the main path
    pub fn get_by_id(&self, id: &str) -> Result<Option<ArrayMeta>> {
        let path = self.layout.main_path(id);
        if !path.is_file() {
            return Ok(None);
        }
        logged("array.get_by_id", id, self.read_meta_at(&path).map(Some))
    }

    /// Lookup through the secondary index.
    ///
    /// A link record whose container is gone fails with
    /// [`StoreError::BrokenReference`].
    pub fn get_by_primary_attributes(&self, attributes: &Attributes) -> Result<Option<ArrayMeta>> {
        let result = (|| -> Result<Option<ArrayMeta>> {
            if self.is_varray_collection() || self.collection.schema.primary_attributes().next().is_none() {
                return Err(StoreError::Validation(format!(
                    "arrays of collection {} carry no primary attributes",
                    self.collection.name
                )));
            }
            let values = ordered_primary(&self.collection.schema, attributes)?;
            match self.index.resolve(&self.layout.link_dir(values))? {
                Some(target) => Ok(Some(self.codec.read_metadata(&target)?)),
                None => Ok(None),
            }
        })();
        logged("array.get_by_primary_attributes", &self.collection.name, result)
    }

    /// Link record of the member at `position` of virtual array `vid`
    pub fn varray_position_link(&self, vid: &str, position: &[usize]) -> Result<Option<PathBuf>> {
        self.index.first_record(&self.layout.position_dir(vid, position))
    }

    /// Member array at `position` of virtual array `vid`
    pub fn get_by_varray_position(&self, vid: &str, position: &[usize]) -> Result<Option<ArrayMeta>> {
        let result = match self.index.resolve(&self.layout.position_dir(vid, position)) {
            Ok(Some(target)) => self.codec.read_metadata(&target).map(Some).map_err(StoreError::from),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        logged("array.get_by_varray_position", vid, result)
    }

    /// Walk the data tree, yielding the metadata of every container.
    pub fn iter(&self) -> impl Iterator<Item = Result<ArrayMeta>> + '_ {
        walkdir::WalkDir::new(self.layout.data_root())
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) if entry.file_type().is_file() && self.layout.has_ext(entry.path()) => {
                    Some(self.read_meta_at(entry.path()))
                }
                Ok(_) => None,
                // An untouched collection has no data root yet
                Err(e) if e.depth() == 0 && e.io_error().is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) => {
                    None
                }
                Err(e) => Some(Err(e.into())),
            })
    }

    /// Metadata of every array, read on the worker pool.
    pub fn read_all(&self) -> Result<Vec<ArrayMeta>> {
        let mut paths = Vec::new();
        if self.layout.data_root().exists() {
            for entry in walkdir::WalkDir::new(self.layout.data_root()) {
                let entry = entry?;
                if entry.file_type().is_file() && self.layout.has_ext(entry.path()) {
                    paths.push(entry.into_path());
                }
            }
        }
        let result = self.pool.try_map(paths, |path| self.read_meta_at(&path));
        logged("array.read_all", &self.collection.name, result)
    }

    /// True when no container exists for `id`
    pub fn is_deleted(&self, id: &str) -> bool {
        !self.layout.main_path(id).exists()
    }

    /// Counter of cells holding the fill value
    pub fn empty_cells(&self, id: &str) -> Result<u64> {
        let path = self.live_path(id)?;
        Ok(self.codec.empty_cells(&path)?)
    }

    /// True when the array has a dense data block
    pub fn has_data(&self, id: &str) -> Result<bool> {
        let path = self.live_path(id)?;
        Ok(self.codec.has_data(&path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::meta::{AttributeSchema, CollectionSchema, DimensionSchema};
    use ndvault_config::testing::TestEnvironment;
    use ndvault_container::StorageOptions;
    use serde_json::{json, Map};

    fn schema() -> CollectionSchema {
        CollectionSchema {
            dtype: DType::Float64,
            fill_value: None,
            dimensions: vec![
                DimensionSchema { name: "y".into(), size: 4, extra: Map::new() },
                DimensionSchema { name: "x".into(), size: 4, extra: Map::new() },
            ],
            attributes: vec![AttributeSchema { name: "city".into(), primary: true, extra: Map::new() }],
            vgrid: None,
            arrays_shape: None,
            extra: Map::new(),
        }
    }

    fn setup(env: &TestEnvironment) -> (Engine, ArrayStore) {
        let engine = Engine::new(&env.config()).unwrap();
        let meta = CollectionMeta::new("weather", CollectionType::Array, schema(), StorageOptions::default());
        engine.collections().create(&meta).unwrap();
        let store = engine.arrays(&meta).unwrap();
        (engine, store)
    }

    #[test]
    fn test_create_and_lookup() {
        let env = TestEnvironment::new().unwrap();
        let (_engine, store) = setup(&env);

        let meta = ArrayMeta::new("a1", "weather").with_primary("city", "Berlin");
        store.create(&meta).unwrap();

        assert_eq!(store.read_meta("a1").unwrap(), meta);
        assert_eq!(store.get_by_id("a1").unwrap(), Some(meta.clone()));
        let mut attrs = Attributes::new();
        attrs.insert("city".into(), json!("Berlin"));
        assert_eq!(store.get_by_primary_attributes(&attrs).unwrap(), Some(meta));
        attrs.insert("city".into(), json!("Paris"));
        assert_eq!(store.get_by_primary_attributes(&attrs).unwrap(), None);
    }

    #[test]
    fn test_null_payload_rejected() {
        let env = TestEnvironment::new().unwrap();
        let (_engine, store) = setup(&env);
        let meta = ArrayMeta::new("a1", "weather").with_primary("city", "Berlin");
        store.create(&meta).unwrap();

        let err = store.update(&meta, &Bounds::full(&[4, 4]), None).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_scalar_payload_is_broadcast() {
        let env = TestEnvironment::new().unwrap();
        let (_engine, store) = setup(&env);
        let meta = ArrayMeta::new("a1", "weather").with_primary("city", "Berlin");
        store.create(&meta).unwrap();

        let bounds = Bounds::new(vec![0..2, 1..3]);
        store.update(&meta, &bounds, Some(Block::from_scalar(2.5f64))).unwrap();
        let block = store.read_data(&meta, &bounds).unwrap();
        assert_eq!(block.to_vec::<f64>().unwrap(), vec![2.5; 4]);
        assert_eq!(store.empty_cells("a1").unwrap(), 12);
    }

    #[test]
    fn test_mismatched_primary_attributes() {
        let env = TestEnvironment::new().unwrap();
        let (_engine, store) = setup(&env);
        let meta = ArrayMeta::new("a1", "weather").with_primary("town", "Berlin");
        assert!(matches!(store.create(&meta), Err(StoreError::Validation(_))));
        assert!(store.is_deleted("a1"));
    }

    #[test]
    fn test_update_custom_attributes() {
        let env = TestEnvironment::new().unwrap();
        let (_engine, store) = setup(&env);
        let meta = ArrayMeta::new("a1", "weather")
            .with_primary("city", "Berlin")
            .with_custom("note", "draft");
        store.create(&meta).unwrap();

        let mut attrs = Attributes::new();
        attrs.insert("note".into(), json!("final"));
        let updated = store.update_custom_attributes(&meta, attrs).unwrap();
        assert_eq!(updated.custom_attributes["note"], json!("final"));
        assert_eq!(store.read_meta("a1").unwrap(), updated);
    }

    #[test]
    fn test_operations_on_missing_array() {
        let env = TestEnvironment::new().unwrap();
        let (_engine, store) = setup(&env);
        let ghost = ArrayMeta::new("ghost", "weather").with_primary("city", "Nowhere");

        assert!(matches!(store.read_meta("ghost"), Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.read_data(&ghost, &Bounds::full(&[4, 4])),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.get_by_id("ghost").unwrap(), None);
        // Deleting something already gone is fine
        store.delete(&ghost).unwrap();
    }

    #[test]
    fn test_iter_and_read_all() {
        let env = TestEnvironment::new().unwrap();
        let (_engine, store) = setup(&env);
        assert_eq!(store.iter().count(), 0);

        for (id, city) in [("a1", "Berlin"), ("a2", "Paris"), ("a3", "Rome")] {
            store
                .create(&ArrayMeta::new(id, "weather").with_primary("city", city))
                .unwrap();
        }
        let mut ids: Vec<String> = store.iter().map(|m| m.unwrap().id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);

        let mut all: Vec<String> = store.read_all().unwrap().into_iter().map(|m| m.id).collect();
        all.sort();
        assert_eq!(all, ids);
    }
}
