//! Primary store for virtual arrays.
//!
//! A virtual array is a JSON document with no data of its own. Its members
//! are ordinary arrays of the same collection, found through their link
//! records under `<array links>/<vid>/`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::instrument;

use ndvault_config::{log_store_debug, log_store_warn};

use crate::array::ArrayStore;
use crate::document;
use crate::engine::StoreContext;
use crate::error::logged;
use crate::index::SecondaryIndex;
use crate::layout::{validate_name, Layout};
use crate::meta::{ordered_primary, Attributes, CollectionMeta, CollectionType, VArrayMeta};
use crate::sweep::Sweeper;
use crate::{Result, StoreError};

/// File extension of virtual-array documents and their link records
pub const VARRAY_EXT: &str = "json";

#[derive(Debug)]
pub struct VArrayStore {
    collection: CollectionMeta,
    layout: Layout,
    index: SecondaryIndex,
    sweeper: Sweeper,
    arrays: ArrayStore,
    sync_on_write: bool,
}

impl VArrayStore {
    pub(crate) fn new(ctx: &StoreContext, collection_path: &Path, collection: CollectionMeta) -> Result<Self> {
        if collection.kind != CollectionType::Varray {
            return Err(StoreError::Validation(format!(
                "collection {} does not hold virtual arrays",
                collection.name
            )));
        }
        let layout = Layout::new(
            collection_path.join(&ctx.storage.varray_data_dir),
            collection_path.join(&ctx.storage.varray_links_dir),
            VARRAY_EXT,
        );
        let sweeper = Sweeper::new([layout.data_root().to_path_buf(), layout.links_root().to_path_buf()]);
        let arrays = ArrayStore::new(ctx, collection_path, collection.clone())?;
        Ok(Self {
            index: SecondaryIndex::new(ctx.record, VARRAY_EXT),
            sync_on_write: ctx.sync_on_write,
            collection,
            layout,
            sweeper,
            arrays,
        })
    }

    /// Store of the member arrays
    pub fn arrays(&self) -> &ArrayStore {
        &self.arrays
    }

    pub fn main_path(&self, id: &str) -> PathBuf {
        self.layout.main_path(id)
    }

    fn live_path(&self, id: &str) -> Result<PathBuf> {
        let path = self.layout.main_path(id);
        if !path.is_file() {
            return Err(StoreError::NotFound(format!(
                "virtual array {} in collection {}",
                id, self.collection.name
            )));
        }
        Ok(path)
    }

    fn link_dir_for(&self, meta: &VArrayMeta) -> Result<(PathBuf, bool)> {
        let values = ordered_primary(&self.collection.schema, &meta.primary_attributes)?;
        let unique = !values.is_empty();
        Ok((self.layout.link_dir(values), unique))
    }

    #[instrument(skip(self, meta), fields(id = %meta.id), level = "debug")]
    pub fn create(&self, meta: &VArrayMeta) -> Result<()> {
        logged("varray.create", &meta.id, self.create_inner(meta))
    }

    fn create_inner(&self, meta: &VArrayMeta) -> Result<()> {
        validate_name("virtual array id", &meta.id)?;
        if meta.collection != self.collection.name {
            return Err(StoreError::Validation(format!(
                "virtual array {} names collection {}, store serves {}",
                meta.id, meta.collection, self.collection.name
            )));
        }
        let grid = self.collection.schema.split_grid()?;
        if meta.vgrid != grid {
            return Err(StoreError::Validation(format!(
                "vgrid {:?} does not match collection vgrid {:?}",
                meta.vgrid, grid
            )));
        }
        let (link_dir, unique) = self.link_dir_for(meta)?;

        let main = self.layout.main_path(&meta.id);
        if main.exists() {
            return Err(StoreError::AlreadyExists(format!("virtual array {}", meta.id)));
        }
        if unique {
            self.index.ensure_vacant(&link_dir)?;
        }

        std::fs::create_dir_all(self.layout.main_dir(&meta.id))?;
        document::create(&main, meta, self.sync_on_write)?;

        let file_name = self.layout.file_name(&meta.id);
        if let Err(e) = self.index.create_link(&link_dir, &file_name, &main, unique) {
            if let Err(cleanup) = self.sweeper.remove(&main) {
                log_store_warn!(
                    "Rollback of virtual-array document failed",
                    id = meta.id.as_str(),
                    error = tracing::field::display(&cleanup)
                );
            }
            return Err(e);
        }
        log_store_debug!(
            "Virtual array created",
            collection = self.collection.name.as_str(),
            id = meta.id.as_str()
        );
        Ok(())
    }

    pub fn read_meta(&self, id: &str) -> Result<VArrayMeta> {
        logged("varray.read_meta", id, self.live_path(id).and_then(|p| document::read(&p)))
    }

    /// Read metadata from a document or from a link record.
    pub fn read_meta_at(&self, path: &Path) -> Result<VArrayMeta> {
        let target = if path.starts_with(self.layout.links_root()) {
            crate::link::resolve(path)?
        } else {
            path.to_path_buf()
        };
        document::read(&target)
    }

    /// Replace the custom attributes; returns the updated metadata.
    #[instrument(skip(self, meta, attributes), fields(id = %meta.id), level = "debug")]
    pub fn update_custom_attributes(&self, meta: &VArrayMeta, attributes: Attributes) -> Result<VArrayMeta> {
        let result = self.live_path(&meta.id).and_then(|path| {
            let mut doc: Value = document::read(&path)?;
            let object = doc.as_object_mut().ok_or_else(|| {
                StoreError::Validation(format!("{} is not a metadata document", path.display()))
            })?;
            object.insert("custom_attributes".to_string(), Value::Object(attributes.clone()));
            document::replace(&path, &doc, self.sync_on_write)?;

            let mut updated = meta.clone();
            updated.custom_attributes = attributes;
            Ok(updated)
        });
        logged("varray.update_custom_attributes", &meta.id, result)
    }

    /// Delete every member array, then the document and its link record.
    #[instrument(skip(self, meta), fields(id = %meta.id), level = "debug")]
    pub fn delete(&self, meta: &VArrayMeta) -> Result<()> {
        logged("varray.delete", &meta.id, self.delete_inner(meta))
    }

    fn delete_inner(&self, meta: &VArrayMeta) -> Result<()> {
        let members = self.arrays.delete_all_by_vid(&meta.id)?;
        let (link_dir, _) = self.link_dir_for(meta)?;
        self.sweeper.remove(&link_dir.join(self.layout.file_name(&meta.id)))?;
        self.sweeper.remove(&self.layout.main_path(&meta.id))?;
        log_store_debug!(
            "Virtual array deleted",
            collection = self.collection.name.as_str(),
            id = meta.id.as_str(),
            members = members
        );
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<VArrayMeta>> {
        let path = self.layout.main_path(id);
        if !path.is_file() {
            return Ok(None);
        }
        logged("varray.get_by_id", id, document::read(&path).map(Some))
    }

    /// Lookup through the secondary index.
    pub fn get_by_primary_attributes(&self, attributes: &Attributes) -> Result<Option<VArrayMeta>> {
        let result = (|| -> Result<Option<VArrayMeta>> {
            if self.collection.schema.primary_attributes().next().is_none() {
                return Err(StoreError::Validation(format!(
                    "virtual arrays of collection {} carry no primary attributes",
                    self.collection.name
                )));
            }
            let values = ordered_primary(&self.collection.schema, attributes)?;
            match self.index.resolve(&self.layout.link_dir(values))? {
                Some(target) => Ok(Some(document::read(&target)?)),
                None => Ok(None),
            }
        })();
        logged("varray.get_by_primary_attributes", &self.collection.name, result)
    }

    /// Walk the document tree, yielding every virtual array.
    pub fn iter(&self) -> impl Iterator<Item = Result<VArrayMeta>> + '_ {
        walkdir::WalkDir::new(self.layout.data_root())
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) if entry.file_type().is_file() && self.layout.has_ext(entry.path()) => {
                    Some(document::read(entry.path()))
                }
                Ok(_) => None,
                Err(e) if e.depth() == 0 && e.io_error().is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) => {
                    None
                }
                Err(e) => Some(Err(e.into())),
            })
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        !self.layout.main_path(id).exists()
    }
}
