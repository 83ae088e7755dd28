//! Collection registry: one directory per collection holding its document.
//!
//! ```text
//! <collections>/<name>/<name>.json     collection document
//! <collections>/<name>.lock            lock file of an external lock manager
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::instrument;

use ndvault_config::{log_registry_info, log_registry_warn};

use crate::document;
use crate::error::logged;
use crate::layout::validate_name;
use crate::meta::{CollectionMeta, CollectionType};
use crate::{Result, StoreError};

const DOCUMENT_EXT: &str = "json";
const LOCK_EXT: &str = "lock";

#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    root: PathBuf,
    memory_limit: u64,
    sync_on_write: bool,
}

impl CollectionRegistry {
    /// Open the registry at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>, memory_limit: u64, sync_on_write: bool) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            memory_limit,
            sync_on_write,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memory_limit(&self) -> u64 {
        self.memory_limit
    }

    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.collection_path(name).join(format!("{}.{}", name, DOCUMENT_EXT))
    }

    /// Lock file kept next to the collection directory
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, LOCK_EXT))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.collection_path(name).is_dir()
    }

    pub fn is_deleted(&self, name: &str) -> bool {
        !self.exists(name)
    }

    /// Check everything `create` checks, without touching the disk.
    pub fn validate(&self, meta: &CollectionMeta) -> Result<()> {
        validate_name("collection name", &meta.name)?;
        meta.schema.validate()?;
        meta.options.validate()?;
        if meta.kind == CollectionType::Varray {
            meta.schema.split_shape()?;
        }
        let required = meta.array_footprint()?;
        if required > self.memory_limit {
            log_registry_warn!(
                "Schema exceeds memory limit",
                collection = meta.name.as_str(),
                required = required,
                limit = self.memory_limit
            );
            return Err(StoreError::MemoryLimitExceeded {
                required,
                limit: self.memory_limit,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, meta), fields(name = %meta.name), level = "debug")]
    pub fn create(&self, meta: &CollectionMeta) -> Result<()> {
        logged("collection.create", &meta.name, self.create_inner(meta))
    }

    fn create_inner(&self, meta: &CollectionMeta) -> Result<()> {
        self.validate(meta)?;

        let path = self.collection_path(&meta.name);
        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(format!("collection {}", meta.name)));
            }
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = document::create(&self.document_path(&meta.name), meta, self.sync_on_write) {
            if let Err(cleanup) = fs::remove_dir_all(&path) {
                log_registry_warn!(
                    "Rollback of collection directory failed",
                    collection = meta.name.as_str(),
                    error = tracing::field::display(&cleanup)
                );
            }
            return Err(e);
        }
        log_registry_info!("Collection created", collection = meta.name.as_str());
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<CollectionMeta> {
        let result = validate_name("collection name", name).and_then(|_| {
            document::read(&self.document_path(name))
                .map_err(|e| match e {
                    StoreError::NotFound(_) => StoreError::NotFound(format!("collection {}", name)),
                    other => other,
                })
        });
        logged("collection.read", name, result)
    }

    /// Remove the collection subtree and its lock file.
    #[instrument(skip(self), level = "debug")]
    pub fn delete(&self, name: &str) -> Result<()> {
        let result = validate_name("collection name", name).and_then(|_| {
            remove_ignoring_missing(fs::remove_dir_all(self.collection_path(name)))?;
            remove_ignoring_missing(fs::remove_file(self.lock_path(name)))?;
            Ok(())
        });
        if result.is_ok() {
            log_registry_info!("Collection deleted", collection = name);
        }
        logged("collection.delete", name, result)
    }

    /// Remove everything under the collection except its document.
    #[instrument(skip(self), level = "debug")]
    pub fn clear(&self, name: &str) -> Result<()> {
        let result = (|| -> Result<()> {
            validate_name("collection name", name)?;
            let path = self.collection_path(name);
            let keep = self.document_path(name);
            let entries = match fs::read_dir(&path) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StoreError::NotFound(format!("collection {}", name)));
                }
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let entry_path = entry.path();
                if entry.file_type()?.is_dir() {
                    remove_ignoring_missing(fs::remove_dir_all(&entry_path))?;
                } else if entry_path != keep {
                    remove_ignoring_missing(fs::remove_file(&entry_path))?;
                }
            }
            Ok(())
        })();
        if result.is_ok() {
            log_registry_info!("Collection cleared", collection = name);
        }
        logged("collection.clear", name, result)
    }

    /// Documents of every collection directory; plain files are skipped.
    pub fn iter(&self) -> Result<impl Iterator<Item = Result<CollectionMeta>> + '_> {
        let entries = fs::read_dir(&self.root)?;
        Ok(entries.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => Some(self.read(&entry.file_name().to_string_lossy())),
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            }
        }))
    }
}

fn remove_ignoring_missing(result: io::Result<()>) -> Result<()> {
    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
