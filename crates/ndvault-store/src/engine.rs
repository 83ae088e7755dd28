//! Engine facade wiring configuration into the stores.

use std::sync::Arc;

use ndvault_config::{log_store_info, Config, StorageConfig};
use ndvault_container::ContainerCodec;

use crate::array::ArrayStore;
use crate::link::{get_record, LinkRecord};
use crate::meta::CollectionMeta;
use crate::pool::WorkerPool;
use crate::registry::CollectionRegistry;
use crate::varray::VArrayStore;
use crate::Result;

/// Shared by every store an engine hands out
#[derive(Clone)]
pub(crate) struct StoreContext {
    pub(crate) codec: ContainerCodec,
    pub(crate) record: &'static dyn LinkRecord,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) storage: StorageConfig,
    pub(crate) sync_on_write: bool,
}

pub struct Engine {
    registry: CollectionRegistry,
    ctx: StoreContext,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.ctx.storage.root)
            .field("link_record", &self.ctx.record.name())
            .field("pool", &self.ctx.pool)
            .finish()
    }
}

impl Engine {
    pub fn new(config: &Config) -> Result<Self> {
        let storage = config.storage.clone();
        let registry = CollectionRegistry::new(
            storage.collections_path(),
            config.limits.memory_limit,
            config.container.sync_on_write,
        )?;
        let pool = Arc::new(WorkerPool::new(config.workers.threads)?);
        let record = get_record(storage.link_mode);
        log_store_info!(
            "Engine ready",
            root = tracing::field::display(storage.root.display()),
            link_record = record.name(),
            threads = pool.threads()
        );
        Ok(Self {
            registry,
            ctx: StoreContext {
                codec: ContainerCodec::new(&config.container),
                record,
                pool,
                storage,
                sync_on_write: config.container.sync_on_write,
            },
        })
    }

    pub fn collections(&self) -> &CollectionRegistry {
        &self.registry
    }

    /// Array store of `collection`
    pub fn arrays(&self, collection: &CollectionMeta) -> Result<ArrayStore> {
        let path = self.registry.collection_path(&collection.name);
        ArrayStore::new(&self.ctx, &path, collection.clone())
    }

    /// Virtual-array store of `collection`; fails for plain array collections.
    pub fn varrays(&self, collection: &CollectionMeta) -> Result<VArrayStore> {
        let path = self.registry.collection_path(&collection.name);
        VArrayStore::new(&self.ctx, &path, collection.clone())
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.ctx.pool
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.ctx.storage
    }
}
