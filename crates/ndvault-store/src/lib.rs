//! # ndvault-store
//!
//! Local file-system storage engine for multi-dimensional arrays.
//!
//! ## Directory layout
//!
//! ```text
//! <root>/collections/
//! ├── <name>.lock                                  external lock file
//! └── <name>/
//!     ├── <name>.json                              collection document
//!     ├── array_data/<h0h1>/<h2h3>/<id>.ndv        array container
//!     ├── array_symlinks/<attr>/.../<id>.ndv       link record
//!     ├── varray_data/<h0h1>/<h2h3>/<id>.json      virtual-array document
//!     └── varray_symlinks/<attr>/.../<id>.json     link record
//! ```
//!
//! `h` is the hex BLAKE3 digest of the id. Directory names come from
//! [`ndvault_config::StorageConfig`].
//!
//! ## Concurrency
//!
//! Stores perform blocking I/O and take no locks. Callers hold a lock from
//! [`locks`] (or their own [`locks::LockManager`]) around each operation.

mod document;

pub mod array;
pub mod engine;
pub mod error;
pub mod index;
pub mod layout;
pub mod link;
pub mod locks;
pub mod meta;
pub mod pool;
pub mod registry;
pub mod sweep;
pub mod varray;

pub use array::ArrayStore;
pub use engine::Engine;
pub use error::{ErrorKind, Result, StoreError};
pub use index::SecondaryIndex;
pub use layout::Layout;
pub use link::{get_record, LinkRecord};
pub use locks::{with_lock, LocalLockManager, LockGuard, LockKey, LockKind, LockManager, NoopLockManager};
pub use meta::{
    ArrayMeta, AttributeSchema, Attributes, CollectionMeta, CollectionSchema, CollectionType, DimensionSchema,
    VArrayMeta,
};
pub use pool::WorkerPool;
pub use registry::CollectionRegistry;
pub use sweep::Sweeper;
pub use varray::VArrayStore;

pub use ndvault_container::{Block, Bounds, DType, Scalar, StorageOptions};
