//! Scoped lock guards for callers of the stores.
//!
//! The stores assume the caller already holds the right lock; they never
//! acquire one themselves. This module gives callers a [`LockManager`] seam,
//! an RAII [`LockGuard`] that releases on every exit path, and
//! [`with_lock`] for wrapping a single operation.
//!
//! ```ignore
//! let key = LockKey::new("weather", &meta.id, LockKind::Write);
//! with_lock(&locks, key, || arrays.update(&meta, &bounds, Some(block)))?;
//! ```

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::Result;

/// Operation class a lock is taken for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Create,
    Read,
    Write,
    Collection,
}

impl LockKind {
    /// Shared locks may be held by many callers at once
    pub fn is_shared(self) -> bool {
        matches!(self, LockKind::Read)
    }
}

/// What a lock protects: one entity of one collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub collection: String,
    pub entity: String,
    pub kind: LockKind,
}

impl LockKey {
    pub fn new(collection: &str, entity: &str, kind: LockKind) -> Self {
        Self {
            collection: collection.to_string(),
            entity: entity.to_string(),
            kind,
        }
    }

    /// Lock over a whole collection (create, clear, delete)
    pub fn collection(name: &str) -> Self {
        Self::new(name, "", LockKind::Collection)
    }
}

pub trait LockManager: Send + Sync {
    /// Block until the lock is granted.
    fn acquire(&self, key: &LockKey) -> Result<()>;

    fn release(&self, key: &LockKey);
}

/// Releases its lock when dropped
pub struct LockGuard<'a> {
    manager: &'a dyn LockManager,
    key: LockKey,
}

impl<'a> LockGuard<'a> {
    pub fn acquire(manager: &'a dyn LockManager, key: LockKey) -> Result<Self> {
        manager.acquire(&key)?;
        Ok(Self { manager, key })
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.key);
    }
}

/// Run `op` while holding `key`.
pub fn with_lock<T>(manager: &dyn LockManager, key: LockKey, op: impl FnOnce() -> Result<T>) -> Result<T> {
    let _guard = LockGuard::acquire(manager, key)?;
    op()
}

/// Grants every lock immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLockManager;

impl LockManager for NoopLockManager {
    fn acquire(&self, _key: &LockKey) -> Result<()> {
        Ok(())
    }

    fn release(&self, _key: &LockKey) {}
}

#[derive(Debug, Default)]
struct SlotState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
}

/// In-process reader/writer locks keyed by (collection, entity).
///
/// Many readers or one writer. A waiting writer blocks new readers, so
/// in-flight readers finish and the writer goes next.
#[derive(Debug, Default)]
pub struct LocalLockManager {
    slots: Mutex<HashMap<(String, String), SlotState>>,
    condvar: Condvar,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<(String, String), SlotState>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'g>(
        &self,
        guard: MutexGuard<'g, HashMap<(String, String), SlotState>>,
    ) -> MutexGuard<'g, HashMap<(String, String), SlotState>> {
        self.condvar.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    /// Number of entities with a lock held or awaited
    pub fn active(&self) -> usize {
        self.slots().len()
    }
}

impl LockManager for LocalLockManager {
    fn acquire(&self, key: &LockKey) -> Result<()> {
        let slot = (key.collection.clone(), key.entity.clone());
        let mut slots = self.slots();
        if key.kind.is_shared() {
            loop {
                let state = slots.entry(slot.clone()).or_default();
                if !state.writer && state.waiting_writers == 0 {
                    state.readers += 1;
                    return Ok(());
                }
                slots = self.wait(slots);
            }
        }

        slots.entry(slot.clone()).or_default().waiting_writers += 1;
        loop {
            let state = slots.entry(slot.clone()).or_default();
            if !state.writer && state.readers == 0 {
                state.waiting_writers -= 1;
                state.writer = true;
                return Ok(());
            }
            slots = self.wait(slots);
        }
    }

    fn release(&self, key: &LockKey) {
        let slot = (key.collection.clone(), key.entity.clone());
        let mut slots = self.slots();
        if let Some(state) = slots.get_mut(&slot) {
            if key.kind.is_shared() {
                state.readers = state.readers.saturating_sub(1);
            } else {
                state.writer = false;
            }
            if state.readers == 0 && !state.writer && state.waiting_writers == 0 {
                slots.remove(&slot);
            }
        }
        self.condvar.notify_all();
    }
}
