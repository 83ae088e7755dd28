//! Bounded worker pool for batch operations.
//!
//! To preserve system resources the default size is half the CPU cores,
//! capped at [`MAX_WORKER_THREADS`]. Batches stop scheduling new items after
//! the first failure and return it; items already finished stay finished.

use std::io;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::{Result, StoreError};

/// Maximum threads for the default pool size
pub const MAX_WORKER_THREADS: usize = 4;

/// Calculate default thread count: min(cpu_cores / 2, MAX_WORKER_THREADS)
pub fn default_thread_count() -> usize {
    (num_cpus::get() / 2).clamp(1, MAX_WORKER_THREADS)
}

pub struct WorkerPool {
    pool: ThreadPool,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .finish()
    }
}

impl WorkerPool {
    /// `None` uses [`default_thread_count`].
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let num_threads = threads.unwrap_or_else(default_thread_count).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("ndvault-worker-{}", i))
            .build()
            .map_err(|e| StoreError::from(io::Error::other(e)))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `f` on every item; the first error is returned.
    pub fn try_for_each<T, F>(&self, items: Vec<T>, f: F) -> Result<()>
    where
        T: Send,
        F: Fn(T) -> Result<()> + Sync + Send,
    {
        self.pool.install(|| items.into_par_iter().try_for_each(f))
    }

    /// Map every item through `f`, keeping input order.
    pub fn try_map<T, R, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R> + Sync + Send,
    {
        self.pool.install(|| items.into_par_iter().map(f).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_thread_count() {
        let n = default_thread_count();
        assert!((1..=MAX_WORKER_THREADS).contains(&n));
    }

    #[test]
    fn test_try_map_keeps_order() {
        let pool = WorkerPool::new(Some(3)).unwrap();
        assert_eq!(pool.threads(), 3);
        let out = pool.try_map((0..100).collect(), |i: i32| Ok(i * 2)).unwrap();
        assert_eq!(out, (0..100).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_first_error_is_returned() {
        let pool = WorkerPool::new(Some(2)).unwrap();
        let seen = AtomicUsize::new(0);
        let result = pool.try_for_each((0..50).collect(), |i: usize| {
            seen.fetch_add(1, Ordering::SeqCst);
            if i == 7 {
                Err(StoreError::Validation("item 7".into()))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(StoreError::Validation(msg)) if msg == "item 7"));
        assert!(seen.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_worker_thread_names() {
        let pool = WorkerPool::new(Some(1)).unwrap();
        let names = pool
            .try_map(vec![()], |_| {
                Ok(std::thread::current().name().unwrap_or_default().to_string())
            })
            .unwrap();
        assert_eq!(names, vec!["ndvault-worker-0".to_string()]);
    }
}
