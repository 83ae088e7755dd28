//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary storage root
//! - A `Config` pointing at that root
//!
//! # Usage
//!
//! ```ignore
//! use ndvault_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     // env.root and env.config() are isolated per test
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, LinkMode};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with its own storage root
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Storage root for this test
    pub root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
    config: Config,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join(format!("vault-{}", test_id));
        std::fs::create_dir_all(&root)?;

        let mut config = Config::with_root(&root);
        config.workers.threads = Some(2);
        // Temp dirs are throwaway; skip fsync to keep tests fast.
        config.container.sync_on_write = false;

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            test_id,
            config,
        })
    }

    /// Same as `new` but with link records written as pointer files.
    pub fn with_pointer_links() -> anyhow::Result<Self> {
        let mut env = Self::new()?;
        env.config.storage.link_mode = LinkMode::Pointer;
        Ok(env)
    }

    /// Config rooted at this environment
    pub fn config(&self) -> Config {
        self.config.clone()
    }

    /// Mutable access for tests that need non-default limits
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Path of the collections directory under this root
    pub fn collections_path(&self) -> PathBuf {
        self.config.storage.collections_path()
    }

    /// Count regular files and symlinks below `relative_path`
    pub fn count_files(&self, relative_path: &str) -> usize {
        walk_count(&self.root.join(relative_path))
    }
}

fn walk_count(dir: &std::path::Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(ft) if ft.is_dir() => walk_count(&entry.path()),
            Ok(_) => 1,
            Err(_) => 0,
        })
        .sum()
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
