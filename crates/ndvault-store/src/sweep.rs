//! Removal of files plus the empty shard directories they leave behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ndvault_config::log_sweep_debug;

use crate::Result;

/// Prunes empty directories up to, but never including, its boundaries
#[derive(Debug, Clone)]
pub struct Sweeper {
    boundaries: Vec<PathBuf>,
}

impl Sweeper {
    pub fn new(boundaries: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            boundaries: boundaries.into_iter().collect(),
        }
    }

    fn is_boundary(&self, dir: &Path) -> bool {
        self.boundaries.iter().any(|b| b == dir)
    }

    fn is_inside(&self, dir: &Path) -> bool {
        self.boundaries.iter().any(|b| dir.starts_with(b))
    }

    /// Remove `file` (missing is fine) and prune its empty ancestors.
    pub fn remove(&self, file: &Path) -> Result<()> {
        match fs::remove_file(file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = file.parent() {
            self.prune(parent)?;
        }
        Ok(())
    }

    /// Walk upward from `start`, removing directories while they are empty.
    pub fn prune(&self, start: &Path) -> Result<()> {
        for dir in start.ancestors() {
            if self.is_boundary(dir) || !self.is_inside(dir) {
                break;
            }
            let mut entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if entries.next().is_some() {
                break;
            }
            match fs::remove_dir(dir) {
                Ok(()) => {
                    log_sweep_debug!("Pruned empty directory", dir = tracing::field::display(dir.display()));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                // Refilled concurrently
                Err(_) => break,
            }
        }
        Ok(())
    }
}
