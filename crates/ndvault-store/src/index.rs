//! Secondary index: at most one link record per attribute combination.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ndvault_config::{log_index_debug, log_index_warn};

use crate::link::LinkRecord;
use crate::{Result, StoreError};

/// Link records rooted at one links directory
#[derive(Clone)]
pub struct SecondaryIndex {
    record: &'static dyn LinkRecord,
    ext: String,
}

impl std::fmt::Debug for SecondaryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryIndex")
            .field("record", &self.record.name())
            .field("ext", &self.ext)
            .finish()
    }
}

impl SecondaryIndex {
    pub fn new(record: &'static dyn LinkRecord, ext: &str) -> Self {
        Self {
            record,
            ext: ext.to_string(),
        }
    }

    pub fn record_name(&self) -> &'static str {
        self.record.name()
    }

    /// Fail with `AlreadyExists` when `dir` already holds an entry.
    pub fn ensure_vacant(&self, dir: &Path) -> Result<()> {
        match fs::read_dir(dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    log_index_warn!(
                        "Attribute combination already taken",
                        dir = tracing::field::display(dir.display())
                    );
                    return Err(StoreError::AlreadyExists(format!(
                        "an entity with the same primary attributes exists under {}",
                        dir.display()
                    )));
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create the link record `dir/<file_name>` pointing at `target`.
    ///
    /// With `unique` set the directory must not hold any other entry.
    pub fn create_link(&self, dir: &Path, file_name: &str, target: &Path, unique: bool) -> Result<PathBuf> {
        if unique {
            self.ensure_vacant(dir)?;
        }
        fs::create_dir_all(dir)?;
        let link = dir.join(file_name);
        let target = fs::canonicalize(target)?;
        self.record.create(&target, &link).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => {
                StoreError::AlreadyExists(format!("link record {}", link.display()))
            }
            _ => e.into(),
        })?;
        log_index_debug!(
            "Link record created",
            link = tracing::field::display(link.display()),
            record = self.record.name()
        );
        Ok(link)
    }

    /// First record file directly under `dir`, unresolved.
    pub fn first_record(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() || !path.extension().is_some_and(|e| e == self.ext.as_str()) {
                continue;
            }
            return Ok(Some(path));
        }
        Ok(None)
    }

    /// Find the record under `dir` and resolve it to its target.
    ///
    /// Returns `None` when the directory is missing or holds no record. A
    /// record whose target is gone is a [`StoreError::BrokenReference`].
    pub fn resolve(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let Some(path) = self.first_record(dir)? else {
            return Ok(None);
        };
        match self.record.resolve(&path) {
            Ok(target) => Ok(Some(target)),
            Err(e @ StoreError::BrokenReference { .. }) => {
                log_index_warn!(
                    "Broken link record",
                    link = tracing::field::display(path.display())
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Every record file below `dir`, recursively.
    pub fn records_under(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(dir).follow_links(false) {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            if entry.path().extension().is_some_and(|e| e == self.ext.as_str()) {
                out.push(entry.into_path());
            }
        }
        Ok(out)
    }
}
