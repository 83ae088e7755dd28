//! JSON documents on disk: virtual-array metadata and collection documents.
//!
//! Writes go to a temp file next to the destination and are published by
//! rename (replace) or hard link (create-only), so readers never observe a
//! half-written document.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Result, StoreError};

/// Temp file that is removed unless published
struct Staged {
    temp_path: PathBuf,
    published: bool,
}

impl Staged {
    fn write<T: Serialize>(path: &Path, value: &T, sync: bool) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staged = Self {
            temp_path: path.with_file_name(format!(
                "{}.{}.{:?}.tmp",
                file_name,
                std::process::id(),
                std::thread::current().id()
            )),
            published: false,
        };
        let mut writer = BufWriter::new(File::create(&staged.temp_path)?);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        if sync {
            file.sync_all()?;
        }
        Ok(staged)
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.published {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Write a new document; fails with `AlreadyExists` if `path` exists.
pub(crate) fn create<T: Serialize>(path: &Path, value: &T, sync: bool) -> Result<()> {
    let mut staged = Staged::write(path, value, sync)?;
    match fs::hard_link(&staged.temp_path, path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StoreError::AlreadyExists(format!("document {}", path.display())));
        }
        Err(_) if path.exists() => {
            return Err(StoreError::AlreadyExists(format!("document {}", path.display())));
        }
        Err(_) => {
            fs::rename(&staged.temp_path, path)?;
            staged.published = true;
        }
    }
    Ok(())
}

/// Replace an existing document.
pub(crate) fn replace<T: Serialize>(path: &Path, value: &T, sync: bool) -> Result<()> {
    let mut staged = Staged::write(path, value, sync)?;
    fs::rename(&staged.temp_path, path)?;
    staged.published = true;
    Ok(())
}

/// Read a document; a missing file is `NotFound`.
pub(crate) fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(format!("document {}", path.display())));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    #[test]
    fn test_create_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");

        create(&path, &json!({"a": 1}), false).unwrap();
        let second = create(&path, &json!({"a": 2}), false);
        assert!(matches!(second, Err(StoreError::AlreadyExists(_))));
        assert_eq!(read::<Value>(&path).unwrap(), json!({"a": 1}));
        // Only the document remains
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_replace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        create(&path, &json!({"a": 1}), false).unwrap();
        replace(&path, &json!({"a": 2}), true).unwrap();
        assert_eq!(read::<Value>(&path).unwrap(), json!({"a": 2}));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_read_missing() {
        let dir = tempdir().unwrap();
        let err = read::<Value>(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
