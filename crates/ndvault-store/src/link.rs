//! Link records: secondary-index leaves that point at a main container.
//!
//! # Representations
//!
//! - **Symlink** (unix): a native symbolic link to the absolute target path
//! - **Pointer**: a small file holding a magic line and the absolute target
//!
//! [`resolve`] understands both forms regardless of the configured mode, so
//! a tree written in one mode stays readable in the other.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ndvault_config::LinkMode;

use crate::{Result, StoreError};

const POINTER_MAGIC: &str = "NDVLINK1";

/// Creates link records of one representation
pub trait LinkRecord: Send + Sync {
    /// Create a record at `link` pointing at `target`.
    ///
    /// `target` must be absolute; fails if `link` already exists.
    fn create(&self, target: &Path, link: &Path) -> io::Result<()>;

    /// Resolve a record of any representation to its existing target.
    fn resolve(&self, link: &Path) -> Result<PathBuf> {
        resolve(link)
    }

    /// Name of this representation (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Native symbolic link
#[cfg(unix)]
pub struct SymlinkRecord;

#[cfg(unix)]
impl LinkRecord for SymlinkRecord {
    fn create(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    fn name(&self) -> &'static str {
        "symlink"
    }
}

/// Indirection file storing the target path as data
pub struct PointerRecord;

impl LinkRecord for PointerRecord {
    fn create(&self, target: &Path, link: &Path) -> io::Result<()> {
        let target = target.to_str().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "link target is not valid UTF-8")
        })?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(link)?;
        io::Write::write_all(&mut file, format!("{}\n{}\n", POINTER_MAGIC, target).as_bytes())
    }

    fn name(&self) -> &'static str {
        "pointer"
    }
}

/// Record implementation for a configured mode.
///
/// Symlinks are unavailable off unix; pointer records are used there.
#[cfg(unix)]
pub fn get_record(mode: LinkMode) -> &'static dyn LinkRecord {
    static SYMLINK: SymlinkRecord = SymlinkRecord;
    static POINTER: PointerRecord = PointerRecord;
    match mode {
        LinkMode::Symlink => &SYMLINK,
        LinkMode::Pointer => &POINTER,
    }
}

#[cfg(not(unix))]
pub fn get_record(_mode: LinkMode) -> &'static dyn LinkRecord {
    static POINTER: PointerRecord = PointerRecord;
    &POINTER
}

/// Read the target of a link record without checking that it exists.
pub fn read_target(link: &Path) -> Result<PathBuf> {
    let meta = fs::symlink_metadata(link)?;
    if meta.file_type().is_symlink() {
        return Ok(fs::read_link(link)?);
    }
    let text = fs::read_to_string(link)?;
    let mut lines = text.lines();
    match (lines.next(), lines.next()) {
        (Some(POINTER_MAGIC), Some(target)) if !target.is_empty() => Ok(PathBuf::from(target)),
        _ => Err(StoreError::Validation(format!(
            "{} is not a link record",
            link.display()
        ))),
    }
}

/// Resolve a link record to its existing target.
///
/// A record whose target is gone yields [`StoreError::BrokenReference`].
pub fn resolve(link: &Path) -> Result<PathBuf> {
    let target = read_target(link)?;
    let target = if target.is_relative() {
        link.parent().map(|p| p.join(&target)).unwrap_or(target)
    } else {
        target
    };
    match fs::metadata(&target) {
        Ok(m) if m.is_file() => Ok(target),
        Ok(_) => Err(StoreError::BrokenReference {
            link: link.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::BrokenReference {
            link: link.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pointer_roundtrip() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("main.ndv");
        let link = dir.path().join("link.ndv");
        fs::write(&target, b"x").unwrap();

        get_record(LinkMode::Pointer).create(&target, &link).unwrap();
        assert!(link.is_file());
        assert_eq!(resolve(&link).unwrap(), target);
    }

    #[test]
    fn test_pointer_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("link.ndv");
        fs::write(&link, b"taken").unwrap();
        let err = PointerRecord.create(Path::new("/abs/target"), &link).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_roundtrip() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("main.ndv");
        let link = dir.path().join("link.ndv");
        fs::write(&target, b"x").unwrap();

        let record = get_record(LinkMode::Symlink);
        assert_eq!(record.name(), "symlink");
        record.create(&target, &link).unwrap();
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(resolve(&link).unwrap(), target);
    }

    #[test]
    fn test_missing_target_is_broken() {
        for mode in [LinkMode::Symlink, LinkMode::Pointer] {
            let dir = tempdir().unwrap();
            let target = dir.path().join("main.ndv");
            let link = dir.path().join("link.ndv");
            fs::write(&target, b"x").unwrap();
            get_record(mode).create(&target, &link).unwrap();

            fs::remove_file(&target).unwrap();
            assert!(matches!(resolve(&link), Err(StoreError::BrokenReference { .. })));
            // The record itself is still readable
            assert_eq!(read_target(&link).unwrap(), target);
        }
    }

    #[test]
    fn test_plain_file_is_not_a_record() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("junk.ndv");
        fs::write(&file, b"hello").unwrap();
        assert!(matches!(resolve(&file), Err(StoreError::Validation(_))));
    }
}
