//! Path resolution for containers and link records.
//!
//! Main containers live under a two-level BLAKE3 shard:
//! `<data>/<h[0..2]>/<h[2..4]>/<id>.<ext>`. Link records live under exactly
//! one directory level per primary attribute value:
//! `<links>/<value-1>/<value-2>/.../<id>.<ext>`.
//!
//! A string value is its escaped text. Any other value is the escaped compact
//! JSON behind a `%J` marker, so `"3"` and `3` or `[1, 2]` and `[1, 2, 3]`
//! never share a directory.
//!
//! Nothing here touches the file system; directories are created by the
//! caller right before the first write.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::{Result, StoreError};

/// Bytes that pass through attribute escaping unchanged
fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}

/// Check that `name` can be used as a single path component.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.len() > 255
        || name.starts_with('.')
        || !name.bytes().all(is_plain);
    if bad {
        return Err(StoreError::Validation(format!(
            "{} {:?} must be non-empty, must not start with '.', and may only contain [A-Za-z0-9_.-]",
            kind, name
        )));
    }
    Ok(())
}

/// Escape one attribute value into a path component.
pub fn escape_component(raw: &str) -> String {
    match raw {
        "" => return "%".to_string(),
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if is_plain(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Marker of a non-string value. `J` is not a hex digit, so no escaped
/// string starts with it.
const JSON_MARKER: &str = "%J";

/// The single path component of one attribute value
pub fn attribute_component(value: &Value) -> String {
    match value {
        Value::String(s) => escape_component(s),
        other => format!("{}{}", JSON_MARKER, escape_component(&other.to_string())),
    }
}

/// Hex BLAKE3 digest of an entity id
pub fn id_digest(id: &str) -> String {
    hex::encode(blake3::hash(id.as_bytes()).as_bytes())
}

/// Paths of one entity family (arrays or virtual arrays) inside a collection
#[derive(Debug, Clone)]
pub struct Layout {
    data_root: PathBuf,
    links_root: PathBuf,
    ext: String,
}

impl Layout {
    pub fn new(data_root: impl Into<PathBuf>, links_root: impl Into<PathBuf>, ext: &str) -> Self {
        Self {
            data_root: data_root.into(),
            links_root: links_root.into(),
            ext: ext.to_string(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn links_root(&self) -> &Path {
        &self.links_root
    }

    pub fn ext(&self) -> &str {
        &self.ext
    }

    pub fn file_name(&self, id: &str) -> String {
        format!("{}.{}", id, self.ext)
    }

    /// True if `path` carries this layout's file extension
    pub fn has_ext(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == self.ext.as_str())
    }

    /// Shard directory of the main container for `id`
    pub fn main_dir(&self, id: &str) -> PathBuf {
        let hex = id_digest(id);
        self.data_root.join(&hex[..2]).join(&hex[2..4])
    }

    pub fn main_path(&self, id: &str) -> PathBuf {
        self.main_dir(id).join(self.file_name(id))
    }

    /// Link directory for an ordered list of attribute values
    pub fn link_dir<'a>(&self, values: impl IntoIterator<Item = &'a Value>) -> PathBuf {
        values
            .into_iter()
            .fold(self.links_root.clone(), |path, v| path.join(attribute_component(v)))
    }

    /// Link directory of the member at `position` of virtual array `vid`.
    ///
    /// One level per grid coordinate. Every member of `vid` has as many
    /// coordinates as the grid has dimensions, so no member directory nests
    /// inside another.
    pub fn position_dir(&self, vid: &str, position: &[usize]) -> PathBuf {
        position
            .iter()
            .fold(self.vid_dir(vid), |path, p| path.join(p.to_string()))
    }

    /// Subtree holding every member of virtual array `vid`
    pub fn vid_dir(&self, vid: &str) -> PathBuf {
        self.links_root.join(escape_component(vid))
    }

    pub fn link_path<'a>(&self, values: impl IntoIterator<Item = &'a Value>, id: &str) -> PathBuf {
        self.link_dir(values).join(self.file_name(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layout() -> Layout {
        Layout::new("/c/array_data", "/c/array_symlinks", "ndv")
    }

    #[test]
    fn test_main_path_is_deterministic() {
        let a = layout().main_path("7f1c");
        let b = layout().main_path("7f1c");
        assert_eq!(a, b);
        assert_eq!(a.file_name().unwrap(), "7f1c.ndv");
        // data root + two shard levels + file
        assert_eq!(a.strip_prefix("/c/array_data").unwrap().components().count(), 3);
        assert_ne!(layout().main_dir("7f1c"), layout().main_dir("7f1d"));
    }

    #[test]
    fn test_shard_uses_digest_prefix() {
        let hex = id_digest("abc");
        let dir = layout().main_dir("abc");
        assert!(dir.ends_with(format!("{}/{}", &hex[..2], &hex[2..4])));
    }

    #[test]
    fn test_link_dir_one_level_per_value() {
        let values = [json!("Berlin"), json!(3), json!([1, 2])];
        let dir = layout().link_dir(values.iter());
        assert_eq!(dir, PathBuf::from("/c/array_symlinks/Berlin/%J3/%J%5B1%2C2%5D"));
    }

    #[test]
    fn test_distinct_values_get_distinct_dirs() {
        let l = layout();
        let dir = |values: &[Value]| l.link_dir(values.iter());

        // A shorter list is neither equal to nor a parent of a longer one
        let short = dir(&[json!([1, 2])]);
        let long = dir(&[json!([1, 2, 3])]);
        assert_ne!(short, long);
        assert!(!long.starts_with(&short));

        // Element boundaries between values are kept
        assert_ne!(
            dir(&[json!([1]), json!([2, 3])]),
            dir(&[json!([1, 2]), json!([3])])
        );

        // Strings never collide with other JSON types
        assert_ne!(dir(&[json!("3")]), dir(&[json!(3)]));
        assert_ne!(dir(&[json!("null")]), dir(&[Value::Null]));
        assert_ne!(dir(&[json!("%J3")]), dir(&[json!(3)]));
        assert_ne!(dir(&[json!(true)]), dir(&[json!("true")]));
    }

    #[test]
    fn test_position_dir() {
        let l = layout();
        assert_eq!(l.position_dir("v 1", &[0, 12]), PathBuf::from("/c/array_symlinks/v%201/0/12"));
        assert!(l.position_dir("v1", &[1, 0]).starts_with(l.vid_dir("v1")));
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape_component("a/b"), "a%2Fb");
        assert_eq!(escape_component(""), "%");
        assert_eq!(escape_component(".."), "%2E%2E");
        assert_eq!(escape_component("2023-01-01T00:00:00"), "2023-01-01T00%3A00%3A00");
        assert_eq!(escape_component("%"), "%25");
        // Distinct inputs stay distinct
        assert_ne!(escape_component("%"), escape_component(""));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("id", "b3c9-11ee_x.1").is_ok());
        assert!(validate_name("id", "").is_err());
        assert!(validate_name("id", "..").is_err());
        assert!(validate_name("id", "a/b").is_err());
        assert!(validate_name("collection", ".hidden").is_err());
    }
}
