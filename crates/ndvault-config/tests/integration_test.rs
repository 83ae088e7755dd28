//! Integration tests for ndvault-config
//!
//! These tests verify config loading with real file system operations.

use std::path::PathBuf;
use tempfile::tempdir;

use ndvault_config::{Config, LinkMode};

#[test]
fn test_load_config_from_file() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");

    let config_content = r#"
[storage]
root = "/srv/vault"
collections_dir = "colls"
link_mode = "pointer"

[limits]
memory_limit = 2048

[workers]
threads = 4

[container]
sync_on_write = false
"#;
    std::fs::write(&path, config_content).unwrap();

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.storage.root, PathBuf::from("/srv/vault"));
    assert_eq!(config.storage.collections_dir, "colls");
    assert_eq!(config.storage.collections_path(), PathBuf::from("/srv/vault/colls"));
    assert_eq!(config.storage.link_mode, LinkMode::Pointer);
    assert_eq!(config.limits.memory_limit, 2048);
    assert_eq!(config.workers.threads, Some(4));
    assert!(!config.container.sync_on_write);
}

#[test]
fn test_partial_config_keeps_defaults() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[limits]\nmemory_limit = 100\n").unwrap();

    let config = Config::from_file(&path).unwrap();
    let defaults = Config::default();

    assert_eq!(config.limits.memory_limit, 100);
    assert_eq!(config.storage.array_data_dir, defaults.storage.array_data_dir);
    assert_eq!(config.storage.varray_links_dir, defaults.storage.varray_links_dir);
    assert_eq!(config.container, defaults.container);
}

#[test]
fn test_invalid_toml_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[limits\nmemory_limit = ").unwrap();

    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ndvault_config::ConfigError::Toml(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let temp = tempdir().unwrap();
    let result = Config::from_file(temp.path().join("absent.toml"));
    assert!(matches!(result, Err(ndvault_config::ConfigError::Io(_))));
}

#[test]
fn test_default_toml_parses_back() {
    let rendered = Config::default_toml();
    let parsed: Config = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed.storage, Config::default().storage);
}
