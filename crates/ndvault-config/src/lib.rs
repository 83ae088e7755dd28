//! # ndvault-config
//!
//! Configuration management for ndvault.
//!
//! Loads configuration from:
//! 1. `~/.ndvault/config.toml` (global)
//! 2. `.ndvault/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! Configuration is only ever read from the environment, never written to it.
//! Values reach the storage layers through constructors.

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> =
    Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get a snapshot of the global config.
pub fn config() -> Config {
    match CONFIG.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    match CONFIG.write() {
        Ok(mut guard) => *guard = new_config,
        Err(poisoned) => *poisoned.into_inner() = new_config,
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub workers: WorkersConfig,
    pub container: ContainerConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.ndvault/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        // 2. Project config (.ndvault/config.toml) overrides global
        let project_path = Path::new(".ndvault/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::from_file(project_path)?;
            config.merge(project_config);
        }

        // 3. Environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Load a single config file without consulting the standard locations.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.ndvault/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".ndvault/config.toml"))
    }

    /// Build a config rooted at `root` with every other value at its default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.storage.root = root.into();
        config
    }

    /// Merge a project config over this one.
    ///
    /// Only values that differ from the defaults replace the current ones.
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();
        if other.storage.root != defaults.storage.root {
            self.storage.root = other.storage.root;
        }
        if other.storage.link_mode != defaults.storage.link_mode {
            self.storage.link_mode = other.storage.link_mode;
        }
        let dirs = [
            (&mut self.storage.collections_dir, other.storage.collections_dir, &defaults.storage.collections_dir),
            (&mut self.storage.array_data_dir, other.storage.array_data_dir, &defaults.storage.array_data_dir),
            (&mut self.storage.array_links_dir, other.storage.array_links_dir, &defaults.storage.array_links_dir),
            (&mut self.storage.varray_data_dir, other.storage.varray_data_dir, &defaults.storage.varray_data_dir),
            (&mut self.storage.varray_links_dir, other.storage.varray_links_dir, &defaults.storage.varray_links_dir),
        ];
        for (current, value, default) in dirs {
            if value != *default {
                *current = value;
            }
        }
        if other.limits.memory_limit != defaults.limits.memory_limit {
            self.limits.memory_limit = other.limits.memory_limit;
        }
        if other.workers.threads.is_some() {
            self.workers.threads = other.workers.threads;
        }
        if other.container.sync_on_write != defaults.container.sync_on_write {
            self.container.sync_on_write = other.container.sync_on_write;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("NDVAULT_ROOT") {
            self.storage.root = PathBuf::from(path);
        }
        if let Ok(threads) = std::env::var("NDVAULT_THREADS") {
            if let Ok(n) = threads.parse() {
                self.workers.threads = Some(n);
            }
        }
        if let Ok(limit) = std::env::var("NDVAULT_MEMORY_LIMIT") {
            if let Ok(n) = limit.parse() {
                self.limits.memory_limit = n;
            }
        }
        if let Ok(mode) = std::env::var("NDVAULT_LINK_MODE") {
            match mode.as_str() {
                "symlink" => self.storage.link_mode = LinkMode::Symlink,
                "pointer" => self.storage.link_mode = LinkMode::Pointer,
                other => debug!("Ignoring unknown NDVAULT_LINK_MODE {:?}", other),
            }
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// How secondary-index link records are materialised on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// Native symbolic link to the main container (unix only)
    Symlink,
    /// Small file holding the absolute path of the main container
    Pointer,
}

impl Default for LinkMode {
    fn default() -> Self {
        if cfg!(unix) {
            LinkMode::Symlink
        } else {
            LinkMode::Pointer
        }
    }
}

/// Storage layout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding every collection
    pub root: PathBuf,
    pub collections_dir: String,
    pub array_data_dir: String,
    pub array_links_dir: String,
    pub varray_data_dir: String,
    pub varray_links_dir: String,
    pub link_mode: LinkMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_dir()
                .map(|d| d.join("ndvault"))
                .unwrap_or_else(|| PathBuf::from("/tmp/ndvault")),
            collections_dir: "collections".to_string(),
            array_data_dir: "array_data".to_string(),
            array_links_dir: "array_symlinks".to_string(),
            varray_data_dir: "varray_data".to_string(),
            varray_links_dir: "varray_symlinks".to_string(),
            link_mode: LinkMode::default(),
        }
    }
}

impl StorageConfig {
    /// Directory that holds one sub-directory per collection.
    pub fn collections_path(&self) -> PathBuf {
        self.root.join(&self.collections_dir)
    }
}

/// Resource limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upper bound in bytes for a single array's dense footprint
    pub memory_limit: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            memory_limit: 100 * 1024 * 1024,
        }
    }
}

/// Batch worker pool configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Number of worker threads (None = auto)
    pub threads: Option<usize>,
}

/// Container file behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// fsync a rewritten container before it replaces the old one
    pub sync_on_write: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.collections_dir, "collections");
        assert_eq!(config.storage.array_links_dir, "array_symlinks");
        assert_eq!(config.limits.memory_limit, 104_857_600);
        assert!(config.workers.threads.is_none());
        assert!(config.container.sync_on_write);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[limits]"));
        assert!(toml_str.contains("array_data"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::with_root("/data/vault");
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.storage, config.storage);
        assert_eq!(parsed.limits, config.limits);
    }

    #[test]
    fn test_merge_only_overrides_non_defaults() {
        let mut base = Config::with_root("/global");
        base.limits.memory_limit = 42;

        base.storage.varray_links_dir = "global_links".to_string();

        let mut project = Config::default();
        project.workers.threads = Some(3);
        project.storage.collections_dir = "cols".to_string();
        project.storage.array_data_dir = "custom_data".to_string();
        project.storage.array_links_dir = "custom_links".to_string();
        project.storage.varray_data_dir = "custom_vdata".to_string();
        base.merge(project);

        assert_eq!(base.storage.root, PathBuf::from("/global"));
        assert_eq!(base.limits.memory_limit, 42);
        assert_eq!(base.workers.threads, Some(3));
        assert_eq!(base.storage.collections_dir, "cols");
        assert_eq!(base.storage.array_data_dir, "custom_data");
        assert_eq!(base.storage.array_links_dir, "custom_links");
        assert_eq!(base.storage.varray_data_dir, "custom_vdata");
        // Left at its default in the project file
        assert_eq!(base.storage.varray_links_dir, "global_links");
        assert_eq!(base.storage.collections_path(), PathBuf::from("/global/cols"));
    }

    #[test]
    fn test_project_file_directories_survive_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[storage]\ncollections_dir = \"cols\"\narray_data_dir = \"custom_data\"\n",
        )
        .unwrap();

        let mut config = Config::with_root("/global");
        config.merge(Config::from_file(&path).unwrap());
        assert_eq!(config.storage.collections_dir, "cols");
        assert_eq!(config.storage.array_data_dir, "custom_data");
        assert_eq!(config.storage.array_links_dir, "array_symlinks");
    }

    #[test]
    fn test_link_mode_parses_lowercase() {
        let parsed: Config = toml::from_str("[storage]\nlink_mode = \"pointer\"\n").unwrap();
        assert_eq!(parsed.storage.link_mode, LinkMode::Pointer);
    }

    #[test]
    fn test_global_snapshot_is_readable() {
        let snapshot = config();
        assert!(!snapshot.storage.collections_dir.is_empty());
    }
}
