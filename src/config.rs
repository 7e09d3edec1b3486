//! Store preferences and config file location
//!
//! **Why**: The cache radius trades RAM for scrubbing smoothness and is the one knob
//! users tune, so it lives in a small JSON prefs file next to other app config.
//!
//! **Used by**: FrameStore construction, CLI (`main.rs`)

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefs file name inside the config directory
pub const CONFIG_FILE: &str = "framestore.json";

/// Environment override for the config directory
pub const CONFIG_DIR_ENV: &str = "FRAMESTORE_CONFIG_DIR";

/// Default half-width of the resident full-resolution window
pub const DEFAULT_CACHE_RADIUS: usize = 25;

/// Frame store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Cache keeps at most `2 * frame_cache_radius + 1` full-resolution frames
    pub frame_cache_radius: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            frame_cache_radius: DEFAULT_CACHE_RADIUS,
        }
    }
}

impl StoreConfig {
    pub fn with_radius(frame_cache_radius: usize) -> Self {
        Self { frame_cache_radius }
    }

    /// Load prefs; missing or malformed files yield defaults
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => {
                info!("No prefs at {}, using defaults", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Invalid prefs {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save prefs as pretty JSON, creating the parent directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Serialize prefs")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write prefs: {}", path.display()))?;
        Ok(())
    }
}

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (FRAMESTORE_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }

    /// Config directory: custom dir, else platform config dir + `framestore`, else `.`
    ///
    /// Platform paths:
    /// - Linux: ~/.config/framestore
    /// - macOS: ~/Library/Application Support/framestore
    /// - Windows: %APPDATA%\framestore
    pub fn config_dir(&self) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        if let Some(dir) = dirs_next::config_dir() {
            return dir.join("framestore");
        }
        PathBuf::from(".")
    }

    /// Path to a file inside the config directory
    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };
        assert_eq!(config.config_file(CONFIG_FILE), PathBuf::from("/custom/framestore.json"));
    }

    #[test]
    fn test_cli_dir_wins() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/cli")));
        assert_eq!(config.config_dir(), PathBuf::from("/cli"));
    }

    #[test]
    fn test_default_platform_path() {
        let config = PathConfig { config_dir: None };
        let path = config.config_file(CONFIG_FILE);
        assert!(path.to_string_lossy().contains("framestore.json"));
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(StoreConfig::load(&dir.path().join("none.json")), StoreConfig::default());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ radius").unwrap();
        assert_eq!(StoreConfig::load(&bad).frame_cache_radius, DEFAULT_CACHE_RADIUS);
    }

    #[test]
    fn test_unknown_keys_ignored_missing_defaulted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        std::fs::write(&path, r#"{"theme": "dark"}"#).unwrap();
        assert_eq!(StoreConfig::load(&path), StoreConfig::default());

        std::fs::write(&path, r#"{"frame_cache_radius": 4, "theme": "dark"}"#).unwrap();
        assert_eq!(StoreConfig::load(&path), StoreConfig::with_radius(4));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        StoreConfig::with_radius(7).save(&path).unwrap();
        assert_eq!(StoreConfig::load(&path), StoreConfig::with_radius(7));
    }
}
