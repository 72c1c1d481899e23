//! Cache configuration with environment variable loading.
//!
//! Environment variables:
//! - `MOODRING_CACHE_DIR`: Directory holding the cache file
//! - `MOODRING_CACHE_MAX_BYTES`: Byte budget before LRU eviction
//!
//! Default path: `~/.local/share/moodring/cache`

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// File name of the persisted cache document inside `base_path`.
pub const CACHE_FILE_NAME: &str = "midi_cache.json";

/// Default byte budget (50MB).
pub const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Configuration for the MIDI cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Directory holding `midi_cache.json`.
    pub base_path: PathBuf,

    /// Total MIDI bytes allowed before least-recently-used entries are evicted.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_path: default_cache_path(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

fn default_cache_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".local/share/moodring/cache"))
        .unwrap_or_else(|| PathBuf::from(".local/share/moodring/cache"))
}

impl CacheConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let base_path = env::var("MOODRING_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_cache_path());

        let max_bytes = env::var("MOODRING_CACHE_MAX_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_BYTES);

        Self { base_path, max_bytes }
    }

    /// Create a config with a specific base path and the default budget.
    pub fn with_base_path(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Full path of the persisted cache document.
    pub fn cache_file(&self) -> PathBuf {
        self.base_path.join(CACHE_FILE_NAME)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert!(config.base_path.to_string_lossy().contains("moodring"));
        assert_eq!(config.max_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn test_with_base_path() {
        let config = CacheConfig::with_base_path("/custom/path").with_max_bytes(10);
        assert_eq!(config.base_path, PathBuf::from("/custom/path"));
        assert_eq!(config.max_bytes, 10);
        assert_eq!(config.cache_file(), PathBuf::from("/custom/path/midi_cache.json"));
    }
}
