//! Minimal configuration loading for moodring.
//!
//! This crate provides configuration loading with minimal dependencies,
//! so every moodring crate can import it without dependency cycles.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): paths, transport endpoints and
//!   timeouts, telemetry, cache budget. Fixed for the life of the process.
//!
//! - **Tuning** (`TuningConfig`): coefficients for danger tracking, layer
//!   mixing and parameter mapping. Seeds the runtime services.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/moodring/config.toml` (system)
//! 2. `~/.config/moodring/config.toml` (user)
//! 3. `./moodring.toml` (local override, or the `--config` path)
//! 4. Environment variables (`MOODRING_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! cache_dir = "~/.local/share/moodring/cache"
//! zone_dir = "./zones"
//!
//! [transport]
//! kind = "websocket"
//! server_url = "ws://localhost:8766"
//!
//! [telemetry]
//! log_level = "info"
//!
//! [cache]
//! max_bytes = 52428800
//!
//! [mix]
//! tension_threshold = 0.3
//! combat_threshold = 0.7
//! ```

pub mod infra;
pub mod loader;
pub mod tuning;

pub use infra::{CacheSettings, InfraConfig, PathsConfig, TelemetryConfig, TransportConfig, TransportKind};
pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use tuning::{BpmRange, MapperTuning, MixTuning, TrackerTuning, TuningConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete moodring configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MoodConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Tuning - seeds tracker, mixer and mapper coefficients.
    #[serde(flatten)]
    pub tuning: TuningConfig,
}

impl MoodConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./moodring.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::read_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, std::path::Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Parse a single TOML document on top of the compiled defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let path = std::path::Path::new("<string>");
        let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        loader::from_table(table, path)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::from("# moodring configuration\n\n");
        match toml::to_string_pretty(self) {
            Ok(body) => output.push_str(&body),
            Err(e) => output.push_str(&format!("# failed to render config: {}\n", e)),
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = MoodConfig::default();
        assert_eq!(config.infra.transport.server_url, "ws://localhost:8766");
        assert_eq!(config.infra.transport.pipe_name, "AdaptiveMusicPipe");
        assert_eq!(config.infra.cache.max_bytes, 50 * 1024 * 1024);
        assert!((config.tuning.mix.tension_threshold - 0.3).abs() < f32::EPSILON);
        assert!((config.tuning.mix.combat_threshold - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = MoodConfig::from_toml_str(
            r#"
            [transport]
            kind = "pipe"
            pipe_name = "TestPipe"
            "#,
        )
        .unwrap();

        assert_eq!(config.infra.transport.kind, TransportKind::Pipe);
        assert_eq!(config.infra.transport.pipe_name, "TestPipe");
        // Untouched sections keep their defaults
        assert_eq!(config.infra.transport.server_url, "ws://localhost:8766");
        assert_eq!(config.tuning, TuningConfig::default());
    }

    #[test]
    fn test_parse_full_toml() {
        let config = MoodConfig::from_toml_str(
            r#"
            [paths]
            cache_dir = "/var/cache/moodring"
            zone_dir = "/srv/zones"

            [transport]
            kind = "websocket"
            server_url = "ws://10.0.0.5:9000"
            request_timeout_ms = 60000

            [telemetry]
            log_level = "debug"

            [cache]
            max_bytes = 1024
            delete_on_shutdown = true

            [tracker]
            detection_radius = 30.0
            smooth_factor = 0.2

            [mix]
            zone_fade_secs = 1.5
            initial_zone = "forest"

            [mapper]
            combat_bpm = { min = 120, max = 150 }
            "#,
        )
        .unwrap();

        assert_eq!(config.infra.paths.cache_dir, PathBuf::from("/var/cache/moodring"));
        assert_eq!(config.infra.paths.zone_dir, PathBuf::from("/srv/zones"));
        assert_eq!(config.infra.transport.server_url, "ws://10.0.0.5:9000");
        assert_eq!(config.infra.transport.request_timeout_ms, 60000);
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.infra.cache.max_bytes, 1024);
        assert!(config.infra.cache.delete_on_shutdown);
        assert!((config.tuning.tracker.detection_radius - 30.0).abs() < f32::EPSILON);
        assert!((config.tuning.tracker.critical_radius - 5.0).abs() < f32::EPSILON);
        assert!((config.tuning.mix.zone_fade_secs - 1.5).abs() < f32::EPSILON);
        assert_eq!(config.tuning.mix.initial_zone.as_deref(), Some("forest"));
        assert_eq!(config.tuning.mapper.combat_bpm, BpmRange { min: 120, max: 150 });
        assert_eq!(config.tuning.mapper.ambient_bpm, BpmRange { min: 60, max: 80 });
    }

    #[test]
    fn test_parse_error_names_source() {
        let err = MoodConfig::from_toml_str("[transport\nkind = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_to_toml_roundtrips() {
        let config = MoodConfig::default();
        let rendered = config.to_toml();
        assert!(rendered.contains("[transport]"));
        assert!(rendered.contains("[mix]"));
        let parsed = MoodConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
