//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, MoodConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/moodring/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("moodring/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("moodring.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key,
/// everything else in `overlay` replaces what `base` had.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table over the compiled defaults.
pub fn from_table(table: toml::Table, path: &Path) -> Result<MoodConfig, ConfigError> {
    let mut config: MoodConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

    config.infra.paths.cache_dir = expand_path(&config.infra.paths.cache_dir.to_string_lossy());
    config.infra.paths.zone_dir = expand_path(&config.infra.paths.zone_dir.to_string_lossy());

    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut MoodConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

fn apply_overrides_from(
    config: &mut MoodConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = lookup("MOODRING_CACHE_DIR") {
        config.infra.paths.cache_dir = expand_path(&v);
        sources.env_overrides.push("MOODRING_CACHE_DIR".to_string());
    }
    if let Some(v) = lookup("MOODRING_ZONE_DIR") {
        config.infra.paths.zone_dir = expand_path(&v);
        sources.env_overrides.push("MOODRING_ZONE_DIR".to_string());
    }

    if let Some(v) = lookup("MOODRING_TRANSPORT") {
        if let Ok(kind) = v.parse() {
            config.infra.transport.kind = kind;
            sources.env_overrides.push("MOODRING_TRANSPORT".to_string());
        }
    }
    if let Some(v) = lookup("MOODRING_SERVER_URL") {
        config.infra.transport.server_url = v;
        sources.env_overrides.push("MOODRING_SERVER_URL".to_string());
    }
    if let Some(v) = lookup("MOODRING_PIPE_NAME") {
        config.infra.transport.pipe_name = v;
        sources.env_overrides.push("MOODRING_PIPE_NAME".to_string());
    }

    if let Some(v) = lookup("MOODRING_CACHE_MAX_BYTES") {
        if let Ok(bytes) = v.parse() {
            config.infra.cache.max_bytes = bytes;
            sources.env_overrides.push("MOODRING_CACHE_MAX_BYTES".to_string());
        }
    }

    if let Some(v) = lookup("MOODRING_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("MOODRING_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Some(v) = lookup("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand `~/` and a leading `$VAR/` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        let (var_name, rest) = match stripped.find('/') {
            Some(pos) => (&stripped[..pos], Some(&stripped[pos + 1..])),
            None => (stripped, None),
        };
        return match (env::var(var_name), rest) {
            (Ok(value), Some(rest)) => PathBuf::from(value).join(rest),
            (Ok(value), None) => PathBuf::from(value),
            (Err(_), _) => PathBuf::from(path),
        };
    }

    PathBuf::from(path)
}
