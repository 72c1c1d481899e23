//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// All infrastructure sections.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Filesystem paths for cache and zone data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Directory holding `midi_cache.json`.
    /// Default: ~/.local/share/moodring/cache
    #[serde(default = "PathsConfig::default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Directory scanned for zone definition files (`*.toml`).
    /// Default: ./zones
    #[serde(default = "PathsConfig::default_zone_dir")]
    pub zone_dir: PathBuf,
}

impl PathsConfig {
    fn default_cache_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/moodring/cache"))
            .unwrap_or_else(|| PathBuf::from(".local/share/moodring/cache"))
    }

    fn default_zone_dir() -> PathBuf {
        PathBuf::from("zones")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: Self::default_cache_dir(),
            zone_dir: Self::default_zone_dir(),
        }
    }
}

/// Which transport carries generation requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    #[serde(alias = "ws")]
    WebSocket,
    #[serde(alias = "namedpipe")]
    Pipe,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "pipe" | "namedpipe" => Ok(TransportKind::Pipe),
            other => Err(format!("unknown transport kind: {}", other)),
        }
    }
}

/// Generation server endpoints and timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,

    /// WebSocket endpoint of the generation server.
    #[serde(default = "TransportConfig::default_server_url")]
    pub server_url: String,

    /// Pipe name (windows) or socket name/path (unix).
    #[serde(default = "TransportConfig::default_pipe_name")]
    pub pipe_name: String,

    #[serde(default = "TransportConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Generation is slow server-side; keep this in minutes territory.
    #[serde(default = "TransportConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "TransportConfig::default_max_connect_attempts")]
    pub max_connect_attempts: u32,

    #[serde(default = "TransportConfig::default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "TransportConfig::default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "TransportConfig::default_max_response_bytes")]
    pub max_response_bytes: usize,
}

impl TransportConfig {
    fn default_server_url() -> String {
        "ws://localhost:8766".to_string()
    }

    fn default_pipe_name() -> String {
        "AdaptiveMusicPipe".to_string()
    }

    fn default_connect_timeout_ms() -> u64 {
        5_000
    }

    fn default_request_timeout_ms() -> u64 {
        120_000
    }

    fn default_max_connect_attempts() -> u32 {
        5
    }

    fn default_backoff_base_ms() -> u64 {
        1_000
    }

    fn default_backoff_max_ms() -> u64 {
        16_000
    }

    fn default_max_response_bytes() -> usize {
        10 * 1024 * 1024
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            server_url: Self::default_server_url(),
            pipe_name: Self::default_pipe_name(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            request_timeout_ms: Self::default_request_timeout_ms(),
            max_connect_attempts: Self::default_max_connect_attempts(),
            backoff_base_ms: Self::default_backoff_base_ms(),
            backoff_max_ms: Self::default_backoff_max_ms(),
            max_response_bytes: Self::default_max_response_bytes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// Log level filter (trace, debug, info, warn, error), or a full
    /// `tracing_subscriber::EnvFilter` directive.
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// MIDI cache budget and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    #[serde(default = "CacheSettings::default_max_bytes")]
    pub max_bytes: u64,

    /// Remove the cache file at shutdown so the next session generates fresh music.
    #[serde(default)]
    pub delete_on_shutdown: bool,
}

impl CacheSettings {
    fn default_max_bytes() -> u64 {
        50 * 1024 * 1024
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_bytes: Self::default_max_bytes(),
            delete_on_shutdown: false,
        }
    }
}
