//! Zone and layer generation templates.
//!
//! A zone file is TOML:
//!
//! ```toml
//! name = "forest"
//!
//! [[layers]]
//! name = "ambient"
//! seed = 1001
//! bpm = 72
//! instruments = ["Flute", "Pad"]
//!
//! [[layers]]
//! name = "tension"
//! seed = 2002
//! ```
//!
//! The first three layers drive Ambient, Tension and Combat in that order.

use std::path::{Path, PathBuf};

use moodproto::MidiParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("failed to read zone file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse zone file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("zone {0} has no layers")]
    NoLayers(String),
}

/// Authored generation template for one layer of a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,

    #[serde(default = "LayerConfig::default_seed")]
    pub seed: i32,
    #[serde(default = "LayerConfig::default_gen_events")]
    pub gen_events: u32,
    #[serde(default = "LayerConfig::default_bpm")]
    pub bpm: u32,
    #[serde(default = "LayerConfig::default_time_sig")]
    pub time_sig: String,
    #[serde(default = "LayerConfig::default_key_sig")]
    pub key_sig: String,
    #[serde(default = "LayerConfig::default_instruments")]
    pub instruments: Vec<String>,
    #[serde(default = "LayerConfig::default_drum_kit")]
    pub drum_kit: String,
    #[serde(default = "LayerConfig::default_true")]
    pub allow_cc: bool,

    #[serde(default = "LayerConfig::default_temp")]
    pub temp: f32,
    #[serde(default = "LayerConfig::default_top_p")]
    pub top_p: f32,
    #[serde(default = "LayerConfig::default_top_k")]
    pub top_k: u32,

    #[serde(default)]
    pub disable_patch_change: bool,
    #[serde(default)]
    pub disable_control_change: bool,
    #[serde(default)]
    pub disable_channels: Vec<u8>,
    #[serde(default)]
    pub optimise_midi: bool,
    #[serde(default)]
    pub cc_eps: u32,
    #[serde(default)]
    pub tempo_eps: u32,
    #[serde(default)]
    pub remap_track_channel: bool,
}

impl LayerConfig {
    fn default_seed() -> i32 {
        1001
    }

    fn default_gen_events() -> u32 {
        256
    }

    fn default_bpm() -> u32 {
        80
    }

    fn default_time_sig() -> String {
        "4/4".to_string()
    }

    fn default_key_sig() -> String {
        "auto".to_string()
    }

    fn default_instruments() -> Vec<String> {
        vec!["Acoustic Grand".to_string()]
    }

    fn default_drum_kit() -> String {
        "None".to_string()
    }

    fn default_true() -> bool {
        true
    }

    fn default_temp() -> f32 {
        0.85
    }

    fn default_top_p() -> f32 {
        0.95
    }

    fn default_top_k() -> u32 {
        50
    }

    /// Template with every field at its default.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: Self::default_seed(),
            gen_events: Self::default_gen_events(),
            bpm: Self::default_bpm(),
            time_sig: Self::default_time_sig(),
            key_sig: Self::default_key_sig(),
            instruments: Self::default_instruments(),
            drum_kit: Self::default_drum_kit(),
            allow_cc: true,
            temp: Self::default_temp(),
            top_p: Self::default_top_p(),
            top_k: Self::default_top_k(),
            disable_patch_change: false,
            disable_control_change: false,
            disable_channels: Vec::new(),
            optimise_midi: false,
            cc_eps: 0,
            tempo_eps: 0,
            remap_track_channel: false,
        }
    }

    pub fn with_seed(mut self, seed: i32) -> Self {
        self.seed = seed;
        self
    }

    /// Request parameters for this template. `max_len` follows `gen_events`.
    pub fn to_params(&self) -> MidiParams {
        MidiParams {
            seed: self.seed,
            gen_events: self.gen_events,
            max_len: self.gen_events,
            bpm: self.bpm,
            time_sig: self.time_sig.clone(),
            key_sig: self.key_sig.clone(),
            instruments: self.instruments.clone(),
            drum_kit: self.drum_kit.clone(),
            allow_cc: self.allow_cc,
            temp: self.temp,
            top_p: self.top_p,
            top_k: self.top_k,
            disable_patch_change: self.disable_patch_change,
            disable_control_change: self.disable_control_change,
            disable_channels: self.disable_channels.clone(),
            optimise_midi: self.optimise_midi,
            cc_eps: self.cc_eps,
            tempo_eps: self.tempo_eps,
            remap_track_channel: self.remap_track_channel,
            intensity: None,
            music_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
}

impl ZoneConfig {
    pub fn new(name: impl Into<String>, layers: Vec<LayerConfig>) -> Self {
        Self {
            name: name.into(),
            layers,
        }
    }

    /// Case-insensitive lookup, falling back to the first layer.
    pub fn layer(&self, name: &str) -> Option<&LayerConfig> {
        self.layers
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(name))
            .or_else(|| self.layers.first())
    }

    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ZoneError> {
        let zone: ZoneConfig = toml::from_str(contents).map_err(|e| ZoneError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if zone.layers.is_empty() {
            return Err(ZoneError::NoLayers(zone.name));
        }
        Ok(zone)
    }

    pub fn load(path: &Path) -> Result<Self, ZoneError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ZoneError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&contents, path)
    }
}

/// Load every `*.toml` zone in `dir`, sorted by zone name.
///
/// Files that fail to parse are logged and skipped.
pub fn load_zone_dir(dir: &Path) -> Result<Vec<ZoneConfig>, ZoneError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ZoneError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut zones = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        match ZoneConfig::load(&path) {
            Ok(zone) => {
                debug!(zone = %zone.name, layers = zone.layers.len(), "loaded zone");
                zones.push(zone);
            }
            Err(e) => warn!("skipping zone file: {}", e),
        }
    }

    zones.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(zones)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FOREST: &str = r#"
name = "forest"

[[layers]]
name = "ambient"
seed = 1001
bpm = 72
instruments = ["Flute", "Pad"]

[[layers]]
name = "Tension"
seed = 2002

[[layers]]
name = "combat"
seed = 3003
drum_kit = "Rock"
temp = 1.0
"#;

    #[test]
    fn test_parse_zone_with_defaults() {
        let zone = ZoneConfig::from_toml_str(FOREST, Path::new("forest.toml")).unwrap();
        assert_eq!(zone.name, "forest");
        assert_eq!(zone.layers.len(), 3);

        let ambient = &zone.layers[0];
        assert_eq!(ambient.bpm, 72);
        assert_eq!(ambient.instruments, vec!["Flute", "Pad"]);
        assert_eq!(ambient.gen_events, 256);
        assert_eq!(ambient.key_sig, "auto");

        let tension = &zone.layers[1];
        assert_eq!(tension.seed, 2002);
        assert_eq!(tension.instruments, vec!["Acoustic Grand"]);
        assert!(tension.allow_cc);
    }

    #[test]
    fn test_layer_lookup_is_case_insensitive_with_fallback() {
        let zone = ZoneConfig::from_toml_str(FOREST, Path::new("forest.toml")).unwrap();
        assert_eq!(zone.layer("tension").unwrap().seed, 2002);
        assert_eq!(zone.layer("COMBAT").unwrap().seed, 3003);
        assert_eq!(zone.layer("boss").unwrap().seed, 1001);
    }

    #[test]
    fn test_to_params_copies_template() {
        let layer = LayerConfig {
            gen_events: 300,
            ..LayerConfig::named("ambient")
        };
        let params = layer.to_params();
        assert_eq!(params.max_len, 300);
        assert_eq!(params.gen_events, 300);
        assert_eq!(params.seed, 1001);
        assert_eq!(params.temp, 0.85);
        assert_eq!(params.intensity, None);
    }

    #[test]
    fn test_zone_without_layers_is_rejected() {
        let err = ZoneConfig::from_toml_str("name = \"void\"", Path::new("void.toml")).unwrap_err();
        assert!(matches!(err, ZoneError::NoLayers(ref n) if n == "void"));
    }

    #[test]
    fn test_load_zone_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("forest.toml"), FOREST).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "name = ").unwrap();
        std::fs::write(dir.path().join("cave.toml"), "name = \"cave\"\n[[layers]]\nname = \"ambient\"\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a zone").unwrap();

        let zones = load_zone_dir(dir.path()).unwrap();
        let names: Vec<_> = zones.iter().map(|z| z.name.as_str()).collect();
        assert_eq!(names, vec!["cave", "forest"]);
    }
}
