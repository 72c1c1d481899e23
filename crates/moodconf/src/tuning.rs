//! Tuning coefficients - seed the runtime services, then the services own them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TuningConfig {
    #[serde(default)]
    pub tracker: TrackerTuning,
    #[serde(default)]
    pub mix: MixTuning,
    #[serde(default)]
    pub mapper: MapperTuning,
}

/// Danger tracking radii, rates and smoothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerTuning {
    /// Enemies beyond this distance contribute nothing.
    #[serde(default = "TrackerTuning::default_detection_radius")]
    pub detection_radius: f32,

    /// Enemies inside this distance contribute fully.
    #[serde(default = "TrackerTuning::default_critical_radius")]
    pub critical_radius: f32,

    #[serde(default = "TrackerTuning::default_scan_interval_secs")]
    pub scan_interval_secs: f32,

    /// Applied once per tick, not scaled by dt.
    #[serde(default = "TrackerTuning::default_smooth_factor")]
    pub smooth_factor: f32,

    #[serde(default = "TrackerTuning::default_combat_bonus")]
    pub combat_bonus: f32,

    /// Auto-sync from the stats source pauses this long after a manual `set_health`.
    #[serde(default = "TrackerTuning::default_health_grace_secs")]
    pub health_grace_secs: f32,
}

impl TrackerTuning {
    fn default_detection_radius() -> f32 {
        20.0
    }

    fn default_critical_radius() -> f32 {
        5.0
    }

    fn default_scan_interval_secs() -> f32 {
        0.25
    }

    fn default_smooth_factor() -> f32 {
        0.1
    }

    fn default_combat_bonus() -> f32 {
        0.3
    }

    fn default_health_grace_secs() -> f32 {
        0.25
    }
}

impl Default for TrackerTuning {
    fn default() -> Self {
        Self {
            detection_radius: Self::default_detection_radius(),
            critical_radius: Self::default_critical_radius(),
            scan_interval_secs: Self::default_scan_interval_secs(),
            smooth_factor: Self::default_smooth_factor(),
            combat_bonus: Self::default_combat_bonus(),
            health_grace_secs: Self::default_health_grace_secs(),
        }
    }
}

/// Layer mix thresholds and zone transition timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MixTuning {
    #[serde(default = "MixTuning::default_tension_threshold")]
    pub tension_threshold: f32,

    #[serde(default = "MixTuning::default_combat_threshold")]
    pub combat_threshold: f32,

    /// Wait between fading out the old zone and starting the new one.
    #[serde(default = "MixTuning::default_zone_fade_secs")]
    pub zone_fade_secs: f32,

    /// Adapt bpm/events/seed of zone templates to the live danger snapshot.
    #[serde(default = "MixTuning::default_dynamic_mapping")]
    pub dynamic_mapping: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_zone: Option<String>,
}

impl MixTuning {
    fn default_tension_threshold() -> f32 {
        0.3
    }

    fn default_combat_threshold() -> f32 {
        0.7
    }

    fn default_zone_fade_secs() -> f32 {
        2.0
    }

    fn default_dynamic_mapping() -> bool {
        true
    }
}

impl Default for MixTuning {
    fn default() -> Self {
        Self {
            tension_threshold: Self::default_tension_threshold(),
            combat_threshold: Self::default_combat_threshold(),
            zone_fade_secs: Self::default_zone_fade_secs(),
            dynamic_mapping: Self::default_dynamic_mapping(),
            initial_zone: None,
        }
    }
}

/// Inclusive BPM span interpolated by danger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BpmRange {
    pub min: u32,
    pub max: u32,
}

impl BpmRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

/// Coefficients for mapping gameplay state to generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapperTuning {
    #[serde(default = "MapperTuning::default_ambient_bpm")]
    pub ambient_bpm: BpmRange,

    #[serde(default = "MapperTuning::default_tension_bpm")]
    pub tension_bpm: BpmRange,

    #[serde(default = "MapperTuning::default_combat_bpm")]
    pub combat_bpm: BpmRange,

    /// Health at or below this slows the tempo down.
    #[serde(default = "MapperTuning::default_low_health_threshold")]
    pub low_health_threshold: f32,

    /// Maximum slowdown fraction, reached at zero health.
    #[serde(default = "MapperTuning::default_low_health_slowdown")]
    pub low_health_slowdown: f32,

    #[serde(default = "MapperTuning::default_base_events")]
    pub base_events: u32,

    #[serde(default = "MapperTuning::default_danger_event_bonus")]
    pub danger_event_bonus: u32,

    #[serde(default = "MapperTuning::default_per_enemy_events")]
    pub per_enemy_events: u32,

    #[serde(default = "MapperTuning::default_max_events")]
    pub max_events: u32,
}

impl MapperTuning {
    fn default_ambient_bpm() -> BpmRange {
        BpmRange::new(60, 80)
    }

    fn default_tension_bpm() -> BpmRange {
        BpmRange::new(85, 110)
    }

    fn default_combat_bpm() -> BpmRange {
        BpmRange::new(115, 140)
    }

    fn default_low_health_threshold() -> f32 {
        0.2
    }

    fn default_low_health_slowdown() -> f32 {
        0.15
    }

    fn default_base_events() -> u32 {
        256
    }

    fn default_danger_event_bonus() -> u32 {
        128
    }

    fn default_per_enemy_events() -> u32 {
        32
    }

    fn default_max_events() -> u32 {
        512
    }
}

impl Default for MapperTuning {
    fn default() -> Self {
        Self {
            ambient_bpm: Self::default_ambient_bpm(),
            tension_bpm: Self::default_tension_bpm(),
            combat_bpm: Self::default_combat_bpm(),
            low_health_threshold: Self::default_low_health_threshold(),
            low_health_slowdown: Self::default_low_health_slowdown(),
            base_events: Self::default_base_events(),
            danger_event_bonus: Self::default_danger_event_bonus(),
            per_enemy_events: Self::default_per_enemy_events(),
            max_events: Self::default_max_events(),
        }
    }
}
