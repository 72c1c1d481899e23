//! Gameplay state to generation parameters.
//!
//! Everything here is a pure function of the inputs and the tuning table,
//! apart from the mid-band instrument pick which takes an RNG.

use midicache::stable_hash;
use moodconf::{BpmRange, MapperTuning};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::tracker::{lerp, DangerSnapshot};
use crate::zone::LayerConfig;

const MIN_BPM: u32 = 40;
const MAX_BPM: u32 = 200;
const MIN_EVENTS: u32 = 128;
const EVENT_BONUS_FLOOR: f32 = 0.3;

const LOW_DANGER: f32 = 0.3;
const MID_DANGER: f32 = 0.7;

const LOW_INSTRUMENTS: [&str; 3] = ["Acoustic Grand", "Flute", "Pad"];
const MID_INSTRUMENTS: [&str; 3] = ["Strings", "Piano", "Synth Lead"];
const HIGH_INSTRUMENTS: [&str; 3] = ["Distortion Guitar", "Strings", "Synth Bass"];
const FALLBACK_INSTRUMENT: &str = "Acoustic Grand";

#[derive(Debug, Clone, Default)]
pub struct ParameterMapper {
    tuning: MapperTuning,
}

impl ParameterMapper {
    pub fn new(tuning: MapperTuning) -> Self {
        Self { tuning }
    }

    pub fn tuning(&self) -> &MapperTuning {
        &self.tuning
    }

    fn bpm_range(&self, layer: &str) -> BpmRange {
        if layer.eq_ignore_ascii_case("tension") {
            self.tuning.tension_bpm
        } else if layer.eq_ignore_ascii_case("combat") {
            self.tuning.combat_bpm
        } else {
            self.tuning.ambient_bpm
        }
    }

    /// Tempo for `layer`, slowed when health is critical, in steps of 5.
    pub fn calculate_bpm(&self, layer: &str, danger: f32, health: f32) -> u32 {
        let range = self.bpm_range(layer);
        // Whole beats at each step, ties to even
        let mut bpm = lerp(range.min as f32, range.max as f32, danger).round_ties_even();

        let threshold = self.tuning.low_health_threshold;
        if threshold > 0.0 && health <= threshold {
            let severity = 1.0 - (health.max(0.0) / threshold);
            bpm = (bpm * (1.0 - self.tuning.low_health_slowdown * severity)).round_ties_even();
        }

        let quantized = (bpm / 5.0).round_ties_even() * 5.0;
        (quantized.max(0.0) as u32).clamp(MIN_BPM, MAX_BPM)
    }

    pub fn calculate_gen_events(&self, danger: f32, nearby_enemies: usize) -> u32 {
        let mut events = self.tuning.base_events as f32;

        if danger > EVENT_BONUS_FLOOR {
            let t = ((danger - EVENT_BONUS_FLOOR) / (1.0 - EVENT_BONUS_FLOOR)).clamp(0.0, 1.0);
            events += (self.tuning.danger_event_bonus as f32 * t).round();
        }
        events += (nearby_enemies as f32) * self.tuning.per_enemy_events as f32;

        let max = self.tuning.max_events.max(MIN_EVENTS);
        (events as u32).clamp(MIN_EVENTS, max)
    }

    pub fn select_instruments(&self, danger: f32) -> Vec<String> {
        self.select_instruments_with(danger, &mut rand::thread_rng())
    }

    /// Palette for the danger band. The mid band mixes in one random
    /// low-band instrument.
    pub fn select_instruments_with<R: Rng + ?Sized>(&self, danger: f32, rng: &mut R) -> Vec<String> {
        let mut picked: Vec<String> = if danger < LOW_DANGER {
            LOW_INSTRUMENTS.iter().take(2).map(|s| s.to_string()).collect()
        } else if danger < MID_DANGER {
            let mut mid: Vec<String> = MID_INSTRUMENTS.iter().take(2).map(|s| s.to_string()).collect();
            let candidates: Vec<&str> = LOW_INSTRUMENTS
                .iter()
                .copied()
                .filter(|low| !mid.iter().any(|m| m == low))
                .collect();
            if let Some(extra) = candidates.choose(rng) {
                mid.push(extra.to_string());
            }
            mid
        } else {
            HIGH_INSTRUMENTS.iter().map(|s| s.to_string()).collect()
        };

        if picked.is_empty() {
            picked.push(FALLBACK_INSTRUMENT.to_string());
        }
        picked
    }

    pub fn select_drum_kit(&self, danger: f32) -> &'static str {
        match danger {
            d if d < 0.5 => "None",
            d if d < 0.7 => "Standard",
            d if d < 0.9 => "Rock",
            _ => "Electronic",
        }
    }

    /// Deterministic seed from quantized state, a time bucket and an
    /// optional salt. Same inputs give the same seed in every process.
    pub fn generate_seed(
        &self,
        danger: f32,
        health: f32,
        nearby_enemies: usize,
        salt: Option<&str>,
        game_time_secs: f32,
    ) -> i32 {
        let danger_q = (danger * 1000.0).round() as i32;
        let health_q = (health * 1000.0).round() as i32;
        let enemies = i32::try_from(nearby_enemies).unwrap_or(i32::MAX);
        let time_bucket = (game_time_secs.max(0.0).round() as i64 % 10_000) as i32;
        let salt_hash = salt.map(stable_hash).unwrap_or(0);

        let seed = danger_q
            .wrapping_mul(7919)
            .wrapping_add(health_q.wrapping_mul(6971))
            .wrapping_add(enemies.wrapping_mul(100).wrapping_mul(5381))
            .wrapping_add(time_bucket)
            .wrapping_add(salt_hash.wrapping_mul(1543));

        seed.checked_abs().unwrap_or(i32::MAX)
    }

    /// `0.2*(1-health) + 0.4*combat + 0.4*danger`, clamped to [0, 1].
    pub fn calculate_intensity(&self, health: f32, combat_active: bool, danger: f32) -> f32 {
        let combat = if combat_active { 1.0 } else { 0.0 };
        (0.2 * (1.0 - health) + 0.4 * combat + 0.4 * danger).clamp(0.0, 1.0)
    }

    /// A fresh template for `layer` driven entirely by the current state.
    pub fn generate_dynamic_parameters(&self, layer: &str, state: &DangerSnapshot, game_time_secs: f32) -> LayerConfig {
        let mut config = LayerConfig::named(layer);
        self.update_layer_config(&mut config, state, game_time_secs);
        config
    }

    /// Overwrite every dynamic field of `config`, instruments and drums included.
    pub fn update_layer_config(&self, config: &mut LayerConfig, state: &DangerSnapshot, game_time_secs: f32) {
        config.bpm = self.calculate_bpm(&config.name, state.danger, state.health);
        config.gen_events = self.calculate_gen_events(state.danger, state.nearby_enemies);
        config.instruments = self.select_instruments(state.danger);
        config.drum_kit = self.select_drum_kit(state.danger).to_string();
        config.seed = self.generate_seed(
            state.danger,
            state.health,
            state.nearby_enemies,
            Some(&config.name),
            game_time_secs,
        );
    }

    /// Tempo, event count and seed only. The authored instruments, drums,
    /// signatures and sampling settings are left alone.
    pub fn apply_dynamic_modifiers_preserve_identity(
        &self,
        config: &mut LayerConfig,
        zone: &str,
        layer: &str,
        state: &DangerSnapshot,
        game_time_secs: f32,
    ) {
        config.bpm = self.calculate_bpm(layer, state.danger, state.health);
        config.gen_events = self.calculate_gen_events(state.danger, state.nearby_enemies);

        let salt = format!("{}:{}", zone, layer);
        config.seed = self.generate_seed(
            state.danger,
            state.health,
            state.nearby_enemies,
            Some(&salt),
            game_time_secs,
        );
    }
}
