//! Development-time overrides for generation requests.

use midicache::stable_hash;
use moodproto::MidiParams;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingOverride {
    pub temp: f32,
    pub top_p: f32,
    pub top_k: u32,
}

/// Forces chosen request fields regardless of zone templates or the mapper.
///
/// Nothing applies unless `enabled` is set. While enabled, every cache key
/// gets a suffix built from the final request so tweaked requests never
/// collide with normal ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDebugOverrides {
    pub enabled: bool,
    pub bypass_cache: bool,
    pub seed: Option<i32>,
    pub bpm: Option<u32>,
    pub gen_events: Option<u32>,
    pub time_sig: Option<String>,
    pub key_sig: Option<String>,
    pub sampling: Option<SamplingOverride>,
    /// Up to three names; blanks are dropped
    pub instruments: Option<Vec<String>>,
    pub drum_kit: Option<String>,
}

impl GenerationDebugOverrides {
    pub fn bypasses_cache(&self) -> bool {
        self.enabled && self.bypass_cache
    }

    pub fn apply(&self, params: &mut MidiParams) {
        if !self.enabled {
            return;
        }

        if let Some(seed) = self.seed {
            params.seed = seed;
        }
        if let Some(bpm) = self.bpm {
            params.bpm = bpm;
        }
        if let Some(events) = self.gen_events {
            params.gen_events = events;
            params.max_len = events;
        }
        if let Some(time_sig) = &self.time_sig {
            params.time_sig = time_sig.clone();
        }
        if let Some(key_sig) = &self.key_sig {
            params.key_sig = key_sig.clone();
        }
        if let Some(sampling) = self.sampling {
            params.temp = sampling.temp;
            params.top_p = sampling.top_p;
            params.top_k = sampling.top_k;
        }
        if let Some(kit) = &self.drum_kit {
            params.drum_kit = kit.clone();
        }
        if let Some(instruments) = &self.instruments {
            params.instruments = instruments
                .iter()
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .take(3)
                .map(str::to_string)
                .collect();
        }
    }

    /// Cache key suffix for `params` after [`apply`](Self::apply), or
    /// `None` while disabled.
    pub fn key_suffix(&self, params: &MidiParams) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let instruments_hash = stable_hash(&params.instruments.join("|"));
        Some(format!(
            "_dbg_b{}_e{}_ts{}_ks{}_t{:.2}_p{:.2}_k{}_dk{}_ih{}",
            params.bpm,
            params.gen_events,
            params.time_sig,
            params.key_sig,
            params.temp,
            params.top_p,
            params.top_k,
            params.drum_kit,
            instruments_hash
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_disabled_is_inert() {
        let overrides = GenerationDebugOverrides {
            seed: Some(7),
            bypass_cache: true,
            ..Default::default()
        };
        let mut params = MidiParams::default();
        overrides.apply(&mut params);
        assert_eq!(params, MidiParams::default());
        assert_eq!(overrides.key_suffix(&params), None);
        assert!(!overrides.bypasses_cache());
    }

    #[test]
    fn test_apply_overrides() {
        let overrides = GenerationDebugOverrides {
            enabled: true,
            seed: Some(42),
            gen_events: Some(300),
            sampling: Some(SamplingOverride {
                temp: 1.1,
                top_p: 0.9,
                top_k: 20,
            }),
            instruments: Some(vec![" Harp ".to_string(), "".to_string(), "Cello".to_string()]),
            ..Default::default()
        };
        let mut params = MidiParams::default();
        overrides.apply(&mut params);

        assert_eq!(params.seed, 42);
        assert_eq!(params.gen_events, 300);
        assert_eq!(params.max_len, 300);
        assert_eq!(params.top_k, 20);
        assert_eq!(params.instruments, vec!["Harp", "Cello"]);
        assert_eq!(params.bpm, MidiParams::default().bpm);
    }

    #[test]
    fn test_key_suffix_reflects_final_params() {
        let overrides = GenerationDebugOverrides {
            enabled: true,
            bpm: Some(100),
            ..Default::default()
        };
        let mut params = MidiParams::default();
        overrides.apply(&mut params);

        let suffix = overrides.key_suffix(&params).unwrap();
        let expected_hash = stable_hash("Acoustic Grand");
        assert_eq!(
            suffix,
            format!("_dbg_b100_e256_ts4/4_ksauto_t0.85_p0.95_k50_dkNone_ih{}", expected_hash)
        );
    }
}
