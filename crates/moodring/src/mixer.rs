//! Layer mixer for the adaptive soundtrack.
//!
//! Three fixed layers, each bound to one [`LayerVoice`]. The game tick sets
//! targets and calls [`LayerMixer::update`]; volumes glide toward their
//! targets and voices pause once they have faded to silence.
//!
//! Voice gain lives in an `Arc<AtomicF32>` so an audio callback can read it
//! without taking the mixer lock.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use portable_atomic::AtomicF32;
use tracing::{debug, warn};

use crate::renderer::PcmClip;

/// Divisor on the proportional glide step
pub const TRANSITION_SPEED: f32 = 2.0;
/// Floor on the glide rate, in volume per second
pub const MIN_GLIDE_RATE: f32 = 2.0;
/// Below this a layer counts as silent
pub const ACTIVATION_THRESHOLD: f32 = 0.01;
pub const SILENCE_DB: f32 = -80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    Ambient,
    Tension,
    Combat,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Ambient, Layer::Tension, Layer::Combat];

    pub fn name(self) -> &'static str {
        match self {
            Layer::Ambient => "Ambient",
            Layer::Tension => "Tension",
            Layer::Combat => "Combat",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.name().eq_ignore_ascii_case(name))
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Name of the exposed gain parameter, e.g. `AmbientVolume`.
    pub fn parameter_name(self) -> String {
        format!("{}Volume", self.name())
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Linear volume to decibels with a floor for near-silence.
pub fn linear_to_db(volume: f32) -> f32 {
    let db = if volume > 0.0001 {
        20.0 * volume.log10()
    } else {
        SILENCE_DB
    };
    db.clamp(SILENCE_DB, 0.0)
}

pub fn db_to_linear(db: f32) -> f32 {
    if db <= SILENCE_DB {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}

/// Software playback voice for one layer.
#[derive(Debug)]
pub struct LayerVoice {
    clip: Option<Arc<PcmClip>>,
    /// Position in frames
    position: usize,
    playing: bool,
    looping: bool,
    /// Linear gain applied when mixing
    gain: Arc<AtomicF32>,
}

impl Default for LayerVoice {
    fn default() -> Self {
        Self {
            clip: None,
            position: 0,
            playing: false,
            looping: true,
            gain: Arc::new(AtomicF32::new(0.0)),
        }
    }
}

impl LayerVoice {
    pub fn clip(&self) -> Option<&Arc<PcmClip>> {
        self.clip.as_ref()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn gain(&self) -> f32 {
        self.gain.load(Ordering::Relaxed)
    }

    /// Shared handle for an audio callback.
    pub fn gain_handle(&self) -> Arc<AtomicF32> {
        Arc::clone(&self.gain)
    }

    /// Start from the top. No-op without a clip.
    pub fn play(&mut self) {
        if self.clip.is_some() {
            self.position = 0;
            self.playing = true;
        }
    }

    /// Resume where it paused. No-op without a clip.
    pub fn resume(&mut self) {
        if self.clip.is_some() {
            self.playing = true;
        }
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.position = 0;
    }

    fn set_gain_db(&self, db: f32) {
        self.gain.store(db_to_linear(db), Ordering::Relaxed);
    }

    /// Add this voice into interleaved stereo `out`.
    fn mix_into(&mut self, out: &mut [f32]) {
        if !self.playing {
            return;
        }
        let Some(clip) = self.clip.clone() else {
            self.playing = false;
            return;
        };
        let frames = clip.frames();
        if frames == 0 {
            self.playing = false;
            return;
        }

        let gain = self.gain();
        let channels = clip.channels.max(1) as usize;
        for frame in out.chunks_exact_mut(2) {
            if self.position >= frames {
                if self.looping {
                    self.position = 0;
                } else {
                    self.stop();
                    return;
                }
            }
            let base = self.position * channels;
            let left = clip.samples[base];
            let right = if channels > 1 { clip.samples[base + 1] } else { left };
            frame[0] += left * gain;
            frame[1] += right * gain;
            self.position += 1;
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LayerLevel {
    current: f32,
    target: f32,
    active: bool,
}

/// Owned by the game tick; nothing here is internally synchronized.
#[derive(Debug, Default)]
pub struct LayerMixer {
    voices: [LayerVoice; 3],
    levels: [LayerLevel; 3],
}

impl LayerMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a target and wake the voice if it is going audible.
    pub fn set_layer_volume(&mut self, layer: Layer, volume: f32) {
        if !volume.is_finite() {
            warn!(layer = %layer, volume, "ignoring non-finite volume");
            return;
        }
        let idx = layer.index();
        let target = volume.clamp(0.0, 1.0);
        self.levels[idx].target = target;

        if target > ACTIVATION_THRESHOLD && !self.levels[idx].active {
            self.levels[idx].active = true;
            let voice = &mut self.voices[idx];
            if voice.clip.is_some() && !voice.playing {
                voice.resume();
            }
            debug!(layer = %layer, target, "layer activated");
        }
    }

    /// Advance every layer's glide by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        let dt = dt.max(0.0);
        for layer in Layer::ALL {
            let idx = layer.index();
            let level = &mut self.levels[idx];

            if (level.current - level.target).abs() > 1e-6 {
                let proportional = ((level.target - level.current) * dt / TRANSITION_SPEED).abs();
                let step = proportional + dt * MIN_GLIDE_RATE;
                level.current = move_towards(level.current, level.target, step);
                self.voices[idx].set_gain_db(linear_to_db(level.current));
            }

            if level.current <= ACTIVATION_THRESHOLD && level.active && level.target <= ACTIVATION_THRESHOLD {
                level.active = false;
                self.voices[idx].pause();
                debug!(layer = %layer, "layer faded out");
            }
        }
    }

    /// Zero every target. `immediate` also silences and pauses now.
    pub fn stop_all(&mut self, immediate: bool) {
        for layer in Layer::ALL {
            let idx = layer.index();
            self.levels[idx].target = 0.0;
            if immediate {
                self.levels[idx].current = 0.0;
                self.levels[idx].active = false;
                self.voices[idx].pause();
                self.voices[idx].set_gain_db(SILENCE_DB);
            }
        }
    }

    /// Fade `from` out and `to` in.
    ///
    /// The glide rate is fixed by [`TRANSITION_SPEED`] and
    /// [`MIN_GLIDE_RATE`]; `duration_secs` is only logged.
    pub fn crossfade(&mut self, from: Layer, to: Layer, duration_secs: f32) {
        debug!(%from, %to, duration_secs, "crossfade");
        self.set_layer_volume(from, 0.0);
        self.set_layer_volume(to, 1.0);
    }

    pub fn layer_volume(&self, layer: Layer) -> f32 {
        self.levels[layer.index()].current
    }

    pub fn target_volume(&self, layer: Layer) -> f32 {
        self.levels[layer.index()].target
    }

    pub fn is_layer_active(&self, layer: Layer) -> bool {
        self.levels[layer.index()].active
    }

    pub fn volumes(&self) -> [(Layer, f32); 3] {
        Layer::ALL.map(|l| (l, self.layer_volume(l)))
    }

    /// Line every active voice up with `reference`, wrapped to each clip.
    pub fn synchronize_layers(&mut self, reference: Layer) {
        let ref_idx = reference.index();
        if !self.levels[ref_idx].active {
            return;
        }
        let position = self.voices[ref_idx].position;

        for layer in Layer::ALL {
            let idx = layer.index();
            if idx == ref_idx || !self.levels[idx].active {
                continue;
            }
            let voice = &mut self.voices[idx];
            if let Some(frames) = voice.clip.as_ref().map(|c| c.frames()).filter(|f| *f > 0) {
                voice.position = position % frames;
            }
        }
    }

    /// Swap the clip on a layer. Playback restarts from the top if the
    /// layer was playing.
    pub fn set_clip(&mut self, layer: Layer, clip: Option<Arc<PcmClip>>, looping: bool) {
        let voice = &mut self.voices[layer.index()];
        let was_playing = voice.playing;
        voice.clip = clip;
        voice.looping = looping;
        voice.stop();
        if was_playing {
            voice.play();
        }
    }

    pub fn voice(&self, layer: Layer) -> &LayerVoice {
        &self.voices[layer.index()]
    }

    /// Play `layer` from the top. The volume keeps gliding as before.
    pub fn start_layer(&mut self, layer: Layer) {
        let idx = layer.index();
        self.levels[idx].active = true;
        self.voices[idx].play();
    }

    /// Jump straight to `volume` with no glide.
    pub fn set_layer_volume_immediate(&mut self, layer: Layer, volume: f32) {
        if !volume.is_finite() {
            warn!(layer = %layer, volume, "ignoring non-finite volume");
            return;
        }
        let idx = layer.index();
        let volume = volume.clamp(0.0, 1.0);
        self.levels[idx].current = volume;
        self.levels[idx].target = volume;
        self.voices[idx].set_gain_db(linear_to_db(volume));
    }

    /// Sum all playing voices into interleaved stereo `out`.
    pub fn mix_into(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        for voice in &mut self.voices {
            voice.mix_into(out);
        }
    }
}

fn move_towards(current: f32, target: f32, max_delta: f32) -> f32 {
    if (target - current).abs() <= max_delta {
        target
    } else {
        current + (target - current).signum() * max_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(frames: usize, value: f32) -> Arc<PcmClip> {
        Arc::new(PcmClip {
            name: "test".to_string(),
            sample_rate: 1_000,
            channels: 2,
            samples: vec![value; frames * 2],
        })
    }

    fn settle(mixer: &mut LayerMixer, secs: f32) {
        let ticks = (secs * 60.0) as usize;
        for _ in 0..ticks {
            mixer.update(1.0 / 60.0);
        }
    }

    #[test]
    fn test_layer_names() {
        assert_eq!(Layer::from_name("tension"), Some(Layer::Tension));
        assert_eq!(Layer::from_name("COMBAT"), Some(Layer::Combat));
        assert_eq!(Layer::from_name("boss"), None);
        assert_eq!(Layer::Ambient.parameter_name(), "AmbientVolume");
    }

    #[test]
    fn test_db_mapping() {
        assert_eq!(linear_to_db(1.0), 0.0);
        assert_eq!(linear_to_db(0.0), SILENCE_DB);
        assert_eq!(linear_to_db(0.00005), SILENCE_DB);
        assert!((linear_to_db(0.5) + 6.0206).abs() < 1e-3);
        assert_eq!(linear_to_db(2.0), 0.0);
        assert_eq!(db_to_linear(SILENCE_DB), 0.0);
    }

    #[test]
    fn test_volume_glides_to_target() {
        let mut mixer = LayerMixer::new();
        mixer.set_clip(Layer::Ambient, Some(clip(100, 0.5)), true);
        mixer.set_layer_volume(Layer::Ambient, 1.0);
        assert!(mixer.is_layer_active(Layer::Ambient));
        assert!(mixer.voice(Layer::Ambient).is_playing());

        mixer.update(0.1);
        let first = mixer.layer_volume(Layer::Ambient);
        assert!(first > 0.0 && first < 1.0);

        settle(&mut mixer, 1.0);
        assert_eq!(mixer.layer_volume(Layer::Ambient), 1.0);
        assert!((mixer.voice(Layer::Ambient).gain() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_transition_time_is_bounded() {
        // The minimum step alone covers a full swing in 0.5s
        let mut mixer = LayerMixer::new();
        mixer.set_layer_volume(Layer::Combat, 1.0);
        settle(&mut mixer, 0.55);
        assert_eq!(mixer.layer_volume(Layer::Combat), 1.0);
    }

    #[test]
    fn test_zero_target_deactivates_after_fade() {
        let mut mixer = LayerMixer::new();
        mixer.set_clip(Layer::Tension, Some(clip(100, 0.5)), true);
        mixer.set_layer_volume_immediate(Layer::Tension, 0.8);
        mixer.start_layer(Layer::Tension);

        mixer.set_layer_volume(Layer::Tension, 0.0);
        assert!(mixer.is_layer_active(Layer::Tension), "must not deactivate before fading");

        settle(&mut mixer, 1.0);
        assert_eq!(mixer.layer_volume(Layer::Tension), 0.0);
        assert!(!mixer.is_layer_active(Layer::Tension));
        assert!(!mixer.voice(Layer::Tension).is_playing());
    }

    #[test]
    fn test_volume_is_clamped() {
        let mut mixer = LayerMixer::new();
        mixer.set_layer_volume(Layer::Combat, 1.2);
        assert_eq!(mixer.target_volume(Layer::Combat), 1.0);
        mixer.set_layer_volume(Layer::Combat, -3.0);
        assert_eq!(mixer.target_volume(Layer::Combat), 0.0);
    }

    #[test]
    fn test_non_finite_volume_is_ignored() {
        let mut mixer = LayerMixer::new();
        mixer.set_layer_volume(Layer::Tension, 0.4);
        mixer.set_layer_volume(Layer::Tension, f32::NAN);
        assert_eq!(mixer.target_volume(Layer::Tension), 0.4);

        mixer.set_layer_volume_immediate(Layer::Combat, f32::NEG_INFINITY);
        settle(&mut mixer, 1.0);
        assert_eq!(mixer.layer_volume(Layer::Tension), 0.4);
        assert_eq!(mixer.layer_volume(Layer::Combat), 0.0);
        assert!(mixer.voice(Layer::Tension).gain().is_finite());
    }

    #[test]
    fn test_stop_all() {
        let mut mixer = LayerMixer::new();
        mixer.set_clip(Layer::Ambient, Some(clip(100, 0.5)), true);
        mixer.set_layer_volume_immediate(Layer::Ambient, 1.0);
        mixer.start_layer(Layer::Ambient);
        mixer.set_layer_volume_immediate(Layer::Tension, 0.5);
        mixer.start_layer(Layer::Tension);

        mixer.stop_all(false);
        assert_eq!(mixer.layer_volume(Layer::Ambient), 1.0);
        assert!(mixer.is_layer_active(Layer::Ambient));

        mixer.stop_all(true);
        for layer in Layer::ALL {
            assert_eq!(mixer.layer_volume(layer), 0.0);
            assert!(!mixer.is_layer_active(layer));
        }
        assert!(!mixer.voice(Layer::Ambient).is_playing());
    }

    #[test]
    fn test_crossfade_sets_targets() {
        let mut mixer = LayerMixer::new();
        mixer.set_layer_volume_immediate(Layer::Ambient, 1.0);
        mixer.start_layer(Layer::Ambient);
        mixer.crossfade(Layer::Ambient, Layer::Combat, 5.0);
        assert_eq!(mixer.target_volume(Layer::Ambient), 0.0);
        assert_eq!(mixer.target_volume(Layer::Combat), 1.0);

        // Fade speed ignores the requested duration
        settle(&mut mixer, 0.6);
        assert_eq!(mixer.layer_volume(Layer::Ambient), 0.0);
        assert_eq!(mixer.layer_volume(Layer::Combat), 1.0);
    }

    #[test]
    fn test_synchronize_layers_wraps_position() {
        let mut mixer = LayerMixer::new();
        mixer.set_clip(Layer::Ambient, Some(clip(100, 0.1)), true);
        mixer.set_clip(Layer::Tension, Some(clip(30, 0.1)), true);
        mixer.set_clip(Layer::Combat, Some(clip(100, 0.1)), true);
        mixer.set_layer_volume_immediate(Layer::Ambient, 1.0);
        mixer.start_layer(Layer::Ambient);
        mixer.set_layer_volume_immediate(Layer::Tension, 1.0);
        mixer.start_layer(Layer::Tension);

        let mut out = vec![0.0; 70 * 2];
        mixer.mix_into(&mut out);
        // Knock tension off the beat
        mixer.set_clip(Layer::Tension, Some(clip(30, 0.1)), true);

        mixer.synchronize_layers(Layer::Ambient);
        assert_eq!(mixer.voice(Layer::Ambient).position(), 70);
        assert_eq!(mixer.voice(Layer::Tension).position(), 70 % 30);
        // Inactive layers are left alone
        assert_eq!(mixer.voice(Layer::Combat).position(), 0);
    }

    #[test]
    fn test_mix_applies_gain_and_loops() {
        let mut mixer = LayerMixer::new();
        mixer.set_clip(Layer::Ambient, Some(clip(4, 0.5)), true);
        mixer.set_layer_volume_immediate(Layer::Ambient, 0.5);
        mixer.start_layer(Layer::Ambient);

        let mut out = vec![0.0; 10 * 2];
        mixer.mix_into(&mut out);
        for sample in &out {
            assert!((sample - 0.25).abs() < 1e-6);
        }
        assert_eq!(mixer.voice(Layer::Ambient).position(), 2);
    }

    #[test]
    fn test_one_shot_stops_at_end() {
        let mut mixer = LayerMixer::new();
        mixer.set_clip(Layer::Ambient, Some(clip(4, 0.5)), false);
        mixer.set_layer_volume_immediate(Layer::Ambient, 1.0);
        mixer.start_layer(Layer::Ambient);

        let mut out = vec![0.0; 10 * 2];
        mixer.mix_into(&mut out);
        assert!(!mixer.voice(Layer::Ambient).is_playing());
        assert_eq!(out[7], 0.5);
        assert_eq!(out[8], 0.0);
    }

    #[test]
    fn test_gain_handle_is_shared() {
        let mut mixer = LayerMixer::new();
        let handle = mixer.voice(Layer::Tension).gain_handle();
        mixer.set_layer_volume_immediate(Layer::Tension, 1.0);
        mixer.start_layer(Layer::Tension);
        assert_eq!(handle.load(Ordering::Relaxed), 1.0);
    }
}
