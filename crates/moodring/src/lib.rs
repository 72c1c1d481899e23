//! Adaptive game music.
//!
//! Gameplay feeds a [`GameStateTracker`], which publishes a smoothed danger
//! level. The [`AdaptiveMusicSystem`] turns that into volumes for three
//! looping layers and, when a zone needs material it has not heard before,
//! asks a MIDI generation server for it:
//!
//! ```text
//! tracker ──watch──▶ system ──▶ ParameterMapper ──▶ MidiCache ──miss──▶ MusicClient
//!                       │                               │                   │
//!                       ▼                               ▼                   ▼
//!                  LayerMixer ◀──────────────── MidiRenderer ◀──────── MIDI bytes
//! ```
//!
//! Zones are authored as TOML files (see [`zone`]); transports live in
//! `moodproto` and the persistent cache in `midicache`.

pub mod debug;
pub mod mapper;
pub mod mixer;
pub mod notify;
pub mod renderer;
pub mod system;
pub mod tracker;
pub mod zone;

pub use debug::{GenerationDebugOverrides, SamplingOverride};
pub use mapper::ParameterMapper;
pub use mixer::{Layer, LayerMixer, LayerVoice};
pub use notify::{MusicNotice, Notifier};
pub use renderer::{MidiRenderer, PcmClip, RenderError};
pub use system::{
    layer_mix, AdaptiveMusicSystem, LayerLoad, LoadError, LoadOutcome, RequestRecord, SystemParts,
    SystemStatus, ZoneChange, ZoneLoadReport,
};
pub use tracker::{DangerSnapshot, GameStateTracker, PlayerStatsSource, Threat, ThreatHandle, ThreatScanner, Vec3};
pub use zone::{load_zone_dir, LayerConfig, ZoneConfig, ZoneError};
