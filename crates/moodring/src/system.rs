//! The adaptive music orchestrator.
//!
//! [`AdaptiveMusicSystem`] ties the pieces together: it reads danger from
//! the tracker's watch channel, resolves zone layers through cache, server
//! and renderer, and drives the [`LayerMixer`] from the game tick.
//!
//! Layer loads run as ordinary futures. The game thread only ever calls the
//! synchronous [`update`](AdaptiveMusicSystem::update); anything that has to
//! outlive a tick (death music) is spawned on the runtime handle the system
//! was built with.
//!
//! Concurrent loads of the same cache key share one in-flight future, so a
//! second caller waits for the first caller's result instead of issuing a
//! duplicate request.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use midicache::{cache_key, CacheStats, MidiCache};
use moodconf::MixTuning;
use moodproto::{MidiParams, MusicClient};
use rand::Rng;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::debug::GenerationDebugOverrides;
use crate::mapper::ParameterMapper;
use crate::mixer::{Layer, LayerMixer};
use crate::notify::Notifier;
use crate::renderer::{MidiRenderer, PcmClip};
use crate::tracker::DangerSnapshot;
use crate::zone::{LayerConfig, ZoneConfig};

/// Label the death request is logged under.
pub const DEATH_REQUEST: &str = "death";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    #[error("server unavailable, cached layers only")]
    Offline,

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("render failed: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Cached,
    Generated,
}

/// Result of resolving one layer.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// Rendered from cached MIDI
    Cached(Arc<PcmClip>),
    /// Generated by the server, then rendered
    Generated(Arc<PcmClip>),
    /// Clip for this key was already in memory
    AlreadyLoaded(Arc<PcmClip>),
    Failed(LoadError),
}

impl LoadOutcome {
    pub fn clip(&self) -> Option<&Arc<PcmClip>> {
        match self {
            LoadOutcome::Cached(clip) | LoadOutcome::Generated(clip) | LoadOutcome::AlreadyLoaded(clip) => Some(clip),
            LoadOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, LoadOutcome::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct LayerLoad {
    pub layer: Layer,
    /// Name from the zone template
    pub name: String,
    pub outcome: LoadOutcome,
}

#[derive(Debug, Clone)]
pub struct ZoneLoadReport {
    pub zone: String,
    pub layers: Vec<LayerLoad>,
}

impl ZoneLoadReport {
    pub fn loaded_count(&self) -> usize {
        self.layers.iter().filter(|l| l.outcome.clip().is_some()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.layers.iter().filter(|l| l.outcome.is_failed()).count()
    }

    pub fn outcome(&self, layer: Layer) -> Option<&LoadOutcome> {
        self.layers.iter().find(|l| l.layer == layer).map(|l| &l.outcome)
    }
}

#[derive(Debug, Clone)]
pub enum ZoneChange {
    /// Already in that zone
    Unchanged,
    Changed(ZoneLoadReport),
}

/// The last request actually sent for a layer.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub zone: Option<String>,
    pub layer: String,
    pub cache_key: Option<String>,
    pub params: MidiParams,
    pub dynamic: bool,
    pub at: DateTime<Utc>,
}

impl fmt::Display for RequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.params;
        write!(
            f,
            "zone={} layer={} seed={} bpm={} events={} ts={} ks={} temp={:.2} top_p={:.2} top_k={} drums={} intensity={} music_type={} dynamic={}",
            self.zone.as_deref().unwrap_or("-"),
            self.layer,
            p.seed,
            p.bpm,
            p.gen_events,
            p.time_sig,
            p.key_sig,
            p.temp,
            p.top_p,
            p.top_k,
            p.drum_kit,
            p.intensity.map(|i| format!("{:.2}", i)).unwrap_or_else(|| "-".to_string()),
            p.music_type.as_deref().unwrap_or("-"),
            self.dynamic,
        )?;
        if let Some(key) = &self.cache_key {
            write!(f, " cache_key={}", key)?;
        }
        write!(f, " instruments=[{}]", p.instruments.join(", "))
    }
}

#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub initialized: bool,
    pub online: bool,
    pub client: String,
    pub zone: Option<String>,
    pub danger: f32,
    pub manual_danger: bool,
    pub player_dead: bool,
    pub death_requested: bool,
    pub transitioning: bool,
    pub pending: usize,
    pub loaded_clips: usize,
    pub cache: CacheStats,
    pub volumes: [(Layer, f32); 3],
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Adaptive music status:")?;
        writeln!(f, "  Initialized: {}", self.initialized)?;
        writeln!(f, "  Server: {} ({})", if self.online { "online" } else { "offline" }, self.client)?;
        writeln!(f, "  Zone: {}", self.zone.as_deref().unwrap_or("-"))?;
        writeln!(
            f,
            "  Danger: {:.2}{}",
            self.danger,
            if self.manual_danger { " (manual)" } else { "" }
        )?;
        writeln!(f, "  Dead: {} (death music requested: {})", self.player_dead, self.death_requested)?;
        writeln!(f, "  Pending: {}, loaded clips: {}", self.pending, self.loaded_clips)?;
        writeln!(f, "  Cache: {}", self.cache)?;
        for (layer, volume) in self.volumes {
            writeln!(f, "  {}: {:.2}", layer.parameter_name(), volume)?;
        }
        Ok(())
    }
}

/// Everything the system needs, built by the composition root.
pub struct SystemParts {
    pub client: Arc<dyn MusicClient>,
    pub cache: MidiCache,
    pub renderer: MidiRenderer,
    pub mapper: ParameterMapper,
    pub danger: watch::Receiver<DangerSnapshot>,
    pub mix: MixTuning,
    pub delete_cache_on_shutdown: bool,
}

type LoadResult = Result<(Arc<PcmClip>, LoadSource), LoadError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

#[derive(Debug, Default)]
struct Flags {
    initialized: bool,
    online: bool,
    danger: f32,
    manual_danger: bool,
    player_dead: bool,
    death_requested: bool,
    transitioning: bool,
    zone: Option<ZoneConfig>,
}

struct Inner {
    client: Arc<dyn MusicClient>,
    cache: Mutex<MidiCache>,
    renderer: MidiRenderer,
    mapper: ParameterMapper,
    notifier: Notifier,
    danger_rx: watch::Receiver<DangerSnapshot>,
    mixer: Mutex<LayerMixer>,
    flags: Mutex<Flags>,
    loaded: Mutex<HashMap<String, Arc<PcmClip>>>,
    pending: Mutex<HashMap<String, SharedLoad>>,
    requests: Mutex<HashMap<String, RequestRecord>>,
    debug_overrides: Mutex<GenerationDebugOverrides>,
    death_task: Mutex<Option<JoinHandle<()>>>,
    mix: MixTuning,
    delete_cache_on_shutdown: bool,
    runtime: Handle,
    started: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Target volumes for Ambient, Tension and Combat at `danger`.
///
/// Combat can exceed 1 here; the mixer clamps.
pub fn layer_mix(danger: f32, tension_threshold: f32, combat_threshold: f32) -> [f32; 3] {
    let ambient = 1.0 - danger;

    let tension = if danger > tension_threshold {
        let span = combat_threshold - tension_threshold;
        let ramp = if span > 0.0 {
            (danger - tension_threshold) / span
        } else {
            1.0
        };
        ramp.min(1.0) * 0.6
    } else {
        0.0
    };

    let combat = if danger > combat_threshold {
        let span = 1.0 - combat_threshold;
        let ramp = if span > 0.0 { (danger - combat_threshold) / span } else { 1.0 };
        ramp * 1.2
    } else {
        0.0
    };

    [ambient, tension, combat]
}

fn death_params() -> MidiParams {
    MidiParams {
        seed: rand::thread_rng().gen_range(1000..9999),
        gen_events: 256,
        max_len: 256,
        bpm: 60,
        time_sig: "4/4".to_string(),
        instruments: vec!["Strings".to_string(), "Piano".to_string(), "Pad".to_string()],
        drum_kit: "None".to_string(),
        allow_cc: true,
        intensity: Some(0.8),
        music_type: Some(DEATH_REQUEST.to_string()),
        ..MidiParams::default()
    }
}

/// Cheap to clone; clones share one system.
#[derive(Clone)]
pub struct AdaptiveMusicSystem {
    inner: Arc<Inner>,
}

impl AdaptiveMusicSystem {
    pub fn new(parts: SystemParts, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: parts.client,
                cache: Mutex::new(parts.cache),
                renderer: parts.renderer,
                mapper: parts.mapper,
                notifier: Notifier::default(),
                danger_rx: parts.danger,
                mixer: Mutex::new(LayerMixer::new()),
                flags: Mutex::new(Flags::default()),
                loaded: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                requests: Mutex::new(HashMap::new()),
                debug_overrides: Mutex::new(GenerationDebugOverrides::default()),
                death_task: Mutex::new(None),
                mix: parts.mix,
                delete_cache_on_shutdown: parts.delete_cache_on_shutdown,
                runtime,
                started: Instant::now(),
            }),
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn client(&self) -> &Arc<dyn MusicClient> {
        &self.inner.client
    }

    /// Connect and load the starting zone. A failed connection leaves the
    /// system running from cache.
    pub async fn initialize(&self, zone: Option<&ZoneConfig>) -> Option<ZoneLoadReport> {
        info!("initializing adaptive music ({})", self.inner.client.name());
        self.reconnect().await;

        let report = match zone {
            Some(zone) => Some(self.load_zone(zone).await),
            None => None,
        };

        lock(&self.inner.flags).initialized = true;
        info!("adaptive music ready");
        report
    }

    /// Try the server again. Returns whether it is reachable.
    pub async fn reconnect(&self) -> bool {
        let online = match self.inner.client.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!("{}: connect failed: {}", self.inner.client.name(), e);
                self.inner.notifier.show_error(format!(
                    "Failed to connect to server ({}), will use cached layers only",
                    self.inner.client.name()
                ));
                false
            }
        };
        lock(&self.inner.flags).online = online;
        online
    }

    /// One game tick.
    pub fn update(&self, dt: f32) {
        let inner = &self.inner;

        if !lock(&inner.flags).initialized {
            return;
        }

        // Pumped unlocked; transports may call back into the system
        inner.client.update();

        let (danger, hold_mix, start_death) = {
            let mut flags = lock(&inner.flags);
            let mut start_death = false;
            if !flags.manual_danger {
                let snapshot = *inner.danger_rx.borrow();
                flags.danger = snapshot.danger;

                if snapshot.health <= 0.0 && !flags.player_dead {
                    flags.player_dead = true;
                    info!("player death detected");
                    if !flags.death_requested {
                        flags.death_requested = true;
                        start_death = true;
                    }
                }
            }
            (flags.danger, flags.player_dead || flags.transitioning, start_death)
        };

        if start_death {
            let handle = inner.runtime.spawn(Self::play_death_music(Arc::clone(inner)));
            *lock(&inner.death_task) = Some(handle);
        }

        let mut mixer = lock(&inner.mixer);
        if !hold_mix {
            let [ambient, tension, combat] =
                layer_mix(danger, inner.mix.tension_threshold, inner.mix.combat_threshold);
            mixer.set_layer_volume(Layer::Ambient, ambient);
            mixer.set_layer_volume(Layer::Tension, tension);
            mixer.set_layer_volume(Layer::Combat, combat);
        }
        mixer.update(dt);
    }

    /// Resolve every layer of `zone`, then swap the clips in and start the
    /// ambient layer.
    #[tracing::instrument(skip(self, zone), fields(zone = %zone.name))]
    pub async fn load_zone(&self, zone: &ZoneConfig) -> ZoneLoadReport {
        lock(&self.inner.flags).zone = Some(zone.clone());

        let report = self.preload_zone(zone).await;
        self.apply_zone_clips(&report);
        self.start_ambient_if_ready();

        info!(
            loaded = report.loaded_count(),
            failed = report.failed_count(),
            "zone loaded"
        );
        report
    }

    /// Preload `zone` while the current one keeps playing, fade out, then
    /// swap.
    #[tracing::instrument(skip(self, zone), fields(zone = %zone.name))]
    pub async fn change_zone(&self, zone: &ZoneConfig) -> ZoneChange {
        let current = lock(&self.inner.flags).zone.as_ref().map(|z| z.name.clone());
        if current.as_deref() == Some(zone.name.as_str()) {
            debug!("already in zone, ignoring change");
            return ZoneChange::Unchanged;
        }

        info!(from = current.as_deref().unwrap_or("-"), "changing zone");
        let report = self.preload_zone(zone).await;
        self.fade_and_swap(zone, &report).await;
        ZoneChange::Changed(report)
    }

    /// Same preload-then-swap path, applied to the zone already playing.
    pub async fn force_reload_current_zone(&self) -> Option<ZoneLoadReport> {
        let Some(zone) = lock(&self.inner.flags).zone.clone() else {
            warn!("cannot reload: no zone loaded");
            return None;
        };

        info!(zone = %zone.name, "force reloading zone");
        let report = self.preload_zone(&zone).await;
        self.fade_and_swap(&zone, &report).await;
        Some(report)
    }

    async fn fade_and_swap(&self, zone: &ZoneConfig, report: &ZoneLoadReport) {
        lock(&self.inner.flags).transitioning = true;
        lock(&self.inner.mixer).stop_all(false);

        let fade = Duration::from_secs_f32(self.inner.mix.zone_fade_secs.max(0.0));
        tokio::time::sleep(fade).await;

        {
            let mut flags = lock(&self.inner.flags);
            flags.zone = Some(zone.clone());
            flags.transitioning = false;
        }
        self.apply_zone_clips(report);
        self.start_ambient_if_ready();
        info!(zone = %zone.name, "zone change complete");
    }

    async fn preload_zone(&self, zone: &ZoneConfig) -> ZoneLoadReport {
        let loads = zone
            .layers
            .iter()
            .zip(Layer::ALL)
            .map(|(template, layer)| async move {
                debug!(layer = %template.name, slot = %layer, "preloading layer");
                LayerLoad {
                    layer,
                    name: template.name.clone(),
                    outcome: self.load_layer(&zone.name, template).await,
                }
            });

        ZoneLoadReport {
            zone: zone.name.clone(),
            layers: join_all(loads).await,
        }
    }

    fn apply_zone_clips(&self, report: &ZoneLoadReport) {
        let mut mixer = lock(&self.inner.mixer);
        for load in &report.layers {
            if let Some(clip) = load.outcome.clip() {
                mixer.set_clip(load.layer, Some(Arc::clone(clip)), true);
                debug!(slot = %load.layer, clip = %clip.name, "applied clip");
            }
        }
        mixer.set_layer_volume(Layer::Ambient, 1.0);
        mixer.set_layer_volume(Layer::Tension, 0.0);
        mixer.set_layer_volume(Layer::Combat, 0.0);
    }

    fn start_ambient_if_ready(&self) {
        let mut mixer = lock(&self.inner.mixer);
        if mixer.voice(Layer::Ambient).clip().is_some() {
            mixer.start_layer(Layer::Ambient);
            debug!("ambient layer playing");
        }
    }

    /// Resolve one layer template to a clip: memory, cache, server, render.
    pub async fn load_layer(&self, zone: &str, template: &LayerConfig) -> LoadOutcome {
        let inner = &self.inner;
        let (params, key, dynamic, bypass_cache) = self.prepare_request(zone, template);
        debug!(cache.key = %key, "resolving layer");

        if let Some(clip) = lock(&inner.loaded).get(&key) {
            debug!(cache.key = %key, "already loaded");
            return LoadOutcome::AlreadyLoaded(Arc::clone(clip));
        }

        let shared = {
            let mut pending = lock(&inner.pending);
            match pending.get(&key) {
                Some(in_flight) => {
                    debug!(cache.key = %key, "joining in-flight load");
                    in_flight.clone()
                }
                None => {
                    let load = Self::run_load(
                        Arc::clone(inner),
                        LoadJob {
                            zone: zone.to_string(),
                            layer: template.name.clone(),
                            key: key.clone(),
                            params,
                            dynamic,
                            bypass_cache,
                        },
                    )
                    .boxed()
                    .shared();
                    pending.insert(key.clone(), load.clone());
                    load
                }
            }
        };

        match shared.await {
            Ok((clip, LoadSource::Cached)) => LoadOutcome::Cached(clip),
            Ok((clip, LoadSource::Generated)) => LoadOutcome::Generated(clip),
            Err(e) => LoadOutcome::Failed(e),
        }
    }

    fn prepare_request(&self, zone: &str, template: &LayerConfig) -> (MidiParams, String, bool, bool) {
        let inner = &self.inner;
        let mut config = template.clone();
        let mut intensity = None;

        if inner.mix.dynamic_mapping {
            let snapshot = self.effective_snapshot();
            let game_time = inner.started.elapsed().as_secs_f32();
            inner
                .mapper
                .apply_dynamic_modifiers_preserve_identity(&mut config, zone, &template.name, &snapshot, game_time);

            let combat = snapshot.danger >= inner.mix.combat_threshold;
            intensity = Some(inner.mapper.calculate_intensity(snapshot.health, combat, snapshot.danger));
        }

        let mut params = config.to_params();
        params.intensity = intensity;

        let overrides = lock(&inner.debug_overrides).clone();
        overrides.apply(&mut params);

        let mut key = cache_key(zone, &template.name, params.seed, None, intensity);
        if let Some(suffix) = overrides.key_suffix(&params) {
            key.push_str(&suffix);
        }

        (params, key, inner.mix.dynamic_mapping, overrides.bypasses_cache())
    }

    /// Tracker snapshot with the manual danger override applied.
    fn effective_snapshot(&self) -> DangerSnapshot {
        let mut snapshot = *self.inner.danger_rx.borrow();
        let flags = lock(&self.inner.flags);
        if flags.manual_danger {
            snapshot.danger = flags.danger;
        }
        snapshot
    }

    async fn run_load(inner: Arc<Inner>, job: LoadJob) -> LoadResult {
        let result = Self::fetch_and_render(&inner, &job).await;
        lock(&inner.pending).remove(&job.key);

        if let Err(e) = &result {
            error!(layer = %job.layer, cache.key = %job.key, "layer load failed: {}", e);
            let message = match e {
                LoadError::Render(_) => format!("Failed to render audio for '{}'", job.layer),
                LoadError::Offline | LoadError::Generation(_) => format!("Failed to generate layer '{}'", job.layer),
            };
            inner.notifier.show_error(message);
        }
        result
    }

    async fn fetch_and_render(inner: &Inner, job: &LoadJob) -> LoadResult {
        let cached = if job.bypass_cache {
            None
        } else {
            lock(&inner.cache).get(&job.key).map(<[u8]>::to_vec)
        };

        let (midi, source) = match cached {
            Some(midi) => {
                debug!(cache.key = %job.key, bytes = midi.len(), "cache hit");
                (midi, LoadSource::Cached)
            }
            None => {
                if !lock(&inner.flags).online {
                    return Err(LoadError::Offline);
                }

                inner.record_request(RequestRecord {
                    zone: Some(job.zone.clone()),
                    layer: job.layer.clone(),
                    cache_key: Some(job.key.clone()),
                    params: job.params.clone(),
                    dynamic: job.dynamic,
                    at: Utc::now(),
                });
                debug!(
                    cache.key = %job.key,
                    seed = job.params.seed,
                    bpm = job.params.bpm,
                    events = job.params.gen_events,
                    "cache miss, requesting generation"
                );

                let midi = inner
                    .client
                    .request_midi(&job.params)
                    .await
                    .map_err(|e| LoadError::Generation(e.to_string()))?;

                if !job.bypass_cache {
                    if let Err(e) = lock(&inner.cache).set(job.key.clone(), midi.clone()) {
                        warn!(cache.key = %job.key, "not caching generated MIDI: {}", e);
                    }
                }
                (midi, LoadSource::Generated)
            }
        };

        let clip = inner
            .renderer
            .render_async(midi, format!("{}_{}", job.zone, job.layer))
            .await
            .map_err(|e| LoadError::Render(e.to_string()))?;

        lock(&inner.loaded).insert(job.key.clone(), Arc::clone(&clip));
        Ok((clip, source))
    }

    async fn play_death_music(inner: Arc<Inner>) {
        lock(&inner.mixer).stop_all(true);

        let params = death_params();
        let zone = lock(&inner.flags).zone.as_ref().map(|z| z.name.clone());
        inner.record_request(RequestRecord {
            zone,
            layer: DEATH_REQUEST.to_string(),
            cache_key: None,
            params: params.clone(),
            dynamic: false,
            at: Utc::now(),
        });
        info!(seed = params.seed, "requesting death music");

        if !lock(&inner.flags).online {
            inner.notifier.show_error("Failed to generate death music");
            return;
        }

        let midi = match inner.client.request_midi(&params).await {
            Ok(midi) => midi,
            Err(e) => {
                error!("death music request failed: {}", e);
                inner.notifier.show_error("Failed to generate death music");
                return;
            }
        };

        match inner.renderer.render_async(midi, "death_music".to_string()).await {
            Ok(clip) => {
                let mut mixer = lock(&inner.mixer);
                mixer.set_clip(Layer::Ambient, Some(clip), false);
                mixer.set_layer_volume(Layer::Ambient, 1.0);
                mixer.start_layer(Layer::Ambient);
                info!("playing death music");
            }
            Err(e) => {
                error!("failed to render death music: {}", e);
                inner.notifier.show_error(format!("Death music error: {}", e));
            }
        }
    }

    /// Wait for the death-music task, if one was started.
    pub async fn wait_for_death_music(&self) {
        let handle = lock(&self.inner.death_task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("death music task failed: {}", e);
            }
        }
    }

    /// Re-arm death detection after a respawn.
    pub fn reset_death_state(&self) {
        let mut flags = lock(&self.inner.flags);
        flags.player_dead = false;
        flags.death_requested = false;
        info!("death state reset");
    }

    /// Drive danger by hand, ignoring the tracker until
    /// [`use_automatic_danger`](Self::use_automatic_danger).
    pub fn set_danger_level(&self, danger: f32) {
        if !danger.is_finite() {
            warn!(danger, "ignoring non-finite danger level");
            return;
        }
        let mut flags = lock(&self.inner.flags);
        let danger = danger.clamp(0.0, 1.0);
        if !flags.manual_danger || (danger - flags.danger).abs() > 0.05 {
            debug!(from = flags.danger, to = danger, "manual danger level");
        }
        flags.manual_danger = true;
        flags.danger = danger;
    }

    pub fn use_automatic_danger(&self) {
        lock(&self.inner.flags).manual_danger = false;
    }

    pub fn danger_level(&self) -> f32 {
        lock(&self.inner.flags).danger
    }

    pub fn set_debug_overrides(&self, overrides: GenerationDebugOverrides) {
        *lock(&self.inner.debug_overrides) = overrides;
    }

    pub fn debug_overrides(&self) -> GenerationDebugOverrides {
        lock(&self.inner.debug_overrides).clone()
    }

    /// Last request sent under `label`: a layer name, or [`DEATH_REQUEST`].
    pub fn last_request(&self, label: &str) -> Option<RequestRecord> {
        lock(&self.inner.requests).get(label).cloned()
    }

    /// Drop every loaded clip and cached MIDI blob.
    pub fn clear_cache(&self) {
        lock(&self.inner.loaded).clear();
        if let Err(e) = lock(&self.inner.cache).clear() {
            warn!("failed to persist cleared cache: {:#}", e);
        }
        info!("cache cleared");
    }

    pub fn current_zone(&self) -> Option<String> {
        lock(&self.inner.flags).zone.as_ref().map(|z| z.name.clone())
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.inner.flags).initialized && !lock(&self.inner.loaded).is_empty()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    pub fn loaded_count(&self) -> usize {
        lock(&self.inner.loaded).len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        lock(&self.inner.cache).stats()
    }

    pub fn cache_contains(&self, key: &str) -> bool {
        lock(&self.inner.cache).contains(key)
    }

    /// Run `f` against the mixer.
    pub fn with_mixer<R>(&self, f: impl FnOnce(&mut LayerMixer) -> R) -> R {
        f(&mut lock(&self.inner.mixer))
    }

    pub fn loaded_clips(&self) -> Vec<(String, Arc<PcmClip>)> {
        let mut clips: Vec<_> = lock(&self.inner.loaded)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        clips.sort_by(|a, b| a.0.cmp(&b.0));
        clips
    }

    pub fn status(&self) -> SystemStatus {
        let flags = lock(&self.inner.flags);
        SystemStatus {
            initialized: flags.initialized,
            online: flags.online,
            client: self.inner.client.status(),
            zone: flags.zone.as_ref().map(|z| z.name.clone()),
            danger: flags.danger,
            manual_danger: flags.manual_danger,
            player_dead: flags.player_dead,
            death_requested: flags.death_requested,
            transitioning: flags.transitioning,
            pending: lock(&self.inner.pending).len(),
            loaded_clips: lock(&self.inner.loaded).len(),
            cache: lock(&self.inner.cache).stats(),
            volumes: lock(&self.inner.mixer).volumes(),
        }
    }

    /// Persist (or delete) the cache and close the connection.
    pub async fn shutdown(&self) {
        let result = {
            let mut cache = lock(&self.inner.cache);
            if self.inner.delete_cache_on_shutdown {
                cache.delete_cache()
            } else {
                cache.save()
            }
        };
        if let Err(e) = result {
            warn!("cache persistence failed on shutdown: {:#}", e);
        }

        self.inner.client.disconnect().await;
        info!("adaptive music shut down");
    }
}

struct LoadJob {
    zone: String,
    layer: String,
    key: String,
    params: MidiParams,
    dynamic: bool,
    bypass_cache: bool,
}

impl Inner {
    fn record_request(&self, record: RequestRecord) {
        lock(&self.requests).insert(record.layer.clone(), record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_mix_extremes() {
        let [a, t, c] = layer_mix(0.0, 0.3, 0.7);
        assert_eq!((a, t, c), (1.0, 0.0, 0.0));

        let [a, t, c] = layer_mix(1.0, 0.3, 0.7);
        assert!(a.abs() < 1e-6);
        assert!(t > 0.1);
        assert!(c > 0.5);
    }

    #[test]
    fn test_layer_mix_bands() {
        // Tension starts above its threshold and caps at 0.6
        assert_eq!(layer_mix(0.3, 0.3, 0.7)[1], 0.0);
        assert!((layer_mix(0.5, 0.3, 0.7)[1] - 0.3).abs() < 1e-5);
        assert!((layer_mix(0.9, 0.3, 0.7)[1] - 0.6).abs() < 1e-5);

        // Combat overshoots 1 before the mixer clamps it
        assert_eq!(layer_mix(0.7, 0.3, 0.7)[2], 0.0);
        assert!((layer_mix(1.0, 0.3, 0.7)[2] - 1.2).abs() < 1e-5);
    }

    #[test]
    fn test_layer_mix_degenerate_thresholds() {
        let [_, t, c] = layer_mix(1.0, 0.5, 0.5);
        assert!((t - 0.6).abs() < 1e-6);
        assert!(c > 0.0);
        let [_, _, c] = layer_mix(1.0, 0.5, 1.0);
        assert_eq!(c, 0.0);
    }

    #[test]
    fn test_death_params() {
        let params = death_params();
        assert!((1000..9999).contains(&params.seed));
        assert_eq!(params.bpm, 60);
        assert_eq!(params.music_type.as_deref(), Some("death"));
        assert_eq!(params.intensity, Some(0.8));
        assert_eq!(params.instruments, vec!["Strings", "Piano", "Pad"]);
    }

    #[test]
    fn test_outcome_clip() {
        let clip = Arc::new(PcmClip {
            name: "x".to_string(),
            sample_rate: 8000,
            channels: 2,
            samples: vec![0.0; 4],
        });
        assert!(LoadOutcome::Cached(Arc::clone(&clip)).clip().is_some());
        assert!(LoadOutcome::Failed(LoadError::Offline).clip().is_none());
        assert!(LoadOutcome::Failed(LoadError::Offline).is_failed());
    }
}
