//! moodring - adaptive music harness
//!
//! Subcommands:
//! - `moodring play` - Load a zone and drive the music from a simulated encounter
//! - `moodring zones` - List zones found in the zone directory
//! - `moodring cache <stats|clear|delete>` - Inspect or reset the MIDI cache
//! - `moodring config` - Print the effective configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use midicache::{CacheConfig, MidiCache};
use moodconf::{ConfigSources, MoodConfig, TransportKind};
use moodproto::{ClientConfig, MusicClient, PipeClient, WebSocketClient};
use moodring::{
    load_zone_dir, AdaptiveMusicSystem, GameStateTracker, GenerationDebugOverrides, MidiRenderer, ParameterMapper,
    PcmClip, SystemParts, Threat, Vec3, ZoneConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const TICK_HZ: f64 = 60.0;

#[derive(Parser)]
#[command(name = "moodring")]
#[command(about = "Adaptive game music driven by generated MIDI")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./moodring.toml)
    #[arg(short, long, global = true, env = "MOODRING_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a zone and run the music loop
    Play {
        /// Zone name (defaults to mix.initial_zone, then the first zone found)
        #[arg(short, long)]
        zone: Option<String>,

        /// How long to run, in seconds
        #[arg(short, long, default_value = "30")]
        seconds: f32,

        /// Walk the player toward a threat over the run
        #[arg(long)]
        danger_ramp: bool,

        /// Hold danger at this level instead of tracking
        #[arg(long)]
        danger: Option<f32>,

        /// Write every loaded clip, plus the mixed output, as WAV files here
        #[arg(long)]
        export_wav: Option<PathBuf>,

        /// TOML file of generation overrides
        #[arg(long)]
        overrides: Option<PathBuf>,
    },

    /// List zones in the zone directory
    Zones,

    /// MIDI cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Print the effective configuration
    Config {
        /// Also list which files and env vars contributed
        #[arg(long)]
        sources: bool,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry count, size and budget
    Stats,
    /// Drop every entry, keep the cache file
    Clear,
    /// Delete the cache file from disk
    Delete,
}

struct Marker(Vec3);

impl Threat for Marker {
    fn position(&self) -> Vec3 {
        self.0
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) =
        MoodConfig::load_with_sources_from(cli.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.infra.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Play {
            zone,
            seconds,
            danger_ramp,
            danger,
            export_wav,
            overrides,
        } => {
            let overrides = overrides.as_deref().map(load_overrides).transpose()?;
            play(&config, zone.as_deref(), seconds, danger_ramp, danger, export_wav.as_deref(), overrides).await?;
        }
        Commands::Zones => {
            for zone in load_zone_dir(&config.infra.paths.zone_dir)? {
                let layers: Vec<&str> = zone.layers.iter().map(|l| l.name.as_str()).collect();
                println!("{}: {}", zone.name, layers.join(", "));
            }
        }
        Commands::Cache { action } => cache_command(&config, action)?,
        Commands::Config { sources: show_sources } => print_config(&config, &sources, show_sources),
    }

    Ok(())
}

fn cache_config(config: &MoodConfig) -> CacheConfig {
    CacheConfig::with_base_path(&config.infra.paths.cache_dir).with_max_bytes(config.infra.cache.max_bytes)
}

fn cache_command(config: &MoodConfig, action: CacheAction) -> Result<()> {
    let mut cache = MidiCache::open(cache_config(config));
    match action {
        CacheAction::Stats => {
            println!("{}", cache.stats());
            for key in cache.keys_by_recency() {
                println!("  {}", key);
            }
        }
        CacheAction::Clear => {
            cache.clear()?;
            println!("cache cleared");
        }
        CacheAction::Delete => {
            cache.delete_cache()?;
            println!("deleted {}", cache.config().cache_file().display());
        }
    }
    Ok(())
}

fn print_config(config: &MoodConfig, sources: &ConfigSources, show_sources: bool) {
    if show_sources {
        println!("# files:");
        for file in &sources.files {
            println!("#   {}", file.display());
        }
        for var in &sources.env_overrides {
            println!("# env: {}", var);
        }
        println!();
    }
    print!("{}", config.to_toml());
}

fn load_overrides(path: &Path) -> Result<GenerationDebugOverrides> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn build_client(config: &MoodConfig) -> Arc<dyn MusicClient> {
    let transport = &config.infra.transport;
    match transport.kind {
        TransportKind::WebSocket => Arc::new(WebSocketClient::new(ClientConfig::from_transport(
            "websocket",
            &transport.server_url,
            transport,
        ))),
        TransportKind::Pipe => Arc::new(PipeClient::new(ClientConfig::from_transport(
            "pipe",
            &transport.pipe_name,
            transport,
        ))),
    }
}

/// Cache keys can carry time signatures like `4/4`.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect()
}

fn pick_zone(config: &MoodConfig, requested: Option<&str>) -> Result<ZoneConfig> {
    let zones = load_zone_dir(&config.infra.paths.zone_dir)?;
    let wanted = requested.or(config.tuning.mix.initial_zone.as_deref());

    match wanted {
        Some(name) => zones
            .into_iter()
            .find(|z| z.name.eq_ignore_ascii_case(name))
            .with_context(|| format!("zone '{}' not found in {}", name, config.infra.paths.zone_dir.display())),
        None => match zones.into_iter().next() {
            Some(zone) => Ok(zone),
            None => bail!("no zones in {}", config.infra.paths.zone_dir.display()),
        },
    }
}

async fn play(
    config: &MoodConfig,
    zone: Option<&str>,
    seconds: f32,
    danger_ramp: bool,
    fixed_danger: Option<f32>,
    export_wav: Option<&Path>,
    overrides: Option<GenerationDebugOverrides>,
) -> Result<()> {
    let zone = pick_zone(config, zone)?;
    info!("moodring {} starting in zone '{}'", env!("CARGO_PKG_VERSION"), zone.name);

    let mut tracker = GameStateTracker::new(config.tuning.tracker.clone());
    let renderer = MidiRenderer::default();

    let system = AdaptiveMusicSystem::new(
        SystemParts {
            client: build_client(config),
            cache: MidiCache::open(cache_config(config)),
            renderer,
            mapper: ParameterMapper::new(config.tuning.mapper.clone()),
            danger: tracker.subscribe(),
            mix: config.tuning.mix.clone(),
            delete_cache_on_shutdown: config.infra.cache.delete_on_shutdown,
        },
        tokio::runtime::Handle::current(),
    );
    if let Some(overrides) = overrides {
        system.set_debug_overrides(overrides);
    }
    if let Some(danger) = fixed_danger {
        system.set_danger_level(danger);
    }

    if let Some(report) = system.initialize(Some(&zone)).await {
        info!("{} of {} layers ready", report.loaded_count(), report.layers.len());
    }

    // Player walks from outside detection range to the threat
    let start = config.tuning.tracker.detection_radius + 5.0;
    tracker.register_threat(Arc::new(Marker(Vec3::default())));
    tracker.set_player_position(Vec3::new(start, 0.0, 0.0));

    let dt = (1.0 / TICK_HZ) as f32;
    let total_ticks = (seconds.max(0.0) as f64 * TICK_HZ) as u64;
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / TICK_HZ));

    let mut recorded: Vec<f32> = Vec::new();
    let mut produced_frames = 0u64;

    for tick in 0..total_ticks {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }

        if danger_ramp {
            let progress = tick as f32 / total_ticks.max(1) as f32;
            tracker.set_player_position(Vec3::new(start * (1.0 - progress), 0.0, 0.0));
        }
        tracker.tick(dt);
        system.update(dt);

        if export_wav.is_some() {
            let due = (tick + 1) * renderer.sample_rate() as u64 / TICK_HZ as u64;
            let frames = (due - produced_frames) as usize;
            let mut block = vec![0.0f32; frames * 2];
            system.with_mixer(|mixer| mixer.mix_into(&mut block));
            recorded.extend_from_slice(&block);
            produced_frames = due;
        }

        if tick % TICK_HZ as u64 == 0 {
            let status = system.status();
            let volumes: Vec<String> = status
                .volumes
                .iter()
                .map(|(layer, v)| format!("{}={:.2}", layer, v))
                .collect();
            info!(danger = status.danger, "{}", volumes.join(" "));
        }
    }

    println!("{}", system.status());

    if let Some(dir) = export_wav {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        for (key, clip) in system.loaded_clips() {
            let path = dir.join(format!("{}.wav", file_stem(&key)));
            clip.write_wav(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("wrote {} ({:.1}s)", path.display(), clip.duration_secs());
        }

        let mix = PcmClip {
            name: format!("{}_mix", zone.name),
            sample_rate: renderer.sample_rate(),
            channels: 2,
            samples: recorded,
        };
        let path = dir.join(format!("{}.wav", mix.name));
        mix.write_wav(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("wrote {:.1}s of mixed audio to {}", mix.duration_secs(), path.display());
    }

    system.shutdown().await;
    Ok(())
}
