//! Danger tracking.
//!
//! [`GameStateTracker`] turns health, the combat flag and enemy proximity
//! into a single smoothed danger scalar. Every [`tick`](GameStateTracker::tick)
//! publishes a [`DangerSnapshot`] on a watch channel so readers never touch
//! the tracker's own state.
//!
//! Smoothing is one `lerp(danger, target, smooth_factor)` step per tick, so
//! the convergence rate follows the tick rate.

use std::sync::Arc;

use moodconf::TrackerTuning;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(self, other: Vec3) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Something hostile the player can be near.
pub trait Threat: Send + Sync {
    fn position(&self) -> Vec3;

    /// Dead threats are dropped at the next rescan.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Scene query for threats the game did not register explicitly.
pub trait ThreatScanner: Send + Sync {
    fn scan(&self) -> Vec<Arc<dyn Threat>>;
}

/// Observer the player-stats component implements to feed health in.
pub trait PlayerStatsSource: Send + Sync {
    /// Current health as a fraction of max, or `None` when unknown.
    fn health_fraction(&self) -> Option<f32>;
}

/// Returned by [`GameStateTracker::register_threat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreatHandle(u64);

/// What readers of the tracker see each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DangerSnapshot {
    /// Smoothed danger in [0, 1]
    pub danger: f32,
    /// Instantaneous target the smoothing chases
    pub target: f32,
    pub health: f32,
    pub combat_active: bool,
    pub nearby_enemies: usize,
}

impl Default for DangerSnapshot {
    fn default() -> Self {
        Self {
            danger: 0.0,
            target: 0.0,
            health: 1.0,
            combat_active: false,
            nearby_enemies: 0,
        }
    }
}

/// Single-writer danger state. Owned by whoever drives the game tick.
pub struct GameStateTracker {
    tuning: TrackerTuning,
    health: f32,
    combat_active: bool,
    danger: f32,
    target: f32,

    player_position: Option<Vec3>,
    registered: Vec<(ThreatHandle, Arc<dyn Threat>)>,
    next_handle: u64,
    primary_scanner: Option<Box<dyn ThreatScanner>>,
    fallback_scanner: Option<Box<dyn ThreatScanner>>,
    tracked: Vec<Arc<dyn Threat>>,

    /// Sum of tick deltas
    clock: f32,
    last_scan: Option<f32>,
    last_manual_health: Option<f32>,
    stats_source: Option<Arc<dyn PlayerStatsSource>>,

    publisher: watch::Sender<DangerSnapshot>,
}

impl GameStateTracker {
    pub fn new(tuning: TrackerTuning) -> Self {
        let (publisher, _) = watch::channel(DangerSnapshot::default());
        Self {
            tuning,
            health: 1.0,
            combat_active: false,
            danger: 0.0,
            target: 0.0,
            player_position: None,
            registered: Vec::new(),
            next_handle: 0,
            primary_scanner: None,
            fallback_scanner: None,
            tracked: Vec::new(),
            clock: 0.0,
            last_scan: None,
            last_manual_health: None,
            stats_source: None,
            publisher,
        }
    }

    pub fn tuning(&self) -> &TrackerTuning {
        &self.tuning
    }

    /// Set health explicitly. Pauses stats-source auto-sync for the grace window.
    /// Non-finite values are ignored.
    pub fn set_health(&mut self, health: f32) {
        if !health.is_finite() {
            warn!(health, "ignoring non-finite health");
            return;
        }
        self.last_manual_health = Some(self.clock);
        self.health = health.clamp(0.0, 1.0);
    }

    pub fn health(&self) -> f32 {
        self.health
    }

    pub fn set_combat_active(&mut self, active: bool) {
        if self.combat_active != active {
            debug!(combat = active, "combat state changed");
        }
        self.combat_active = active;
    }

    pub fn combat_active(&self) -> bool {
        self.combat_active
    }

    /// Smoothed danger, not the instantaneous target.
    pub fn danger_level(&self) -> f32 {
        self.danger
    }

    pub fn target_danger_level(&self) -> f32 {
        self.target
    }

    pub fn set_player_position(&mut self, position: Vec3) {
        self.player_position = Some(position);
    }

    pub fn clear_player_position(&mut self) {
        self.player_position = None;
    }

    pub fn register_threat(&mut self, threat: Arc<dyn Threat>) -> ThreatHandle {
        if let Some((handle, _)) = self.registered.iter().find(|(_, t)| Arc::ptr_eq(t, &threat)) {
            return *handle;
        }
        let handle = ThreatHandle(self.next_handle);
        self.next_handle += 1;
        self.registered.push((handle, threat));
        handle
    }

    pub fn unregister_threat(&mut self, handle: ThreatHandle) -> bool {
        let Some(index) = self.registered.iter().position(|(h, _)| *h == handle) else {
            return false;
        };
        let (_, threat) = self.registered.remove(index);
        self.tracked.retain(|t| !Arc::ptr_eq(t, &threat));
        true
    }

    pub fn set_primary_scanner(&mut self, scanner: Box<dyn ThreatScanner>) {
        self.primary_scanner = Some(scanner);
    }

    /// Consulted only when the primary scanner finds nothing.
    pub fn set_fallback_scanner(&mut self, scanner: Box<dyn ThreatScanner>) {
        self.fallback_scanner = Some(scanner);
    }

    pub fn attach_stats_source(&mut self, source: Arc<dyn PlayerStatsSource>) {
        self.stats_source = Some(source);
    }

    pub fn detach_stats_source(&mut self) {
        self.stats_source = None;
    }

    /// Threats tracked as of the last rescan.
    pub fn nearby_enemy_count(&self) -> usize {
        self.tracked.len()
    }

    /// Receiver that sees a fresh snapshot after every tick.
    pub fn subscribe(&self) -> watch::Receiver<DangerSnapshot> {
        self.publisher.subscribe()
    }

    pub fn snapshot(&self) -> DangerSnapshot {
        DangerSnapshot {
            danger: self.danger,
            target: self.target,
            health: self.health,
            combat_active: self.combat_active,
            nearby_enemies: self.tracked.len(),
        }
    }

    /// Advance one game tick.
    pub fn tick(&mut self, dt: f32) {
        self.clock += dt.max(0.0);

        self.sync_health_from_source();

        let scan_due = self
            .last_scan
            .map_or(true, |last| self.clock - last >= self.tuning.scan_interval_secs);
        if scan_due {
            self.rescan();
        }

        self.target = self.compute_target();
        self.danger = lerp(self.danger, self.target, self.tuning.smooth_factor).clamp(0.0, 1.0);

        self.publisher.send_replace(self.snapshot());
    }

    /// Rebuild the tracked threat set now, ignoring the scan interval.
    pub fn rescan(&mut self) {
        self.last_scan = Some(self.clock);

        self.registered.retain(|(_, threat)| threat.is_alive());
        let mut tracked: Vec<Arc<dyn Threat>> = self.registered.iter().map(|(_, t)| Arc::clone(t)).collect();

        if let Some(player) = self.player_position {
            let mut scanned = self
                .primary_scanner
                .as_ref()
                .map(|s| s.scan())
                .unwrap_or_default();
            if scanned.is_empty() {
                scanned = self
                    .fallback_scanner
                    .as_ref()
                    .map(|s| s.scan())
                    .unwrap_or_default();
            }

            for threat in scanned {
                if !threat.is_alive() || tracked.iter().any(|t| Arc::ptr_eq(t, &threat)) {
                    continue;
                }
                if player.distance(threat.position()) <= self.tuning.detection_radius {
                    tracked.push(threat);
                }
            }
        }

        self.tracked = tracked;
    }

    /// Proximity danger in [0, 1]. Three threats at critical range saturate it.
    pub fn enemy_proximity_danger(&self) -> f32 {
        let Some(player) = self.player_position else {
            return 0.0;
        };
        if self.tracked.is_empty() {
            return 0.0;
        }

        let span = self.tuning.detection_radius - self.tuning.critical_radius;
        let total: f32 = self
            .tracked
            .iter()
            .map(|threat| {
                let distance = player.distance(threat.position());
                let normalized = if span > 0.0 {
                    ((distance - self.tuning.critical_radius) / span).clamp(0.0, 1.0)
                } else if distance <= self.tuning.critical_radius {
                    0.0
                } else {
                    1.0
                };
                1.0 - normalized
            })
            .sum();

        (total / 3.0).min(1.0)
    }

    pub fn state_info(&self) -> String {
        format!(
            "Health: {:.0}%, Enemies: {}, Combat: {}, Danger: {:.2}",
            self.health * 100.0,
            self.tracked.len(),
            self.combat_active,
            self.danger
        )
    }

    fn compute_target(&self) -> f32 {
        let mut danger = (1.0 - self.health) * 0.5;
        danger += self.enemy_proximity_danger() * 0.4;
        if self.combat_active {
            danger += self.tuning.combat_bonus;
        }
        danger.clamp(0.0, 1.0)
    }

    fn sync_health_from_source(&mut self) {
        let Some(source) = &self.stats_source else {
            return;
        };
        if let Some(at) = self.last_manual_health {
            if self.clock - at < self.tuning.health_grace_secs {
                return;
            }
        }
        if let Some(fraction) = source.health_fraction() {
            if fraction.is_finite() {
                self.health = fraction.clamp(0.0, 1.0);
            }
        }
    }
}

pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Enemy {
        position: Mutex<Vec3>,
        alive: std::sync::atomic::AtomicBool,
    }

    impl Enemy {
        fn at(x: f32) -> Arc<Self> {
            Arc::new(Self {
                position: Mutex::new(Vec3::new(x, 0.0, 0.0)),
                alive: std::sync::atomic::AtomicBool::new(true),
            })
        }

        fn move_to(&self, x: f32) {
            *self.position.lock().unwrap() = Vec3::new(x, 0.0, 0.0);
        }
    }

    impl Threat for Enemy {
        fn position(&self) -> Vec3 {
            *self.position.lock().unwrap()
        }

        fn is_alive(&self) -> bool {
            self.alive.load(std::sync::atomic::Ordering::Relaxed)
        }
    }

    struct FixedScanner(Vec<Arc<dyn Threat>>);

    impl ThreatScanner for FixedScanner {
        fn scan(&self) -> Vec<Arc<dyn Threat>> {
            self.0.clone()
        }
    }

    struct Stats(Mutex<Option<f32>>);

    impl PlayerStatsSource for Stats {
        fn health_fraction(&self) -> Option<f32> {
            *self.0.lock().unwrap()
        }
    }

    fn converge(tracker: &mut GameStateTracker) {
        for _ in 0..500 {
            tracker.tick(1.0 / 60.0);
        }
    }

    #[test]
    fn test_health_alone_converges() {
        for health in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let mut tracker = GameStateTracker::new(TrackerTuning::default());
            tracker.set_health(health);
            converge(&mut tracker);
            let expected = ((1.0 - health) * 0.5f32).clamp(0.0, 1.0);
            assert!(
                (tracker.danger_level() - expected).abs() < 0.001,
                "health {} gave danger {}",
                health,
                tracker.danger_level()
            );
        }
    }

    #[test]
    fn test_non_finite_health_is_ignored() {
        let mut tracker = GameStateTracker::new(TrackerTuning::default());
        tracker.set_health(0.8);
        tracker.set_health(f32::NAN);
        assert_eq!(tracker.health(), 0.8);
        tracker.tick(1.0 / 60.0);
        assert!(tracker.danger_level().is_finite());

        tracker.set_health(f32::INFINITY);
        tracker.set_health(0.5);
        converge(&mut tracker);
        assert!((tracker.danger_level() - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_health_is_clamped() {
        let mut tracker = GameStateTracker::new(TrackerTuning::default());
        tracker.set_health(3.0);
        assert_eq!(tracker.health(), 1.0);
        tracker.set_health(-1.0);
        assert_eq!(tracker.health(), 0.0);
    }

    #[test]
    fn test_smoothing_is_one_lerp_per_tick() {
        let mut tracker = GameStateTracker::new(TrackerTuning::default());
        tracker.set_combat_active(true);
        // dt does not matter, the step does
        tracker.tick(10.0);
        assert!((tracker.target_danger_level() - 0.3).abs() < 1e-6);
        assert!((tracker.danger_level() - 0.03).abs() < 1e-6);
        tracker.tick(0.0001);
        assert!((tracker.danger_level() - 0.057).abs() < 1e-6);
    }

    #[test]
    fn test_proximity_increases_danger_to_max() {
        let mut tracker = GameStateTracker::new(TrackerTuning::default());
        tracker.set_player_position(Vec3::default());
        let enemies: Vec<_> = (0..3).map(|_| Enemy::at(50.0)).collect();
        tracker.set_primary_scanner(Box::new(FixedScanner(
            enemies.iter().map(|e| Arc::clone(e) as Arc<dyn Threat>).collect(),
        )));

        converge(&mut tracker);
        let far = tracker.danger_level();
        assert_eq!(tracker.nearby_enemy_count(), 0);

        for enemy in &enemies {
            enemy.move_to(2.0);
        }
        tracker.rescan();
        converge(&mut tracker);
        let near = tracker.danger_level();
        assert_eq!(tracker.nearby_enemy_count(), 3);
        assert!(near > far);
        assert!((tracker.enemy_proximity_danger() - 1.0).abs() < 1e-6);

        tracker.set_combat_active(true);
        tracker.set_health(0.0);
        converge(&mut tracker);
        assert!((tracker.danger_level() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_partial_distance_contribution() {
        let mut tracker = GameStateTracker::new(TrackerTuning::default());
        tracker.set_player_position(Vec3::default());
        // Halfway between critical (5) and detection (20): contributes 0.5
        tracker.register_threat(Enemy::at(12.5));
        tracker.rescan();
        assert!((tracker.enemy_proximity_danger() - 0.5 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_fallback_scanner_only_when_primary_is_empty() {
        let mut tracker = GameStateTracker::new(TrackerTuning::default());
        tracker.set_player_position(Vec3::default());
        tracker.set_primary_scanner(Box::new(FixedScanner(Vec::new())));
        tracker.set_fallback_scanner(Box::new(FixedScanner(vec![Enemy::at(1.0) as Arc<dyn Threat>])));
        tracker.rescan();
        assert_eq!(tracker.nearby_enemy_count(), 1);

        tracker.set_primary_scanner(Box::new(FixedScanner(vec![
            Enemy::at(1.0) as Arc<dyn Threat>,
            Enemy::at(2.0) as Arc<dyn Threat>,
        ])));
        tracker.rescan();
        assert_eq!(tracker.nearby_enemy_count(), 2);
    }

    #[test]
    fn test_register_and_unregister() {
        let mut tracker = GameStateTracker::new(TrackerTuning::default());
        tracker.set_player_position(Vec3::default());
        let enemy = Enemy::at(3.0);

        let handle = tracker.register_threat(enemy.clone());
        assert_eq!(tracker.register_threat(enemy.clone()), handle);
        tracker.rescan();
        assert_eq!(tracker.nearby_enemy_count(), 1);

        assert!(tracker.unregister_threat(handle));
        assert!(!tracker.unregister_threat(handle));
        assert_eq!(tracker.nearby_enemy_count(), 0);
    }

    #[test]
    fn test_dead_threats_are_pruned() {
        let mut tracker = GameStateTracker::new(TrackerTuning::default());
        tracker.set_player_position(Vec3::default());
        let enemy = Enemy::at(3.0);
        tracker.register_threat(enemy.clone());
        tracker.rescan();
        assert_eq!(tracker.nearby_enemy_count(), 1);

        enemy.alive.store(false, std::sync::atomic::Ordering::Relaxed);
        tracker.rescan();
        assert_eq!(tracker.nearby_enemy_count(), 0);
    }

    #[test]
    fn test_rescan_respects_interval() {
        let mut tracker = GameStateTracker::new(TrackerTuning::default());
        tracker.set_player_position(Vec3::default());
        tracker.tick(0.01);

        tracker.register_threat(Enemy::at(1.0));
        tracker.tick(0.1);
        assert_eq!(tracker.nearby_enemy_count(), 0);
        tracker.tick(0.2);
        assert_eq!(tracker.nearby_enemy_count(), 1);
    }

    #[test]
    fn test_stats_source_respects_grace_window() {
        let mut tracker = GameStateTracker::new(TrackerTuning::default());
        let stats = Arc::new(Stats(Mutex::new(Some(0.4))));
        tracker.attach_stats_source(stats.clone());

        tracker.tick(0.1);
        assert!((tracker.health() - 0.4).abs() < 1e-6);

        tracker.set_health(0.9);
        tracker.tick(0.1);
        assert!((tracker.health() - 0.9).abs() < 1e-6);

        tracker.tick(0.2);
        assert!((tracker.health() - 0.4).abs() < 1e-6);

        *stats.0.lock().unwrap() = None;
        tracker.set_health(0.7);
        tracker.tick(1.0);
        assert!((tracker.health() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_ticks_publish_snapshots() {
        let mut tracker = GameStateTracker::new(TrackerTuning::default());
        let rx = tracker.subscribe();
        tracker.set_health(0.0);
        tracker.set_combat_active(true);
        tracker.tick(0.016);

        let snapshot = *rx.borrow();
        assert_eq!(snapshot, tracker.snapshot());
        assert_eq!(snapshot.health, 0.0);
        assert!(snapshot.combat_active);
        assert!(snapshot.danger > 0.0);
    }

    #[test]
    fn test_state_info() {
        let tracker = GameStateTracker::new(TrackerTuning::default());
        assert_eq!(tracker.state_info(), "Health: 100%, Enemies: 0, Combat: false, Danger: 0.00");
    }
}
