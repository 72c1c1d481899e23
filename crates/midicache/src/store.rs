//! LRU-evicting MIDI store with whole-file JSON persistence.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::CacheError;

/// One cached generation result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    #[serde(with = "base64_bytes")]
    pub midi_data: Vec<u8>,
    /// Unix seconds of the last write.
    pub timestamp: i64,
    pub access_count: u32,
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub max_bytes: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} entries, {:.2}/{:.2} MB",
            self.entries,
            self.total_bytes as f64 / (1024.0 * 1024.0),
            self.max_bytes as f64 / (1024.0 * 1024.0)
        )
    }
}

/// On-disk document. Entries are ordered least to most recently used.
#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    entries: Vec<CacheEntry>,
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    recency: u64,
}

/// Size-bounded MIDI cache keyed by request fingerprint.
///
/// Not internally synchronized: wrap it in a mutex when several tasks share it.
#[derive(Debug)]
pub struct MidiCache {
    config: CacheConfig,
    slots: HashMap<String, Slot>,
    /// recency tick -> key, oldest first
    order: BTreeMap<u64, String>,
    next_tick: u64,
    total_bytes: u64,
}

impl MidiCache {
    /// Open the cache, loading whatever was persisted under `config.base_path`.
    ///
    /// A missing file yields an empty cache. An unreadable or corrupt file is
    /// logged and also yields an empty cache.
    pub fn open(config: CacheConfig) -> Self {
        let mut cache = Self::empty(config);
        match cache.load() {
            Ok(0) => debug!(path = %cache.config.cache_file().display(), "starting with empty MIDI cache"),
            Ok(count) => info!(
                path = %cache.config.cache_file().display(),
                entries = count,
                bytes = cache.total_bytes,
                "loaded MIDI cache"
            ),
            Err(e) => {
                warn!(path = %cache.config.cache_file().display(), "failed to load MIDI cache, starting empty: {:#}", e);
                cache.reset_memory();
            }
        }
        cache
    }

    /// A cache that starts empty and ignores anything on disk until `save`.
    pub fn empty(config: CacheConfig) -> Self {
        Self {
            config,
            slots: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            total_bytes: 0,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up `key`. A hit becomes the most recently used entry.
    pub fn get(&mut self, key: &str) -> Option<&[u8]> {
        let tick = self.next_tick;
        let slot = match self.slots.get_mut(key) {
            Some(slot) => slot,
            None => {
                debug!(cache.key = %key, "cache miss");
                return None;
            }
        };

        self.order.remove(&slot.recency);
        slot.recency = tick;
        slot.entry.access_count = slot.entry.access_count.saturating_add(1);
        self.order.insert(tick, key.to_string());
        self.next_tick += 1;

        debug!(cache.key = %key, hits = slot.entry.access_count, "cache hit");
        Some(&slot.entry.midi_data)
    }

    /// Insert or replace `key`, evicting least recently used entries until it fits.
    pub fn set(&mut self, key: impl Into<String>, midi_data: Vec<u8>) -> Result<(), CacheError> {
        let key = key.into();
        let size = midi_data.len() as u64;

        if size == 0 {
            return Err(CacheError::EmptyPayload { key });
        }
        if size > self.config.max_bytes {
            return Err(CacheError::TooLarge {
                key,
                size,
                max: self.config.max_bytes,
            });
        }

        self.remove(&key);

        while self.total_bytes + size > self.config.max_bytes {
            if !self.evict_oldest() {
                break;
            }
        }

        let tick = self.next_tick;
        self.next_tick += 1;
        self.order.insert(tick, key.clone());
        self.total_bytes += size;
        self.slots.insert(
            key.clone(),
            Slot {
                entry: CacheEntry {
                    key: key.clone(),
                    midi_data,
                    timestamp: chrono::Utc::now().timestamp(),
                    access_count: 0,
                },
                recency: tick,
            },
        );

        debug!(cache.key = %key, size, total = self.total_bytes, "cached MIDI");
        Ok(())
    }

    /// Drop a single entry. Returns whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                self.order.remove(&slot.recency);
                self.total_bytes -= slot.entry.midi_data.len() as u64;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.slots.len(),
            total_bytes: self.total_bytes,
            max_bytes: self.config.max_bytes,
        }
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> Vec<&str> {
        self.order.values().map(String::as_str).collect()
    }

    /// Drop every entry and persist the empty cache.
    pub fn clear(&mut self) -> Result<()> {
        self.reset_memory();
        info!("cleared MIDI cache");
        self.save()
    }

    /// Remove the backing file and all in-memory entries.
    pub fn delete_cache(&mut self) -> Result<()> {
        self.reset_memory();
        let path = self.config.cache_file();
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to delete cache file: {}", path.display()))?;
            info!(path = %path.display(), "deleted MIDI cache file");
        }
        Ok(())
    }

    /// Overwrite the backing file with the whole cache.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.config.base_path).with_context(|| {
            format!("failed to create cache dir: {}", self.config.base_path.display())
        })?;

        let document = CacheDocument {
            entries: self
                .order
                .values()
                .filter_map(|key| self.slots.get(key))
                .map(|slot| slot.entry.clone())
                .collect(),
        };

        let path = self.config.cache_file();
        let json = serde_json::to_vec(&document).context("failed to serialize MIDI cache")?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write cache file: {}", path.display()))?;

        debug!(path = %path.display(), entries = document.entries.len(), "saved MIDI cache");
        Ok(())
    }

    fn load(&mut self) -> Result<usize> {
        let path = self.config.cache_file();
        if !path.exists() {
            return Ok(0);
        }

        let bytes = fs::read(&path)
            .with_context(|| format!("failed to read cache file: {}", path.display()))?;
        let document: CacheDocument = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse cache file: {}", path.display()))?;

        let mut loaded = 0;
        for entry in document.entries {
            let size = entry.midi_data.len() as u64;
            if size == 0 || self.slots.contains_key(&entry.key) {
                continue;
            }
            // A smaller budget than the one the file was written with
            while self.total_bytes + size > self.config.max_bytes {
                if !self.evict_oldest() {
                    break;
                }
            }
            if self.total_bytes + size > self.config.max_bytes {
                continue;
            }

            let tick = self.next_tick;
            self.next_tick += 1;
            self.order.insert(tick, entry.key.clone());
            self.total_bytes += size;
            self.slots.insert(entry.key.clone(), Slot { entry, recency: tick });
            loaded += 1;
        }

        Ok(loaded)
    }

    fn evict_oldest(&mut self) -> bool {
        let Some((_, key)) = self.order.pop_first() else {
            return false;
        };
        if let Some(slot) = self.slots.remove(&key) {
            let size = slot.entry.midi_data.len() as u64;
            self.total_bytes -= size;
            info!(cache.key = %key, size, "evicted least recently used MIDI");
        }
        true
    }

    fn reset_memory(&mut self) {
        self.slots.clear();
        self.order.clear();
        self.total_bytes = 0;
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir, max_bytes: u64) -> MidiCache {
        MidiCache::open(CacheConfig::with_base_path(dir.path()).with_max_bytes(max_bytes))
    }

    #[test]
    fn test_set_and_get() -> Result<()> {
        let dir = TempDir::new()?;
        let mut cache = cache_in(&dir, 1024);

        cache.set("forest_ambient_1001", b"MThd-data".to_vec())?;
        assert_eq!(cache.get("forest_ambient_1001"), Some(&b"MThd-data"[..]));
        assert_eq!(cache.get("forest_ambient_9999"), None);
        Ok(())
    }

    #[test]
    fn test_miss_has_no_side_effects() -> Result<()> {
        let dir = TempDir::new()?;
        let mut cache = cache_in(&dir, 1024);
        cache.set("a", vec![1; 10])?;

        assert!(cache.get("missing").is_none());
        assert_eq!(cache.keys_by_recency(), vec!["a"]);
        assert_eq!(cache.stats().total_bytes, 10);
        Ok(())
    }

    #[test]
    fn test_rejects_empty_and_oversized() -> Result<()> {
        let dir = TempDir::new()?;
        let mut cache = cache_in(&dir, 16);

        assert!(matches!(cache.set("e", Vec::new()), Err(CacheError::EmptyPayload { .. })));
        assert!(matches!(cache.set("big", vec![0; 17]), Err(CacheError::TooLarge { size: 17, .. })));
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn test_eviction_is_lru_not_fifo() -> Result<()> {
        let dir = TempDir::new()?;
        let mut cache = cache_in(&dir, 30);

        cache.set("a", vec![1; 10])?;
        cache.set("b", vec![2; 10])?;
        cache.set("c", vec![3; 10])?;

        // Touch "a" so "b" becomes the oldest
        assert!(cache.get("a").is_some());

        cache.set("d", vec![4; 10])?;

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert!(cache.stats().total_bytes <= 30);
        Ok(())
    }

    #[test]
    fn test_total_never_exceeds_budget() -> Result<()> {
        let dir = TempDir::new()?;
        let mut cache = cache_in(&dir, 100);

        for i in 0..50u8 {
            let size = 5 + (i as usize * 7) % 40;
            cache.set(format!("k{}", i), vec![i; size])?;
            assert!(cache.stats().total_bytes <= 100);
        }
        Ok(())
    }

    #[test]
    fn test_replace_updates_size() -> Result<()> {
        let dir = TempDir::new()?;
        let mut cache = cache_in(&dir, 100);

        cache.set("a", vec![1; 40])?;
        cache.set("a", vec![2; 10])?;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().total_bytes, 10);
        assert_eq!(cache.get("a"), Some(&[2u8; 10][..]));
        Ok(())
    }

    #[test]
    fn test_access_count_tracks_hits() -> Result<()> {
        let dir = TempDir::new()?;
        let mut cache = cache_in(&dir, 100);
        cache.set("a", vec![1; 4])?;
        cache.get("a");
        cache.get("a");
        cache.save()?;

        let raw = fs::read_to_string(dir.path().join("midi_cache.json"))?;
        let doc: CacheDocument = serde_json::from_str(&raw)?;
        assert_eq!(doc.entries[0].access_count, 2);
        Ok(())
    }

    #[test]
    fn test_save_and_reload_preserves_recency() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let mut cache = cache_in(&dir, 1000);
            cache.set("a", vec![1, 2, 3])?;
            cache.set("b", vec![4, 5, 6])?;
            cache.set("c", vec![7, 8, 9])?;
            cache.get("a");
            cache.save()?;
        }

        let mut reloaded = cache_in(&dir, 1000);
        assert_eq!(reloaded.keys_by_recency(), vec!["b", "c", "a"]);
        assert_eq!(reloaded.get("b"), Some(&[4u8, 5, 6][..]));
        assert_eq!(reloaded.stats().total_bytes, 9);
        Ok(())
    }

    #[test]
    fn test_corrupt_file_starts_empty() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("midi_cache.json"), b"{not json")?;

        let mut cache = cache_in(&dir, 1000);
        assert!(cache.is_empty());
        // Still usable in memory
        cache.set("a", vec![1])?;
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn test_clear_persists_empty_state() -> Result<()> {
        let dir = TempDir::new()?;
        let mut cache = cache_in(&dir, 1000);
        cache.set("a", vec![1; 8])?;
        cache.save()?;
        cache.clear()?;

        assert_eq!(cache.stats().total_bytes, 0);
        let reloaded = cache_in(&dir, 1000);
        assert!(reloaded.is_empty());
        Ok(())
    }

    #[test]
    fn test_delete_cache_removes_file() -> Result<()> {
        let dir = TempDir::new()?;
        let mut cache = cache_in(&dir, 1000);
        cache.set("a", vec![1; 8])?;
        cache.save()?;
        assert!(dir.path().join("midi_cache.json").exists());

        cache.delete_cache()?;
        assert!(!dir.path().join("midi_cache.json").exists());
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn test_stats_display() {
        let stats = CacheStats {
            entries: 3,
            total_bytes: 1024 * 1024,
            max_bytes: 50 * 1024 * 1024,
        };
        assert_eq!(stats.to_string(), "3 entries, 1.00/50.00 MB");
    }
}
