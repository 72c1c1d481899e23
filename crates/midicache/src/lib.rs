//! Persistent, size-bounded cache of generated MIDI.
//!
//! Generation is slow, so every successful result is kept under a key
//! derived from the request ([`cache_key`]). The cache evicts strictly by
//! access recency once the byte budget is exceeded and persists as a single
//! JSON document (`midi_cache.json`) that is loaded wholesale at startup and
//! rewritten wholesale on [`MidiCache::save`].
//!
//! ```rust,no_run
//! use midicache::{cache_key, CacheConfig, MidiCache};
//!
//! let mut cache = MidiCache::open(CacheConfig::from_env());
//! let key = cache_key("forest", "ambient", 1001, None, None);
//! if cache.get(&key).is_none() {
//!     let midi = vec![/* bytes from the generation server */ 0x4d];
//!     cache.set(key, midi).ok();
//! }
//! cache.save().ok();
//! ```

pub mod config;
pub mod key;
pub mod store;

pub use config::{CacheConfig, CACHE_FILE_NAME, DEFAULT_MAX_BYTES};
pub use key::{cache_key, stable_hash};
pub use store::{CacheEntry, CacheStats, MidiCache};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("refusing to cache empty MIDI for {key}")]
    EmptyPayload { key: String },

    #[error("MIDI for {key} is {size} bytes, larger than the whole cache budget of {max}")]
    TooLarge { key: String, size: u64, max: u64 },
}
