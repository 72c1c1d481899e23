//! Cache fingerprints.

/// Number of buckets intensity is quantized into for keying.
pub const INTENSITY_BUCKETS: f32 = 5.0;

/// Build the cache key for a generated layer.
///
/// `"{zone}_{layer}_{seed}"`, then `_{music_type}` when a non-empty type is
/// given, then `_i{bucket}` where `bucket = floor(intensity * 5)`.
pub fn cache_key(
    zone: &str,
    layer: &str,
    seed: i32,
    music_type: Option<&str>,
    intensity: Option<f32>,
) -> String {
    let mut key = format!("{}_{}_{}", zone, layer, seed);

    if let Some(music_type) = music_type.filter(|t| !t.is_empty()) {
        key.push('_');
        key.push_str(music_type);
    }

    if let Some(intensity) = intensity {
        let bucket = (intensity * INTENSITY_BUCKETS).floor() as i32;
        key.push_str(&format!("_i{}", bucket));
    }

    key
}

/// Deterministic polynomial string hash (base 31, wrapping).
///
/// Stable across processes and platforms, unlike `std`'s randomized hasher,
/// so it is safe to feed into seeds and persisted cache keys.
pub fn stable_hash(s: &str) -> i32 {
    s.chars()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}
