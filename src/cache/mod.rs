//! Content-addressed result cache with TTL expiry.
//!
//! Keys are derived, not raw: product names pass through a lossy
//! normalization (strip parentheticals, storage sizes, model numbers,
//! condition words, non-ASCII; keep the first four words) before hashing, so
//! near-duplicate names identified with different cosmetic text land on one
//! entry. Intentional false-positive hits for "close enough" names are by
//! contract; the strip/truncate order is normative.

use std::sync::{Arc, LazyLock};

use chrono::{Duration, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::storage::Storage;

static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("valid regex"));
static STORAGE_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d+\s*(?:gb|tb|mb)\b").expect("valid regex"));

/// Condition words that vary across listings of the same product.
const CONDITION_WORDS: &[&str] = &[
    "new",
    "used",
    "refurbished",
    "renewed",
    "unlocked",
    "sealed",
    "pre-owned",
    "preowned",
    "openbox",
    "open-box",
];

/// Normalize a product name to its cache-key core.
///
/// Strip order matters: parentheticals, storage-size tokens, model-number
/// tokens, condition words, non-ASCII, then the first four remaining words.
pub fn normalize_product_name(name: &str) -> String {
    let stripped = PARENTHETICAL.replace_all(name, " ");
    let stripped = STORAGE_SIZE.replace_all(&stripped, " ");

    let words: Vec<String> = stripped
        .split_whitespace()
        // Any remaining digit-bearing token is a model number.
        .filter(|w| !w.chars().any(|c| c.is_ascii_digit()))
        .filter(|w| {
            let lowered = w.to_lowercase();
            let trimmed = lowered.trim_matches(|c: char| !c.is_alphanumeric());
            !CONDITION_WORDS.contains(&trimmed)
        })
        .map(|w| {
            w.chars()
                .filter(|c| c.is_ascii())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .take(4)
        .collect();

    words.join(" ")
}

/// Derive a cache key from a product name: normalize then hash.
pub fn product_cache_key(cache_type: &str, name: &str) -> String {
    let core = normalize_product_name(name);
    digest_key(cache_type, core.as_bytes())
}

/// Derive a cache key from an arbitrary payload (e.g. a research blob).
pub fn payload_cache_key(cache_type: &str, payload: &serde_json::Value) -> String {
    digest_key(cache_type, payload.to_string().as_bytes())
}

fn digest_key(cache_type: &str, data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    format!("{}:{:x}", cache_type, digest)
}

/// TTL cache over the storage backend.
///
/// Degrades gracefully: a failing backing store behaves as a permanent miss
/// on reads and a no-op on writes, so callers always recompute.
#[derive(Clone)]
pub struct ResultCache {
    storage: Arc<dyn Storage>,
}

impl ResultCache {
    /// Create a cache over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Look up a payload by derived key. Expired entries are misses.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        match self.storage.cache_get(key).await {
            Ok(Some(entry)) => {
                debug!(key = %key, hits = entry.hit_count, "Cache hit");
                Some(entry.payload)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache get failed, treating as miss");
                None
            }
        }
    }

    /// Upsert a payload with a TTL in minutes. Overwrites reset hit counts.
    pub async fn set(
        &self,
        key: &str,
        cache_type: &str,
        payload: &serde_json::Value,
        ttl_minutes: i64,
    ) {
        let expires_at = Utc::now() + Duration::minutes(ttl_minutes);
        if let Err(e) = self
            .storage
            .cache_set(key, cache_type, payload, expires_at)
            .await
        {
            warn!(key = %key, error = %e, "Cache set failed, result not cached");
        }
    }
}
