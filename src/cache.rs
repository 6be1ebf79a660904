//! Process-wide enrichment result cache.
//!
//! Single process, no cross-process invalidation: every replica runs its
//! own cache with its own TTL clock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::models::{IocType, NormalizedResult, Verdict};

const DEFAULT_POSITIVE_TTL_SECS: i64 = 86_400;
const DEFAULT_NEGATIVE_TTL_SECS: i64 = 21_600;

const POSITIVE_TTL_MIN: i64 = 60;
const POSITIVE_TTL_MAX: i64 = 604_800;
const NEGATIVE_TTL_MIN: i64 = 30;
const NEGATIVE_TTL_MAX: i64 = 86_400;

#[derive(Debug, Clone)]
struct CacheEntry {
    result: NormalizedResult,
    expires_at: DateTime<Utc>,
}

/// Shared in-process cache keyed on a stable hash of provider + IOC.
///
/// `clear(Some(value))` is intentionally unsupported: keys are opaque
/// hashes, so there is no way to find entries for a single value without
/// storing the plaintext key alongside it. Callers asking for a
/// value-scoped clear get a full clear instead, same as the system this
/// was modeled on.
#[derive(Clone)]
pub struct ResultCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    positive_ttl: Arc<RwLock<Duration>>,
    negative_ttl: Arc<RwLock<Duration>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            positive_ttl: Arc::new(RwLock::new(Duration::seconds(DEFAULT_POSITIVE_TTL_SECS))),
            negative_ttl: Arc::new(RwLock::new(Duration::seconds(DEFAULT_NEGATIVE_TTL_SECS))),
        }
    }

    fn key(provider: &str, ioc_type: IocType, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{provider}:{ioc_type}:{value}").as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, provider: &str, ioc_type: IocType, value: &str) -> Option<NormalizedResult> {
        let key = Self::key(provider, ioc_type, value);
        let entries = self.entries.read().unwrap();
        let entry = entries.get(&key)?;
        if entry.expires_at <= Utc::now() {
            return None;
        }
        Some(entry.result.clone())
    }

    /// Cache `result`, choosing the positive or negative TTL based on
    /// whether the verdict is a non-`Unknown` finding or an absence of one.
    pub fn put(&self, provider: &str, ioc_type: IocType, value: &str, result: NormalizedResult) {
        let key = Self::key(provider, ioc_type, value);
        let ttl = if result.verdict == Verdict::Unknown {
            *self.negative_ttl.read().unwrap()
        } else {
            *self.positive_ttl.read().unwrap()
        };
        let entry = CacheEntry {
            result,
            expires_at: Utc::now() + ttl,
        };
        self.entries.write().unwrap().insert(key, entry);
    }

    /// Clamp and set the positive/negative TTLs (seconds), admin operation.
    pub fn set_ttls(&self, positive_secs: i64, negative_secs: i64) {
        let positive = positive_secs.clamp(POSITIVE_TTL_MIN, POSITIVE_TTL_MAX);
        let negative = negative_secs.clamp(NEGATIVE_TTL_MIN, NEGATIVE_TTL_MAX);
        *self.positive_ttl.write().unwrap() = Duration::seconds(positive);
        *self.negative_ttl.write().unwrap() = Duration::seconds(negative);
    }

    /// Clear every cached entry. A value-scoped clear always returns `-1`
    /// (unsupported) and still performs the full wipe, matching the
    /// original hashed-key limitation.
    pub fn clear(&self, value: Option<&str>) -> i64 {
        self.entries.write().unwrap().clear();
        if value.is_some() {
            -1
        } else {
            0
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(verdict: Verdict) -> NormalizedResult {
        NormalizedResult {
            verdict,
            evidence: "test".into(),
            ..Default::default()
        }
    }

    #[test]
    fn round_trips_a_cached_result() {
        let cache = ResultCache::new();
        assert!(cache.get("vt", IocType::Domain, "evil.example").is_none());

        cache.put("vt", IocType::Domain, "evil.example", sample(Verdict::Malicious));
        let hit = cache.get("vt", IocType::Domain, "evil.example").unwrap();
        assert_eq!(hit.verdict, Verdict::Malicious);
    }

    #[test]
    fn distinct_providers_and_types_do_not_collide() {
        let cache = ResultCache::new();
        cache.put("vt", IocType::Domain, "evil.example", sample(Verdict::Malicious));
        assert!(cache.get("urlscan", IocType::Domain, "evil.example").is_none());
        assert!(cache.get("vt", IocType::Url, "evil.example").is_none());
    }

    #[test]
    fn ttls_are_clamped_to_range() {
        let cache = ResultCache::new();
        cache.set_ttls(1, 1_000_000);
        assert_eq!(*cache.positive_ttl.read().unwrap(), Duration::seconds(POSITIVE_TTL_MIN));
        assert_eq!(*cache.negative_ttl.read().unwrap(), Duration::seconds(NEGATIVE_TTL_MAX));
    }

    #[test]
    fn value_scoped_clear_is_unsupported_but_still_wipes_everything() {
        let cache = ResultCache::new();
        cache.put("vt", IocType::Domain, "evil.example", sample(Verdict::Malicious));
        cache.put("vt", IocType::Domain, "other.example", sample(Verdict::Benign));

        let rc = cache.clear(Some("evil.example"));
        assert_eq!(rc, -1);
        assert!(cache.is_empty());
    }

    #[test]
    fn full_clear_returns_zero() {
        let cache = ResultCache::new();
        cache.put("vt", IocType::Domain, "evil.example", sample(Verdict::Malicious));
        assert_eq!(cache.clear(None), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_is_usable_from_an_async_context() {
        tokio_test::block_on(async {
            let cache = ResultCache::new();
            cache.put("vt", IocType::Domain, "evil.example", sample(Verdict::Malicious));
            let hit = cache.get("vt", IocType::Domain, "evil.example");
            assert_eq!(hit.unwrap().verdict, Verdict::Malicious);
        });
    }
}
