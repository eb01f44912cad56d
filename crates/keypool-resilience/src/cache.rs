//! Response caching for completions.
//!
//! Identical requests are answered from memory instead of spending a key.
//! Entries are addressed by a SHA-256 [`Fingerprint`] of the request and kept
//! in a bounded LRU with a per-entry TTL. All access goes through one mutex.

use keypool_core::{system_clock, ChatMessage, Clock, CompletionRequest, MaxTokens, ModelId};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,
    /// Maximum number of entries in the cache
    pub max_entries: usize,
    /// Default TTL for cache entries
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            default_ttl: Duration::from_secs(3600),
        }
    }
}

/// Content address of a request
///
/// Hex SHA-256 over the model, the token budget and the ordered role/content
/// sequence. Fields are length-prefixed so that message boundaries cannot
/// collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a completion request
    #[must_use]
    pub fn from_request(request: &CompletionRequest) -> Self {
        Self::compute(&request.model, request.max_tokens, &request.messages)
    }

    /// Fingerprint the parts of a completion request
    #[must_use]
    pub fn compute(model: &ModelId, max_tokens: MaxTokens, messages: &[ChatMessage]) -> Self {
        let mut hasher = Sha256::new();
        absorb(&mut hasher, model.as_str().as_bytes());
        hasher.update(max_tokens.value().to_be_bytes());
        hasher.update((messages.len() as u64).to_be_bytes());
        for message in messages {
            absorb(&mut hasher, message.role.as_str().as_bytes());
            absorb(&mut hasher, message.content.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex digest
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn absorb(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: String,
    created_at: Instant,
    ttl: Duration,
    hits: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Current number of entries
    pub entries: usize,
    /// Maximum number of entries
    pub capacity: usize,
    /// Entries dropped for capacity or age
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit rate in percent
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

/// Cache lookup result for metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookupResult {
    /// Cache hit
    Hit,
    /// Cache miss
    Miss,
    /// Cache disabled
    Disabled,
}

impl CacheLookupResult {
    /// Label used in metrics
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Disabled => "disabled",
        }
    }
}

struct Inner {
    entries: LruCache<Fingerprint, CacheEntry>,
    stats: CacheStats,
}

/// Response cache for completions
pub struct ResponseCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl ResponseCache {
    /// Create a new response cache
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a cache that reads time from `clock`
    #[must_use]
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats {
                    capacity: capacity.get(),
                    ..CacheStats::default()
                },
            }),
            config,
            clock,
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Create a disabled cache
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(CacheConfig {
            enabled: false,
            ..Default::default()
        })
    }

    /// Check if caching is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Look up a response, reporting how the lookup went
    pub fn lookup(&self, fingerprint: &Fingerprint) -> (Option<String>, CacheLookupResult) {
        if !self.config.enabled {
            return (None, CacheLookupResult::Disabled);
        }

        let now = self.clock.now();
        let mut guard = self.inner.lock();
        let Inner { entries, stats } = &mut *guard;

        let expired = entries.peek(fingerprint).map(|entry| entry.is_expired(now));
        match expired {
            Some(false) => {
                if let Some(entry) = entries.get_mut(fingerprint) {
                    entry.hits += 1;
                    stats.hits += 1;
                    debug!(fingerprint = %fingerprint, hits = entry.hits, "Cache hit");
                    return (Some(entry.response.clone()), CacheLookupResult::Hit);
                }
                stats.misses += 1;
                (None, CacheLookupResult::Miss)
            }
            Some(true) => {
                entries.pop(fingerprint);
                stats.misses += 1;
                stats.evictions += 1;
                stats.entries = entries.len();
                debug!(fingerprint = %fingerprint, "Cache miss (expired)");
                (None, CacheLookupResult::Miss)
            }
            None => {
                stats.misses += 1;
                debug!(fingerprint = %fingerprint, "Cache miss");
                (None, CacheLookupResult::Miss)
            }
        }
    }

    /// Get a cached response
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.lookup(fingerprint).0
    }

    /// Put a response in the cache, overwriting any previous entry
    pub fn put(&self, fingerprint: Fingerprint, response: impl Into<String>) {
        self.put_with_ttl(fingerprint, response, self.config.default_ttl);
    }

    /// Put a response with custom TTL
    pub fn put_with_ttl(&self, fingerprint: Fingerprint, response: impl Into<String>, ttl: Duration) {
        if !self.config.enabled {
            return;
        }

        let entry = CacheEntry {
            response: response.into(),
            created_at: self.clock.now(),
            ttl,
            hits: 0,
        };

        let mut guard = self.inner.lock();
        let Inner { entries, stats } = &mut *guard;
        if let Some((displaced, _)) = entries.push(fingerprint.clone(), entry) {
            if displaced != fingerprint {
                stats.evictions += 1;
                debug!(evicted = %displaced, "Cache entry evicted");
            }
        }
        stats.entries = entries.len();

        debug!(fingerprint = %fingerprint, entries = stats.entries, "Response cached");
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        guard.entries.clear();
        guard.stats.entries = 0;

        info!("Cache cleared");
    }

    /// Remove expired entries
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut guard = self.inner.lock();
        let Inner { entries, stats } = &mut *guard;

        let expired: Vec<Fingerprint> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }

        let removed = expired.len();
        stats.entries = entries.len();
        stats.evictions += removed as u64;

        if removed > 0 {
            debug!(removed, "Expired cache entries removed");
        }
        removed
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keypool_core::ManualClock;

    fn fingerprint(content: &str) -> Fingerprint {
        Fingerprint::compute(
            &ModelId::new("meta-llama/llama-3.1-8b-instruct:free").unwrap(),
            MaxTokens::default(),
            &[ChatMessage::system("be brief"), ChatMessage::user(content)],
        )
    }

    fn manual_cache(max_entries: usize, ttl: Duration) -> (ResponseCache, ManualClock) {
        let clock = ManualClock::new();
        let cache = ResponseCache::with_clock(
            CacheConfig {
                enabled: true,
                max_entries,
                default_ttl: ttl,
            },
            Arc::new(clock.clone()),
        );
        (cache, clock)
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let first = fingerprint("Hello world");
        assert_eq!(first, fingerprint("Hello world"));
        assert_eq!(first.as_str().len(), 64);
        assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_order_matters() {
        let model = ModelId::new("m").unwrap();
        let forward = Fingerprint::compute(
            &model,
            MaxTokens::default(),
            &[ChatMessage::user("a"), ChatMessage::user("b")],
        );
        let reversed = Fingerprint::compute(
            &model,
            MaxTokens::default(),
            &[ChatMessage::user("b"), ChatMessage::user("a")],
        );
        assert_ne!(forward, reversed);
    }

    #[test]
    fn test_fingerprint_boundaries_and_roles() {
        let model = ModelId::new("m").unwrap();
        let split = Fingerprint::compute(
            &model,
            MaxTokens::default(),
            &[ChatMessage::user("ab"), ChatMessage::user("c")],
        );
        let joined = Fingerprint::compute(
            &model,
            MaxTokens::default(),
            &[ChatMessage::user("a"), ChatMessage::user("bc")],
        );
        assert_ne!(split, joined);

        let as_user = Fingerprint::compute(&model, MaxTokens::default(), &[ChatMessage::user("x")]);
        let as_system = Fingerprint::compute(&model, MaxTokens::default(), &[ChatMessage::system("x")]);
        assert_ne!(as_user, as_system);
    }

    #[test]
    fn test_fingerprint_includes_model_and_budget() {
        let messages = [ChatMessage::user("hi")];
        let base = Fingerprint::compute(&ModelId::new("a").unwrap(), MaxTokens::default(), &messages);
        let other_model = Fingerprint::compute(&ModelId::new("b").unwrap(), MaxTokens::default(), &messages);
        let other_budget =
            Fingerprint::compute(&ModelId::new("a").unwrap(), MaxTokens::new(50).unwrap(), &messages);

        assert_ne!(base, other_model);
        assert_ne!(base, other_budget);
    }

    #[test]
    fn test_cache_hit_and_miss() {
        let cache = ResponseCache::with_defaults();
        assert!(cache.get(&fingerprint("Hello")).is_none());

        cache.put(fingerprint("Hello"), "Hi there");
        assert_eq!(cache.get(&fingerprint("Hello")), Some("Hi there".to_string()));
        assert!(cache.get(&fingerprint("Goodbye")).is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let cache = ResponseCache::with_defaults();
        cache.put(fingerprint("Hello"), "first");
        cache.put(fingerprint("Hello"), "second");

        assert_eq!(cache.get(&fingerprint("Hello")), Some("second".to_string()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_cache_expiry() {
        let (cache, clock) = manual_cache(10, Duration::from_secs(60));
        cache.put(fingerprint("Hello"), "Hi");

        clock.advance(Duration::from_secs(59));
        assert!(cache.get(&fingerprint("Hello")).is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get(&fingerprint("Hello")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let (cache, clock) = manual_cache(10, Duration::from_secs(60));
        cache.put(fingerprint("old"), "1");
        clock.advance(Duration::from_secs(30));
        cache.put(fingerprint("new"), "2");
        clock.advance(Duration::from_secs(30));

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&fingerprint("new")).is_some());
    }

    #[test]
    fn test_cache_eviction_is_lru() {
        let (cache, _clock) = manual_cache(2, Duration::from_secs(3600));
        cache.put(fingerprint("First"), "1");
        cache.put(fingerprint("Second"), "2");

        // touch First so Second becomes least recently used
        assert!(cache.get(&fingerprint("First")).is_some());
        cache.put(fingerprint("Third"), "3");

        assert!(cache.get(&fingerprint("Second")).is_none());
        assert!(cache.get(&fingerprint("First")).is_some());
        assert!(cache.get(&fingerprint("Third")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_cache_disabled() {
        let cache = ResponseCache::disabled();
        cache.put(fingerprint("Hello"), "Hi");

        let (hit, result) = cache.lookup(&fingerprint("Hello"));
        assert!(hit.is_none());
        assert_eq!(result, CacheLookupResult::Disabled);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_stats() {
        let cache = ResponseCache::with_defaults();
        cache.get(&fingerprint("Hello"));
        cache.put(fingerprint("Hello"), "Hi");
        cache.get(&fingerprint("Hello"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.capacity, 1000);
        assert!((stats.hit_rate() - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_cache_clear() {
        let cache = ResponseCache::with_defaults();
        cache.put(fingerprint("Hello"), "Hi");
        cache.clear();

        assert!(cache.get(&fingerprint("Hello")).is_none());
        assert_eq!(cache.stats().entries, 0);
    }
}
