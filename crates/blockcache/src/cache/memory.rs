//! In-process fast cache.
//!
//! Keys live in an LRU bounded by [`CacheConfig::capacity`]. An expired key is
//! dropped when it is next touched, and writes sweep every expired key at most
//! once per `sweep_interval_ms`, so keys that are never read again still go.

use crate::cache::{CacheConfig, CacheError, FastCache};
use crate::clock::Clock;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

enum Value {
    Bytes(Vec<u8>),
    /// member -> score
    Sorted(HashMap<String, i64>),
}

struct Slot {
    value: Value,
    expires_at_ms: i64,
}

struct Slots {
    lru: LruCache<String, Slot>,
    last_sweep_ms: i64,
}

impl Slots {
    /// Live slot for `key`, evicting it first if it has expired.
    fn live(&mut self, key: &str, now: i64) -> Option<&mut Slot> {
        if self.lru.peek(key).is_some_and(|s| s.expires_at_ms <= now) {
            self.lru.pop(key);
        }
        self.lru.get_mut(key)
    }

    fn sorted(
        &mut self,
        key: &str,
        now: i64,
    ) -> Result<Option<&mut HashMap<String, i64>>, CacheError> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Slot {
                value: Value::Sorted(set),
                ..
            }) => Ok(Some(set)),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    fn insert(&mut self, key: &str, slot: Slot) {
        if let Some((evicted, _)) = self.lru.push(key.to_string(), slot) {
            if evicted != key {
                debug!(%evicted, "fast cache full, evicted least recently used key");
            }
        }
    }

    /// Drop every expired key. Returns how many were dropped.
    fn sweep(&mut self, now: i64) -> usize {
        let expired: Vec<String> = self
            .lru
            .iter()
            .filter(|(_, slot)| slot.expires_at_ms <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.lru.pop(key);
        }
        self.last_sweep_ms = now;
        expired.len()
    }
}

pub struct MemoryCache {
    slots: Mutex<Slots>,
    clock: Arc<dyn Clock>,
    sweep_interval_ms: i64,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, &CacheConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        let last_sweep_ms = clock.now_millis();
        Self {
            slots: Mutex::new(Slots {
                lru: LruCache::new(capacity),
                last_sweep_ms,
            }),
            clock,
            sweep_interval_ms: i64::try_from(config.sweep_interval_ms).unwrap_or(i64::MAX),
        }
    }

    /// Sweep if the last sweep is older than the configured interval.
    fn maybe_sweep(&self, slots: &mut Slots, now: i64) {
        if now.saturating_sub(slots.last_sweep_ms) >= self.sweep_interval_ms {
            let dropped = slots.sweep(now);
            if dropped > 0 {
                debug!(dropped, remaining = slots.lru.len(), "swept expired keys");
            }
        }
    }

    /// Drop every expired key now. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        self.slots.lock().sweep(now)
    }

    /// Remaining lifetime of `key`, if it exists.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();
        let slot = slots.live(key, now)?;
        Some(Duration::from_millis((slot.expires_at_ms - now).max(0) as u64))
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.slots
            .lock()
            .lru
            .iter()
            .filter(|(_, slot)| slot.expires_at_ms > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys held, expired or not.
    pub fn stored(&self) -> usize {
        self.slots.lock().lru.len()
    }
}

fn expiry(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

#[async_trait]
impl FastCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();
        match slots.live(key, now) {
            None => Ok(None),
            Some(Slot {
                value: Value::Bytes(b),
                ..
            }) => Ok(Some(b.clone())),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();
        self.maybe_sweep(&mut slots, now);
        slots.insert(
            key,
            Slot {
                value: Value::Bytes(value.to_vec()),
                expires_at_ms: expiry(now, ttl),
            },
        );
        Ok(())
    }

    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64, CacheError> {
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();
        let count = slots
            .sorted(key, now)?
            .map(|set| set.values().filter(|&&s| s >= min && s <= max).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn zadd(
        &self,
        key: &str,
        score: i64,
        member: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();
        self.maybe_sweep(&mut slots, now);
        if slots.sorted(key, now)?.is_none() {
            slots.insert(
                key,
                Slot {
                    value: Value::Sorted(HashMap::new()),
                    expires_at_ms: now,
                },
            );
        }
        let slot = slots
            .lru
            .get_mut(key)
            .ok_or_else(|| CacheError::Unavailable(key.to_string()))?;
        slot.expires_at_ms = expiry(now, ttl);
        if let Value::Sorted(set) = &mut slot.value {
            set.insert(member.to_string(), score);
        }
        Ok(())
    }

    async fn zrange(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>, CacheError> {
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();
        let Some(set) = slots.sorted(key, now)? else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(i64, &String)> = set
            .iter()
            .filter(|(_, s)| **s >= min && **s <= max)
            .map(|(m, &s)| (s, m))
            .collect();
        hits.sort();
        Ok(hits.into_iter().map(|(_, m)| m.clone()).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let now = self.clock.now_millis();
        let mut slots = self.slots.lock();
        let Some(set) = slots.sorted(key, now)? else {
            return Ok(false);
        };
        let removed = set.remove(member).is_some();
        if set.is_empty() {
            slots.lru.pop(key);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::limit::{LimiterConfig, RateLimiter};

    fn cache() -> (Arc<ManualClock>, MemoryCache) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = MemoryCache::new(clock.clone());
        (clock, cache)
    }

    #[tokio::test]
    async fn value_expires_after_ttl() {
        let (clock, cache) = cache();
        cache.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.ttl("k"), Some(Duration::from_secs(60)));
        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        clock.advance(Duration::from_secs(1));
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stored(), 0);
    }

    #[tokio::test]
    async fn sorted_set_range_ops() {
        let (_clock, cache) = cache();
        let ttl = Duration::from_secs(300);
        cache.zadd("z", 30, "c", ttl).await.unwrap();
        cache.zadd("z", 10, "a", ttl).await.unwrap();
        cache.zadd("z", 20, "b", ttl).await.unwrap();
        assert_eq!(cache.zcount("z", 10, 20).await.unwrap(), 2);
        assert_eq!(cache.zrange("z", 0, 25).await.unwrap(), vec!["a", "b"]);
        assert!(cache.zrem("z", "a").await.unwrap());
        assert!(!cache.zrem("z", "a").await.unwrap());
        assert_eq!(cache.zcount("z", i64::MIN, i64::MAX).await.unwrap(), 2);
        assert_eq!(cache.zcount("missing", 0, 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zadd_refreshes_set_expiry() {
        let (clock, cache) = cache();
        cache.zadd("z", 1, "a", Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(8));
        cache.zadd("z", 2, "b", Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.zcount("z", 0, 10).await.unwrap(), 2);
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.zcount("z", 0, 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn type_mismatch_is_an_error() {
        let (_clock, cache) = cache();
        cache.set("k", b"v", Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            cache.zcount("k", 0, 1).await,
            Err(CacheError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn abandoned_rate_windows_are_freed_by_later_writes() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let limiter = RateLimiter::new(cache.clone(), clock.clone(), LimiterConfig::default());

        for i in 0..10_000 {
            limiter.admit(&format!("10.0.{}.{}", i / 256, i % 256)).await.unwrap();
        }
        assert_eq!(cache.stored(), 10_000);

        // every window has passed its 300 s expiry; nobody reads those keys again
        clock.advance(Duration::from_secs(3600));
        for _ in 0..100 {
            limiter.admit("192.168.1.1").await.unwrap();
        }
        assert_eq!(cache.stored(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn sweep_is_rate_limited_and_purge_is_not() {
        let (clock, cache) = cache();
        cache.set("a", b"1", Duration::from_millis(100)).await.unwrap();
        clock.advance(Duration::from_millis(500));
        // last sweep was at construction, under a second ago
        cache.set("b", b"2", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.stored(), 2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stored(), 1);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = MemoryCache::with_config(
            clock,
            &CacheConfig {
                capacity: 2,
                ..Default::default()
            },
        );
        let ttl = Duration::from_secs(60);
        cache.set("a", b"1", ttl).await.unwrap();
        cache.set("b", b"2", ttl).await.unwrap();
        // touch "a" so "b" is the eviction candidate
        cache.get("a").await.unwrap();
        cache.set("c", b"3", ttl).await.unwrap();
        assert_eq!(cache.stored(), 2);
        assert!(cache.get("b").await.unwrap().is_none());
        assert_eq!(cache.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(cache.get("c").await.unwrap(), Some(b"3".to_vec()));
    }
}
