//! Volatile key-value cache with per-key expiry and sorted-set primitives.

mod memory;

pub use memory::MemoryCache;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default number of keys held before the least recently used is evicted.
const DEFAULT_CAPACITY: usize = 100_000;
/// Default minimum spacing between two expiry sweeps.
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Configuration for the in-process fast cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of keys.
    pub capacity: usize,
    /// Writes sweep expired keys at most this often.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("wrong type for key {0}")]
    WrongType(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait FastCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Number of members of the sorted set `key` with score in `[min, max]`.
    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64, CacheError>;

    /// Add `member` with `score`, then (re)set the whole set's expiry to `ttl`.
    async fn zadd(&self, key: &str, score: i64, member: &str, ttl: Duration)
        -> Result<(), CacheError>;

    /// Members with score in `[min, max]`, ascending by score.
    async fn zrange(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>, CacheError>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, CacheError>;
}
