//! Sliding-window admission control per caller identity.
//!
//! Each identity owns a sorted set in the fast cache holding one member per
//! call, scored by the call's millisecond timestamp. A call is admitted when
//! fewer than `limit` members fall inside `[now - window, now]`. Every call is
//! recorded, admitted or not, and members older than the window are pruned on
//! the way out.
//!
//! The count, record and prune steps for one identity run under an in-process
//! lock, so a burst of concurrent calls cannot all observe a count below the
//! limit before any of them is recorded.

use crate::cache::{CacheError, FastCache};
use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const IP_RATE_LIMIT_KEY_PREFIX: &str = "ip_rate_limit:";
const LIMIT: u64 = 5;
const WINDOW_SECS: u64 = 60;
const EXPIRY_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum LimitError {
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
}

/// What to answer when the window cannot be read or written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the call.
    Open,
    /// Surface the failure to the caller.
    #[default]
    Closed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimiterConfig {
    pub limit: u64,
    pub window_secs: u64,
    /// Lifetime of an identity's whole set, refreshed on every call.
    pub expiry_secs: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limit: LIMIT,
            window_secs: WINDOW_SECS,
            expiry_secs: EXPIRY_SECS,
            failure_policy: FailurePolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected,
}

type IdentityLocks = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

pub struct RateLimiter {
    cache: Arc<dyn FastCache>,
    clock: Arc<dyn Clock>,
    config: LimiterConfig,
    locks: Mutex<IdentityLocks>,
    seq: AtomicU64,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn FastCache>, clock: Arc<dyn Clock>, config: LimiterConfig) -> Self {
        Self {
            cache,
            clock,
            config,
            locks: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    fn locks(&self) -> MutexGuard<'_, IdentityLocks> {
        // The map only holds lock handles; a panic elsewhere leaves it consistent.
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn release(&self, key: &str, handle: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks();
        drop(handle);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    pub async fn admit(&self, identity: &str) -> Result<Admission, LimitError> {
        let key = format!("{}{}", IP_RATE_LIMIT_KEY_PREFIX, identity);
        let handle = self.acquire(&key);
        let outcome = {
            let _serial = handle.lock().await;
            self.slide(&key).await
        };
        self.release(&key, handle);

        match outcome {
            Ok(Admission::Rejected) => {
                warn!(%identity, "rate limited");
                Ok(Admission::Rejected)
            }
            Ok(admission) => Ok(admission),
            Err(e) => match self.config.failure_policy {
                FailurePolicy::Open => {
                    warn!(%identity, error = %e, "limiter unavailable, admitting");
                    Ok(Admission::Allowed)
                }
                FailurePolicy::Closed => {
                    warn!(%identity, error = %e, "limiter unavailable, failing request");
                    Err(e)
                }
            },
        }
    }

    async fn slide(&self, key: &str) -> Result<Admission, LimitError> {
        let now = self.clock.now_millis();
        let window_ms =
            i64::try_from(self.config.window_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let window_start = now.saturating_sub(window_ms);

        let before = self.cache.zcount(key, window_start, now).await?;
        let admitted = before < self.config.limit;

        let member = format!("{}-{}", now, self.seq.fetch_add(1, Ordering::Relaxed));
        let expiry = Duration::from_secs(self.config.expiry_secs);
        self.cache.zadd(key, now, &member, expiry).await?;

        let after = self.cache.zcount(key, window_start, now).await?;
        debug!(key, before, after, admitted, "rate window");

        let stale = self.cache.zrange(key, 0, window_start.saturating_sub(1)).await?;
        for m in &stale {
            self.cache.zrem(key, m).await?;
        }

        Ok(if admitted {
            Admission::Allowed
        } else {
            Admission::Rejected
        })
    }

    #[cfg(test)]
    fn tracked_identities(&self) -> usize {
        self.locks().len()
    }
}
