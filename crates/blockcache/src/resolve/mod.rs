//! Tiered resolution: fast cache, then persistent store, then origin, with write-back.

mod resolver;

pub use resolver::TieredResolver;

use crate::cache::FastCache;
use crate::chain::OriginError;
use crate::model::{BlockDescriptor, ResolvedBlock};
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const SPECIAL_BLOCK_KEY_PREFIX: &str = "special_block:";
const SPECIAL_BLOCK_TTL_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("origin: {0}")]
    Origin(OriginError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::NotFound(_))
    }
}

impl From<OriginError> for ResolveError {
    fn from(e: OriginError) -> Self {
        match e {
            OriginError::NotFound(what) => ResolveError::NotFound(what),
            other => ResolveError::Origin(other),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Lifetime of special-pointer snapshots in the fast cache.
    pub special_ttl_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            special_ttl_secs: SPECIAL_BLOCK_TTL_SECS,
        }
    }
}

impl ResolverConfig {
    pub fn special_ttl(&self) -> Duration {
        Duration::from_secs(self.special_ttl_secs)
    }
}

/// Fast-cache key for a special pointer's snapshot.
pub fn special_block_key(descriptor: BlockDescriptor) -> String {
    format!("{}{}", SPECIAL_BLOCK_KEY_PREFIX, descriptor)
}

/// Read a snapshot. Unreachable cache or undecodable bytes count as a miss.
pub(crate) async fn read_snapshot(
    cache: &dyn FastCache,
    descriptor: BlockDescriptor,
) -> Option<ResolvedBlock> {
    let key = special_block_key(descriptor);
    let raw = match cache.get(&key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(%key, error = %e, "fast cache read failed, treating as miss");
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(snapshot) => {
            debug!(%key, "cache hit");
            Some(snapshot)
        }
        Err(e) => {
            warn!(%key, error = %e, "undecodable snapshot, treating as miss");
            None
        }
    }
}

/// Overwrite a snapshot. Failures are logged; the caller's result does not depend on them.
pub(crate) async fn write_snapshot(
    cache: &dyn FastCache,
    descriptor: BlockDescriptor,
    block: &ResolvedBlock,
    ttl: Duration,
) -> bool {
    let key = special_block_key(descriptor);
    let bytes = match serde_json::to_vec(block) {
        Ok(b) => b,
        Err(e) => {
            warn!(%key, error = %e, "snapshot encode failed");
            return false;
        }
    };
    match cache.set(&key, &bytes, ttl).await {
        Ok(()) => {
            debug!(%key, number = block.block.number, "snapshot written");
            true
        }
        Err(e) => {
            warn!(%key, error = %e, "snapshot write failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_per_pointer() {
        assert_eq!(special_block_key(BlockDescriptor::Latest), "special_block:latest");
        assert_ne!(
            special_block_key(BlockDescriptor::Safe),
            special_block_key(BlockDescriptor::Finalized)
        );
    }

    #[test]
    fn origin_not_found_maps_to_not_found() {
        let e: ResolveError = OriginError::NotFound("block 7".into()).into();
        assert!(e.is_not_found());
        let e: ResolveError = OriginError::Api(503, "busy".into()).into();
        assert!(!e.is_not_found());
    }
}
