//! Keeps the latest, finalized and safe snapshots warm in the fast cache.
//!
//! One recurring task. Each tick fetches the three pointers concurrently from
//! the origin (special blocks bypass the persistent store) and overwrites their
//! snapshots. A tick finishes before the next one may start; ticks missed while
//! a slow fetch was in flight are skipped rather than replayed.

use crate::cache::FastCache;
use crate::chain::OriginSource;
use crate::model::{BlockDescriptor, ResolvedBlock};
use crate::resolve::write_snapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INTERVAL_SECS: u64 = 60;
const TTL_SECS: u64 = 60;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefresherConfig {
    pub interval_secs: u64,
    /// Snapshot lifetime; matches the resolver's special TTL by default.
    pub ttl_secs: u64,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            interval_secs: INTERVAL_SECS,
            ttl_secs: TTL_SECS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefresherState {
    Idle,
    Fetching,
}

pub struct BackgroundRefresher {
    origin: Arc<dyn OriginSource>,
    cache: Arc<dyn FastCache>,
    config: RefresherConfig,
    cancellation: CancellationToken,
    state: watch::Sender<RefresherState>,
}

impl BackgroundRefresher {
    pub fn new(
        origin: Arc<dyn OriginSource>,
        cache: Arc<dyn FastCache>,
        config: RefresherConfig,
        cancellation: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(RefresherState::Idle);
        Self {
            origin,
            cache,
            config,
            cancellation,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RefresherState> {
        self.state.subscribe()
    }

    async fn refresh_pointer(&self, descriptor: BlockDescriptor) -> bool {
        match self.origin.get_block(descriptor).await {
            Ok(block) => {
                let snapshot = ResolvedBlock::bare(block.record());
                let ttl = Duration::from_secs(self.config.ttl_secs);
                write_snapshot(self.cache.as_ref(), descriptor, &snapshot, ttl).await
            }
            Err(e) => {
                warn!(%descriptor, error = %e, "special block refresh failed");
                false
            }
        }
    }

    /// Run a single tick. Returns how many pointers were refreshed.
    pub async fn refresh_once(&self) -> usize {
        self.state.send_replace(RefresherState::Fetching);
        let [a, b, c] = BlockDescriptor::SPECIAL;
        let (a, b, c) = tokio::join!(
            self.refresh_pointer(a),
            self.refresh_pointer(b),
            self.refresh_pointer(c)
        );
        self.state.send_replace(RefresherState::Idle);
        [a, b, c].into_iter().filter(|ok| *ok).count()
    }

    /// Tick until cancelled. The first tick fires immediately.
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.config.interval_secs, "starting special block refresher");

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.cancellation.cancelled() => break,
                        refreshed = self.refresh_once() => {
                            debug!(refreshed, "refresh tick complete");
                        }
                    }
                }
            }
        }
        self.state.send_replace(RefresherState::Idle);
        info!("special block refresher stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}
