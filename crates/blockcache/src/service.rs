//! Caller-facing entry points: admission first, then resolution.

use crate::cache::{FastCache, MemoryCache};
use crate::chain::{OriginSource, RpcOrigin};
use crate::clock::{Clock, SystemClock};
use crate::config::ServiceConfig;
use crate::limit::{Admission, LimitError, RateLimiter};
use crate::model::{BlockDescriptor, ReceiptRecord, ResolvedBlock, TransactionRecord};
use crate::refresh::BackgroundRefresher;
use crate::resolve::{ResolveError, TieredResolver};
use crate::store::{PersistentStore, SqliteStore};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("startup: {0}")]
    Startup(String),
}

impl From<ResolveError> for ServiceError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(what) => ServiceError::NotFound(what),
            other => ServiceError::Server(other.to_string()),
        }
    }
}

impl From<LimitError> for ServiceError {
    fn from(e: LimitError) -> Self {
        ServiceError::Server(e.to_string())
    }
}

/// Shared clients plus the refresher task they feed. Built once at startup and
/// torn down with [`ChainService::shutdown`].
pub struct ChainService {
    origin: Arc<dyn OriginSource>,
    cache: Arc<dyn FastCache>,
    resolver: TieredResolver,
    limiter: RateLimiter,
    config: ServiceConfig,
    cancellation: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl ChainService {
    pub fn new(
        origin: Arc<dyn OriginSource>,
        store: Arc<dyn PersistentStore>,
        cache: Arc<dyn FastCache>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
    ) -> Self {
        let resolver = TieredResolver::new(
            origin.clone(),
            store,
            cache.clone(),
            config.resolver.clone(),
        );
        let limiter = RateLimiter::new(cache.clone(), clock, config.limiter.clone());
        Self {
            origin,
            cache,
            resolver,
            limiter,
            config,
            cancellation: CancellationToken::new(),
            refresher: Mutex::new(None),
        }
    }

    /// Open the JSON-RPC origin, the SQLite store and an in-process cache.
    pub fn open(config: ServiceConfig) -> Result<Self, ServiceError> {
        config
            .validate()
            .map_err(|e| ServiceError::Startup(e.to_string()))?;
        let origin = RpcOrigin::new(config.rpc.clone())
            .map_err(|e| ServiceError::Startup(e.to_string()))?;
        let store = SqliteStore::open(&config.db_path)
            .map_err(|e| ServiceError::Startup(e.to_string()))?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = Arc::new(MemoryCache::with_config(clock.clone(), &config.cache));
        info!(rpc = %config.rpc.url, db = %config.db_path.display(), "service opened");
        Ok(Self::new(
            Arc::new(origin),
            Arc::new(store),
            cache,
            clock,
            config,
        ))
    }

    /// Spawn the special block refresher. Calling it twice is a no-op.
    pub fn start_refresher(&self) {
        let mut slot = match self.refresher.lock() {
            Ok(slot) => slot,
            Err(e) => {
                warn!(error = %e, "refresher handle poisoned");
                return;
            }
        };
        if slot.is_some() {
            return;
        }
        let refresher = BackgroundRefresher::new(
            self.origin.clone(),
            self.cache.clone(),
            self.config.refresher.clone(),
            self.cancellation.child_token(),
        );
        *slot = Some(refresher.spawn());
    }

    /// Stop the refresher and wait for it to exit.
    pub async fn shutdown(&self) {
        self.cancellation.cancel();
        let handle = self.refresher.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "refresher task ended abnormally");
            }
        }
        info!("service shut down");
    }

    /// Whether [`ChainService::shutdown`] has begun.
    pub fn is_shut_down(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn resolver(&self) -> &TieredResolver {
        &self.resolver
    }

    async fn admit(&self, identity: &str) -> Result<(), ServiceError> {
        match self.limiter.admit(identity).await? {
            Admission::Allowed => Ok(()),
            Admission::Rejected => Err(ServiceError::RateLimited(identity.to_string())),
        }
    }

    pub async fn block(
        &self,
        identity: &str,
        descriptor: BlockDescriptor,
        include_transactions: bool,
    ) -> Result<ResolvedBlock, ServiceError> {
        self.admit(identity).await?;
        Ok(self
            .resolver
            .resolve_block(descriptor, include_transactions)
            .await?)
    }

    pub async fn transaction(
        &self,
        identity: &str,
        hash: &str,
    ) -> Result<TransactionRecord, ServiceError> {
        self.admit(identity).await?;
        Ok(self.resolver.resolve_transaction(hash).await?)
    }

    pub async fn receipt(&self, identity: &str, hash: &str) -> Result<ReceiptRecord, ServiceError> {
        self.admit(identity).await?;
        Ok(self.resolver.resolve_receipt(hash).await?)
    }
}
