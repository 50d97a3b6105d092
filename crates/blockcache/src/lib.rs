//! blockcache: serve blocks, transactions and receipts without hammering the node.
//!
//! Lookups go fast cache → SQLite → JSON-RPC origin and write results back down
//! the tiers. Callers are admitted through a per-identity sliding window, and a
//! background task keeps the latest/finalized/safe snapshots warm.

pub mod cache;
pub mod chain;
pub mod clock;
pub mod config;
pub mod limit;
pub mod model;
pub mod refresh;
pub mod resolve;
pub mod service;
pub mod store;

pub use cache::{CacheConfig, CacheError, FastCache, MemoryCache};
pub use chain::{FetchConfig, OriginBlock, OriginError, OriginSource, OriginTransaction, RpcOrigin};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ServiceConfig};
pub use limit::{Admission, FailurePolicy, LimitError, LimiterConfig, RateLimiter};
pub use model::{
    BlockDescriptor, BlockRecord, DescriptorError, ReceiptRecord, ResolvedBlock,
    TransactionRecord,
};
pub use refresh::{BackgroundRefresher, RefresherConfig, RefresherState};
pub use resolve::{special_block_key, ResolveError, ResolverConfig, TieredResolver};
pub use service::{ChainService, ServiceError};
pub use store::{InsertOutcome, PersistentStore, SqliteStore, StoreError};
