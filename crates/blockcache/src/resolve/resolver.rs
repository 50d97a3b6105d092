//! The resolver. No request coalescing: concurrent misses on the same key each
//! reach the origin, and their duplicate write-backs are absorbed by the store's
//! unique keys.

use crate::cache::FastCache;
use crate::chain::{OriginBlock, OriginSource};
use crate::model::{
    normalize_hash, BlockDescriptor, BlockRecord, ReceiptRecord, ResolvedBlock, TransactionRecord,
};
use crate::resolve::{read_snapshot, write_snapshot, ResolveError, ResolverConfig};
use crate::store::{InsertOutcome, PersistentStore, StoreError};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn log_write_back(what: &str, key: &str, res: Result<InsertOutcome, StoreError>) {
    match res {
        Ok(InsertOutcome::Inserted) => debug!(what, key, "persisted"),
        Ok(InsertOutcome::Conflict) => debug!(what, key, "already persisted by another writer"),
        Err(e) => warn!(what, key, error = %e, "write-back failed"),
    }
}

#[derive(Clone)]
pub struct TieredResolver {
    origin: Arc<dyn OriginSource>,
    store: Arc<dyn PersistentStore>,
    cache: Arc<dyn FastCache>,
    config: ResolverConfig,
}

impl TieredResolver {
    pub fn new(
        origin: Arc<dyn OriginSource>,
        store: Arc<dyn PersistentStore>,
        cache: Arc<dyn FastCache>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            origin,
            store,
            cache,
            config,
        }
    }

    async fn stored_block(&self, number: u64) -> Option<BlockRecord> {
        match self.store.get_block(number).await {
            Ok(found) => found,
            Err(e) => {
                warn!(number, error = %e, "store read failed, treating as miss");
                None
            }
        }
    }

    /// Resolve a block, with its transactions when `include_transactions` is set.
    pub async fn resolve_block(
        &self,
        descriptor: BlockDescriptor,
        include_transactions: bool,
    ) -> Result<ResolvedBlock, ResolveError> {
        let hit = match descriptor {
            BlockDescriptor::Number(n) => self.stored_block(n).await.map(ResolvedBlock::bare),
            special => read_snapshot(self.cache.as_ref(), special).await,
        };

        if let Some(mut resolved) = hit {
            if !include_transactions {
                resolved.transactions = None;
            } else if resolved.transactions.is_none() {
                let txs = self
                    .reconcile(resolved.block.number, resolved.block.transaction_count, None)
                    .await?;
                resolved.transactions = Some(txs);
            }
            return Ok(resolved);
        }

        let fetched = self.origin.get_block(descriptor).await?;
        let record = fetched.record();
        info!(%descriptor, number = record.number, "block resolved from origin");
        log_write_back(
            "block",
            &record.number.to_string(),
            self.store.insert_block(&record).await,
        );

        let (number, declared) = (record.number, record.transaction_count);
        let mut resolved = ResolvedBlock::bare(record);
        if include_transactions {
            resolved.transactions = Some(self.reconcile(number, declared, Some(fetched)).await?);
        }
        if descriptor.is_special() {
            write_snapshot(
                self.cache.as_ref(),
                descriptor,
                &resolved,
                self.config.special_ttl(),
            )
            .await;
        }
        Ok(resolved)
    }

    /// Transactions of a block, repaired from origin whenever the stored row
    /// count differs from `declared_count`.
    pub async fn resolve_transactions(
        &self,
        block_number: u64,
        declared_count: u64,
    ) -> Result<Vec<TransactionRecord>, ResolveError> {
        self.reconcile(block_number, declared_count, None).await
    }

    async fn reconcile(
        &self,
        block_number: u64,
        declared_count: u64,
        fetched: Option<OriginBlock>,
    ) -> Result<Vec<TransactionRecord>, ResolveError> {
        if declared_count == 0 {
            return Ok(Vec::new());
        }
        match self.store.count_transactions(block_number).await {
            Ok(count) if count == declared_count => {
                match self.store.transactions_for_block(block_number).await {
                    Ok(rows) => return Ok(rows),
                    Err(e) => warn!(block_number, error = %e, "store read failed, refetching"),
                }
            }
            Ok(count) => debug!(block_number, count, declared_count, "transaction rows stale"),
            Err(e) => warn!(block_number, error = %e, "store count failed, refetching"),
        }

        let block = match fetched {
            Some(block) => block,
            None => {
                self.origin
                    .get_block(BlockDescriptor::Number(block_number))
                    .await?
            }
        };
        let txs = block.into_transaction_records();
        self.store
            .replace_block_transactions(block_number, &txs)
            .await?;
        info!(block_number, count = txs.len(), "transactions reconciled");
        Ok(txs)
    }

    /// Resolve a mined transaction. The owning block comes from its receipt,
    /// which is persisted alongside.
    pub async fn resolve_transaction(&self, hash: &str) -> Result<TransactionRecord, ResolveError> {
        let hash = normalize_hash(hash);
        match self.store.get_transaction(&hash).await {
            Ok(Some(tx)) => return Ok(tx),
            Ok(None) => {}
            Err(e) => warn!(%hash, error = %e, "store read failed, treating as miss"),
        }

        let tx = self.origin.get_transaction(&hash).await?;
        let receipt = self.origin.get_receipt(&hash).await?;
        let record = tx.into_record(receipt.block_number);
        log_write_back("transaction", &hash, self.store.insert_transaction(&record).await);
        log_write_back("receipt", &hash, self.store.insert_receipt(&receipt).await);
        Ok(record)
    }

    pub async fn resolve_receipt(&self, hash: &str) -> Result<ReceiptRecord, ResolveError> {
        let hash = normalize_hash(hash);
        match self.store.get_receipt(&hash).await {
            Ok(Some(r)) => return Ok(r),
            Ok(None) => {}
            Err(e) => warn!(%hash, error = %e, "store read failed, treating as miss"),
        }

        let receipt = self.origin.get_receipt(&hash).await?;
        log_write_back("receipt", &hash, self.store.insert_receipt(&receipt).await);
        Ok(receipt)
    }
}
