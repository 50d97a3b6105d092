//! Durable keyed storage for resolved blocks, transactions and receipts.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::model::{BlockRecord, ReceiptRecord, TransactionRecord};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a create on a unique key. A conflict means a concurrent writer
/// stored the same entity first, which callers treat as success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get_block(&self, number: u64) -> Result<Option<BlockRecord>, StoreError>;

    async fn insert_block(&self, block: &BlockRecord) -> Result<InsertOutcome, StoreError>;

    async fn count_transactions(&self, block_number: u64) -> Result<u64, StoreError>;

    async fn transactions_for_block(
        &self,
        block_number: u64,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Atomically delete every transaction row of `block_number` and insert `txs`.
    async fn replace_block_transactions(
        &self,
        block_number: u64,
        txs: &[TransactionRecord],
    ) -> Result<(), StoreError>;

    async fn get_transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, StoreError>;

    async fn insert_transaction(
        &self,
        tx: &TransactionRecord,
    ) -> Result<InsertOutcome, StoreError>;

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<ReceiptRecord>, StoreError>;

    async fn insert_receipt(&self, receipt: &ReceiptRecord) -> Result<InsertOutcome, StoreError>;
}
