//! The authoritative, slow data source behind every cache tier.

use crate::chain::quantity::QuantityError;
use crate::model::{BlockDescriptor, BlockRecord, ReceiptRecord, TransactionRecord};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OriginError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error: status {0} body {1}")]
    Api(u16, String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("quantity: {0}")]
    Quantity(#[from] QuantityError),
}

impl OriginError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OriginError::NotFound(_))
    }
}

/// A transaction as reported by the origin, before it is tied to a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginTransaction {
    pub hash: String,
    pub value: String,
    pub gas: u64,
    pub gas_price: String,
    pub nonce: u64,
    pub to: Option<String>,
}

impl OriginTransaction {
    pub fn into_record(self, block_number: u64) -> TransactionRecord {
        TransactionRecord {
            hash: self.hash,
            value: self.value,
            gas: self.gas,
            gas_price: self.gas_price,
            nonce: self.nonce,
            to: self.to,
            block_number,
        }
    }
}

/// A block with its full transaction bodies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginBlock {
    pub hash: String,
    pub number: u64,
    pub timestamp: u64,
    pub nonce: u64,
    pub transactions: Vec<OriginTransaction>,
}

impl OriginBlock {
    pub fn record(&self) -> BlockRecord {
        BlockRecord {
            hash: self.hash.clone(),
            number: self.number,
            timestamp: self.timestamp,
            nonce: self.nonce,
            transaction_count: self.transactions.len() as u64,
        }
    }

    pub fn into_transaction_records(self) -> Vec<TransactionRecord> {
        let number = self.number;
        self.transactions
            .into_iter()
            .map(|tx| tx.into_record(number))
            .collect()
    }
}

#[async_trait]
pub trait OriginSource: Send + Sync {
    async fn get_block(&self, descriptor: BlockDescriptor) -> Result<OriginBlock, OriginError>;

    async fn get_transaction(&self, hash: &str) -> Result<OriginTransaction, OriginError>;

    async fn get_receipt(&self, hash: &str) -> Result<ReceiptRecord, OriginError>;
}
