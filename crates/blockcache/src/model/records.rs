//! Persisted block, transaction and receipt rows.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub hash: String,
    pub number: u64,
    pub timestamp: u64,
    pub nonce: u64,
    /// Declared transaction count; the stored transaction rows must match it.
    pub transaction_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    /// Wei, decimal.
    pub value: String,
    pub gas: u64,
    /// Wei, decimal.
    pub gas_price: String,
    pub nonce: u64,
    /// `None` for contract creation.
    pub to: Option<String>,
    pub block_number: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRecord {
    pub status: u64,
    pub transaction_hash: String,
    pub gas_used: u64,
    pub contract_address: Option<String>,
    pub block_number: u64,
    pub block_hash: String,
    pub receipt_type: u8,
}

/// A block as returned to callers and as snapshotted into the fast cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBlock {
    #[serde(flatten)]
    pub block: BlockRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<TransactionRecord>>,
}

impl ResolvedBlock {
    pub fn bare(block: BlockRecord) -> Self {
        Self {
            block,
            transactions: None,
        }
    }
}

/// Canonical key form for transaction hashes.
pub fn normalize_hash(hash: &str) -> String {
    hash.trim().to_ascii_lowercase()
}
