//! Ethereum JSON-RPC origin client with request pacing and retries.

use crate::chain::origin::{OriginBlock, OriginError, OriginSource, OriginTransaction};
use crate::chain::quantity::{parse_quantity, parse_quantity_u128};
use crate::model::{normalize_hash, BlockDescriptor, ReceiptRecord};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
const RATE_LIMIT_MS: u64 = 200;
const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 500;
const TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub url: String,
    /// Minimum spacing between two requests to the node.
    pub rate_limit_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            rate_limit_ms: RATE_LIMIT_MS,
            max_retries: MAX_RETRIES,
            retry_backoff_ms: RETRY_BACKOFF_MS,
            timeout_secs: TIMEOUT_SECS,
        }
    }
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: String,
    pub value: String,
    pub gas: String,
    pub gas_price: Option<String>,
    pub nonce: String,
    pub to: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub hash: Option<String>,
    pub number: Option<String>,
    pub timestamp: String,
    pub nonce: Option<String>,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub status: Option<String>,
    pub transaction_hash: String,
    pub gas_used: String,
    pub contract_address: Option<String>,
    pub block_number: String,
    pub block_hash: String,
    #[serde(rename = "type")]
    pub tx_type: Option<String>,
}

/// Decode a JSON-RPC envelope. A `null` result is reported as `NotFound(what)`.
pub(crate) fn decode_response<T: DeserializeOwned>(
    body: &str,
    what: &str,
) -> Result<T, OriginError> {
    let envelope: RpcResponse =
        serde_json::from_str(body).map_err(|e| OriginError::Decode(e.to_string()))?;
    if let Some(err) = envelope.error {
        return Err(OriginError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    match envelope.result {
        None | Some(serde_json::Value::Null) => Err(OriginError::NotFound(what.to_string())),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| OriginError::Decode(format!("{}: {}", what, e))),
    }
}

impl TryFrom<RpcTransaction> for OriginTransaction {
    type Error = OriginError;

    fn try_from(tx: RpcTransaction) -> Result<Self, Self::Error> {
        let gas_price = match tx.gas_price.as_deref() {
            Some(p) => parse_quantity_u128(p)?,
            None => 0,
        };
        Ok(Self {
            hash: normalize_hash(&tx.hash),
            value: parse_quantity_u128(&tx.value)?.to_string(),
            gas: parse_quantity(&tx.gas)?,
            gas_price: gas_price.to_string(),
            nonce: parse_quantity(&tx.nonce)?,
            to: tx.to.map(|t| normalize_hash(&t)),
        })
    }
}

impl TryFrom<RpcBlock> for OriginBlock {
    type Error = OriginError;

    fn try_from(block: RpcBlock) -> Result<Self, Self::Error> {
        let (Some(hash), Some(number)) = (block.hash, block.number) else {
            return Err(OriginError::Decode("block is still pending".to_string()));
        };
        let transactions = block
            .transactions
            .into_iter()
            .map(OriginTransaction::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            hash: normalize_hash(&hash),
            number: parse_quantity(&number)?,
            timestamp: parse_quantity(&block.timestamp)?,
            nonce: block.nonce.as_deref().map(parse_quantity).transpose()?.unwrap_or(0),
            transactions,
        })
    }
}

impl TryFrom<RpcReceipt> for ReceiptRecord {
    type Error = OriginError;

    fn try_from(r: RpcReceipt) -> Result<Self, Self::Error> {
        let receipt_type = r.tx_type.as_deref().map(parse_quantity).transpose()?.unwrap_or(0);
        Ok(Self {
            status: r.status.as_deref().map(parse_quantity).transpose()?.unwrap_or(0),
            transaction_hash: normalize_hash(&r.transaction_hash),
            gas_used: parse_quantity(&r.gas_used)?,
            contract_address: r.contract_address.map(|a| normalize_hash(&a)),
            block_number: parse_quantity(&r.block_number)?,
            block_hash: normalize_hash(&r.block_hash),
            receipt_type: u8::try_from(receipt_type)
                .map_err(|_| OriginError::Decode(format!("receipt type {}", receipt_type)))?,
        })
    }
}

/// JSON-RPC client for an Ethereum node.
pub struct RpcOrigin {
    config: FetchConfig,
    client: reqwest::Client,
    last_request: Mutex<Option<OffsetDateTime>>,
    next_id: AtomicU64,
    request_count: AtomicU64,
}

impl RpcOrigin {
    pub fn new(config: FetchConfig) -> Result<Self, OriginError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            last_request: Mutex::new(None),
            next_id: AtomicU64::new(1),
            request_count: AtomicU64::new(0),
        })
    }

    /// Hold requests back so consecutive calls are at least `rate_limit_ms` apart.
    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = (OffsetDateTime::now_utc() - prev).whole_milliseconds();
            let need: i128 = self.config.rate_limit_ms as i128;
            if elapsed < need {
                let ms = (need - elapsed).max(0) as u64;
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        *last = Some(OffsetDateTime::now_utc());
    }

    /// Exponential backoff before retry `attempt + 1`, saturating at `u64::MAX` ms.
    fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.config.retry_backoff_ms.saturating_mul(factor)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        what: &str,
    ) -> Result<T, OriginError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            self.rate_limit().await;
            match self.client.post(&self.config.url).json(&body).send().await {
                Ok(r) => {
                    let status = r.status();
                    let text = r.text().await.unwrap_or_default();
                    if !status.is_success() {
                        last_err = Some(OriginError::Api(status.as_u16(), text));
                        if attempt < self.config.max_retries {
                            let ms = self.backoff_ms(attempt);
                            warn!(method, status = status.as_u16(), ms, "retry after status");
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                        }
                        continue;
                    }
                    self.request_count.fetch_add(1, Ordering::Relaxed);
                    debug!(method, what, "rpc response");
                    return decode_response(&text, what);
                }
                Err(e) => {
                    last_err = Some(OriginError::Request(e));
                    if attempt < self.config.max_retries {
                        let ms = self.backoff_ms(attempt);
                        warn!(method, attempt, ms, "retry after error");
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(OriginError::Api(0, "unknown".to_string())))
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OriginSource for RpcOrigin {
    async fn get_block(&self, descriptor: BlockDescriptor) -> Result<OriginBlock, OriginError> {
        let what = format!("block {}", descriptor);
        let params = serde_json::json!([descriptor.to_rpc_param(), true]);
        let raw: RpcBlock = self.call("eth_getBlockByNumber", params, &what).await?;
        let block = OriginBlock::try_from(raw)?;
        info!(%descriptor, number = block.number, txs = block.transactions.len(), "fetched block");
        Ok(block)
    }

    async fn get_transaction(&self, hash: &str) -> Result<OriginTransaction, OriginError> {
        let what = format!("transaction {}", hash);
        let params = serde_json::json!([hash]);
        let raw: RpcTransaction = self.call("eth_getTransactionByHash", params, &what).await?;
        OriginTransaction::try_from(raw)
    }

    async fn get_receipt(&self, hash: &str) -> Result<ReceiptRecord, OriginError> {
        let what = format!("receipt {}", hash);
        let params = serde_json::json!([hash]);
        let raw: RpcReceipt = self.call("eth_getTransactionReceipt", params, &what).await?;
        ReceiptRecord::try_from(raw)
    }
}
