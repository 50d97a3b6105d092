//! Scripted origin and a wired-up resolver for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use blockcache::{
    BlockDescriptor, ManualClock, MemoryCache, OriginBlock, OriginError, OriginSource,
    OriginTransaction, ReceiptRecord, ResolverConfig, SqliteStore, TieredResolver,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const T0: i64 = 1_700_000_000_000;

#[derive(Default)]
pub struct MockOrigin {
    blocks: Mutex<HashMap<BlockDescriptor, OriginBlock>>,
    txs: Mutex<HashMap<String, OriginTransaction>>,
    receipts: Mutex<HashMap<String, ReceiptRecord>>,
    delays: Mutex<HashMap<BlockDescriptor, Duration>>,
    failing: Mutex<HashSet<BlockDescriptor>>,
    pub block_calls: AtomicUsize,
    pub tx_calls: AtomicUsize,
    pub receipt_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockOrigin {
    pub fn set_block(&self, descriptor: BlockDescriptor, block: OriginBlock) {
        self.blocks.lock().unwrap().insert(descriptor, block);
    }

    /// Serve `block` for its own number and for `pointer`.
    pub fn set_pointer(&self, pointer: BlockDescriptor, block: OriginBlock) {
        self.set_block(BlockDescriptor::Number(block.number), block.clone());
        self.set_block(pointer, block);
    }

    pub fn set_transaction(&self, tx: OriginTransaction, receipt: ReceiptRecord) {
        self.receipts
            .lock()
            .unwrap()
            .insert(tx.hash.clone(), receipt);
        self.txs.lock().unwrap().insert(tx.hash.clone(), tx);
    }

    /// A transaction that is known but not yet mined.
    pub fn set_pending(&self, tx: OriginTransaction) {
        self.txs.lock().unwrap().insert(tx.hash.clone(), tx);
    }

    pub fn set_receipt(&self, receipt: ReceiptRecord) {
        self.receipts
            .lock()
            .unwrap()
            .insert(receipt.transaction_hash.clone(), receipt);
    }

    pub fn set_delay(&self, descriptor: BlockDescriptor, delay: Duration) {
        self.delays.lock().unwrap().insert(descriptor, delay);
    }

    pub fn set_failing(&self, descriptor: BlockDescriptor) {
        self.failing.lock().unwrap().insert(descriptor);
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn receipt_calls(&self) -> usize {
        self.receipt_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.block_calls() + self.tx_calls.load(Ordering::SeqCst) + self.receipt_calls()
    }
}

#[async_trait]
impl OriginSource for MockOrigin {
    async fn get_block(&self, descriptor: BlockDescriptor) -> Result<OriginBlock, OriginError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(&descriptor).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&descriptor) {
            return Err(OriginError::Api(503, "unavailable".into()));
        }
        self.blocks
            .lock()
            .unwrap()
            .get(&descriptor)
            .cloned()
            .ok_or_else(|| OriginError::NotFound(format!("block {}", descriptor)))
    }

    async fn get_transaction(&self, hash: &str) -> Result<OriginTransaction, OriginError> {
        self.tx_calls.fetch_add(1, Ordering::SeqCst);
        self.txs
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| OriginError::NotFound(format!("transaction {}", hash)))
    }

    async fn get_receipt(&self, hash: &str) -> Result<ReceiptRecord, OriginError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        self.receipts
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| OriginError::NotFound(format!("receipt {}", hash)))
    }
}

pub fn origin_tx(hash: &str) -> OriginTransaction {
    OriginTransaction {
        hash: hash.to_string(),
        value: "1000000000000000000".to_string(),
        gas: 21_000,
        gas_price: "30000000000".to_string(),
        nonce: 0,
        to: Some("0xbeef".to_string()),
    }
}

pub fn origin_block(number: u64, tx_count: usize) -> OriginBlock {
    OriginBlock {
        hash: format!("0xblock{}", number),
        number,
        timestamp: 1_700_000_000 + number,
        nonce: 0,
        transactions: (0..tx_count)
            .map(|i| origin_tx(&format!("0xtx{}_{}", number, i)))
            .collect(),
    }
}

pub fn receipt(hash: &str, block_number: u64) -> ReceiptRecord {
    ReceiptRecord {
        status: 1,
        transaction_hash: hash.to_string(),
        gas_used: 21_000,
        contract_address: None,
        block_number,
        block_hash: format!("0xblock{}", block_number),
        receipt_type: 2,
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub origin: Arc<MockOrigin>,
    pub store: Arc<SqliteStore>,
    pub cache: Arc<MemoryCache>,
    pub resolver: TieredResolver,
}

pub fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(T0));
    let origin = Arc::new(MockOrigin::default());
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let cache = Arc::new(MemoryCache::new(clock.clone()));
    let resolver = TieredResolver::new(
        origin.clone(),
        store.clone(),
        cache.clone(),
        ResolverConfig::default(),
    );
    Harness {
        clock,
        origin,
        store,
        cache,
        resolver,
    }
}
