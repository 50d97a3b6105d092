//! SQLite-backed persistent store.

use crate::model::{BlockRecord, ReceiptRecord, TransactionRecord};
use crate::store::{InsertOutcome, PersistentStore, StoreError};
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS blocks (
        number INTEGER PRIMARY KEY,
        hash TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        nonce INTEGER NOT NULL,
        transaction_count INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS transactions (
        hash TEXT PRIMARY KEY,
        block_number INTEGER NOT NULL,
        value TEXT NOT NULL,
        gas INTEGER NOT NULL,
        gas_price TEXT NOT NULL,
        nonce INTEGER NOT NULL,
        to_address TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_tx_block ON transactions(block_number);
    CREATE TABLE IF NOT EXISTS receipts (
        transaction_hash TEXT PRIMARY KEY,
        status INTEGER NOT NULL,
        gas_used INTEGER NOT NULL,
        contract_address TEXT,
        block_number INTEGER NOT NULL,
        block_hash TEXT NOT NULL,
        receipt_type INTEGER NOT NULL
    );
"#;

// SQLite integers are signed; u64 columns round-trip through a bit cast.
fn to_sql(v: u64) -> i64 {
    v as i64
}

fn from_sql(v: i64) -> u64 {
    v as u64
}

fn is_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn insert_outcome(res: rusqlite::Result<usize>) -> Result<InsertOutcome, StoreError> {
    match res {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(e) if is_conflict(&e) => Ok(InsertOutcome::Conflict),
        Err(e) => Err(e.into()),
    }
}

fn row_to_block(r: &Row<'_>) -> rusqlite::Result<BlockRecord> {
    Ok(BlockRecord {
        number: from_sql(r.get(0)?),
        hash: r.get(1)?,
        timestamp: from_sql(r.get(2)?),
        nonce: from_sql(r.get(3)?),
        transaction_count: from_sql(r.get(4)?),
    })
}

fn row_to_transaction(r: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        hash: r.get(0)?,
        block_number: from_sql(r.get(1)?),
        value: r.get(2)?,
        gas: from_sql(r.get(3)?),
        gas_price: r.get(4)?,
        nonce: from_sql(r.get(5)?),
        to: r.get(6)?,
    })
}

fn row_to_receipt(r: &Row<'_>) -> rusqlite::Result<ReceiptRecord> {
    Ok(ReceiptRecord {
        transaction_hash: r.get(0)?,
        status: from_sql(r.get(1)?),
        gas_used: from_sql(r.get(2)?),
        contract_address: r.get(3)?,
        block_number: from_sql(r.get(4)?),
        block_hash: r.get(5)?,
        receipt_type: r.get(6)?,
    })
}

const TX_COLUMNS: &str = "hash, block_number, value, gas, gas_price, nonce, to_address";

fn insert_tx_stmt(conn: &Connection, tx: &TransactionRecord, replace: bool) -> rusqlite::Result<usize> {
    let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
    conn.execute(
        &format!(
            "{} INTO transactions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            verb, TX_COLUMNS
        ),
        params![
            tx.hash,
            to_sql(tx.block_number),
            tx.value,
            to_sql(tx.gas),
            tx.gas_price,
            to_sql(tx.nonce),
            tx.to,
        ],
    )
}

/// Single-connection SQLite store. Statements are short, so one mutex-guarded
/// connection serves all tasks.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`. Creates parent dirs if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()).into())
    }
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn get_block(&self, number: u64) -> Result<Option<BlockRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT number, hash, timestamp, nonce, transaction_count FROM blocks WHERE number = ?1",
                [to_sql(number)],
                row_to_block,
            )
            .optional()?;
        Ok(row)
    }

    async fn insert_block(&self, block: &BlockRecord) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn()?;
        insert_outcome(conn.execute(
            "INSERT INTO blocks (number, hash, timestamp, nonce, transaction_count) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                to_sql(block.number),
                block.hash,
                to_sql(block.timestamp),
                to_sql(block.nonce),
                to_sql(block.transaction_count),
            ],
        ))
    }

    async fn count_transactions(&self, block_number: u64) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE block_number = ?1",
            [to_sql(block_number)],
            |r| r.get(0),
        )?;
        Ok(from_sql(count))
    }

    async fn transactions_for_block(
        &self,
        block_number: u64,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE block_number = ?1 ORDER BY rowid",
            TX_COLUMNS
        ))?;
        let rows = stmt
            .query_map([to_sql(block_number)], row_to_transaction)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn replace_block_transactions(
        &self,
        block_number: u64,
        txs: &[TransactionRecord],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction()?;
        db_tx.execute(
            "DELETE FROM transactions WHERE block_number = ?1",
            [to_sql(block_number)],
        )?;
        for tx in txs {
            // A hash may still sit under another height after a reorg.
            insert_tx_stmt(&db_tx, tx, true)?;
        }
        db_tx.commit()?;
        Ok(())
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM transactions WHERE hash = ?1", TX_COLUMNS),
                [hash],
                row_to_transaction,
            )
            .optional()?;
        Ok(row)
    }

    async fn insert_transaction(
        &self,
        tx: &TransactionRecord,
    ) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn()?;
        insert_outcome(insert_tx_stmt(&conn, tx, false))
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<ReceiptRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT transaction_hash, status, gas_used, contract_address, block_number, block_hash, receipt_type
                 FROM receipts WHERE transaction_hash = ?1",
                [tx_hash],
                row_to_receipt,
            )
            .optional()?;
        Ok(row)
    }

    async fn insert_receipt(&self, receipt: &ReceiptRecord) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn()?;
        insert_outcome(conn.execute(
            "INSERT INTO receipts (transaction_hash, status, gas_used, contract_address, block_number, block_hash, receipt_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                receipt.transaction_hash,
                to_sql(receipt.status),
                to_sql(receipt.gas_used),
                receipt.contract_address,
                to_sql(receipt.block_number),
                receipt.block_hash,
                receipt.receipt_type,
            ],
        ))
    }
}
