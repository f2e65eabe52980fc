//! SQLite-backed receipt store.
//!
//! The database is the durable source of truth for a chain: an append is
//! acknowledged only after the row is committed, and `load_all` replays the
//! full chain in sequence order so the ledger can recover its head on open.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::error::{LatticeError, LatticeResult};
use crate::ledger::store::ReceiptStore;
use crate::types::Receipt;

/// Newtype wrapping `Connection` in a `Mutex` so the store is both `Send`
/// **and** `Sync`. `rusqlite::Connection` is `Send` but not `Sync`;
/// `Mutex<T>: Sync` whenever `T: Send`.
struct DbConn(Mutex<Connection>);

impl std::fmt::Debug for DbConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DbConn(<sqlite>)")
    }
}

/// DDL for the `receipts` table and its indices.
///
/// `sequence` is the primary key: the chain position is the identity of a
/// row. The UNIQUE cid index rejects the same receipt landing twice.
const CREATE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS receipts (
    sequence     INTEGER PRIMARY KEY,
    cid          TEXT    NOT NULL UNIQUE,
    prev_cid     TEXT    NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    source_id    TEXT    NOT NULL,
    payload      TEXT    NOT NULL,
    content_hash TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_receipts_source_id ON receipts(source_id);
CREATE INDEX IF NOT EXISTS idx_receipts_timestamp ON receipts(timestamp_ms);
";

#[derive(Debug)]
pub struct SqliteReceiptStore {
    conn: DbConn,
}

impl SqliteReceiptStore {
    /// Open (or create) a receipt database at `path`. Schema creation is
    /// idempotent; parent directories are created as needed.
    pub fn open(path: &Path) -> LatticeResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LatticeError::Storage(format!("failed to create receipt db dir: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| LatticeError::Storage(format!("failed to open receipt db: {}", e)))?;

        // WAL for concurrent readers; synchronous=FULL so a committed append
        // is on disk before we acknowledge it.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .ok();

        conn.execute_batch(CREATE_SCHEMA_SQL)
            .map_err(|e| LatticeError::Storage(format!("failed to initialise schema: {}", e)))?;

        log::info!("[SqliteReceiptStore] Opened receipt db at {}", path.display());

        Ok(Self {
            conn: DbConn(Mutex::new(conn)),
        })
    }
}

fn receipt_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Receipt, String)> {
    let sequence: i64 = row.get(0)?;
    let cid: String = row.get(1)?;
    let prev_cid: String = row.get(2)?;
    let timestamp_ms: i64 = row.get(3)?;
    let source_id: String = row.get(4)?;
    let payload_json: String = row.get(5)?;
    let content_hash: String = row.get(6)?;
    Ok((
        Receipt {
            cid,
            prev_cid,
            sequence: sequence as u64,
            timestamp_ms: timestamp_ms as u64,
            source_id,
            // placeholder; parsed by the caller so serde errors surface as
            // LatticeError rather than rusqlite::Error
            payload: serde_json::Value::Null,
            content_hash,
        },
        payload_json,
    ))
}

impl ReceiptStore for SqliteReceiptStore {
    fn append(&self, receipt: &Receipt) -> LatticeResult<()> {
        let payload_json = serde_json::to_string(&receipt.payload)?;
        let conn = self
            .conn
            .0
            .lock()
            .map_err(|_| LatticeError::Storage("connection lock poisoned".to_string()))?;

        let next: i64 = conn
            .query_row("SELECT COALESCE(MAX(sequence) + 1, 0) FROM receipts", [], |row| {
                row.get(0)
            })
            .map_err(|e| LatticeError::Storage(format!("failed to read chain length: {}", e)))?;
        if receipt.sequence != next as u64 {
            return Err(LatticeError::Storage(format!(
                "sequence {} does not extend store of length {}",
                receipt.sequence, next
            )));
        }

        conn.execute(
            "INSERT INTO receipts \
             (sequence, cid, prev_cid, timestamp_ms, source_id, payload, content_hash) \
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                receipt.sequence as i64,
                receipt.cid,
                receipt.prev_cid,
                receipt.timestamp_ms as i64,
                receipt.source_id,
                payload_json,
                receipt.content_hash,
            ],
        )
        .map_err(|e| LatticeError::Storage(format!("failed to INSERT receipt: {}", e)))?;

        Ok(())
    }

    fn load_all(&self) -> LatticeResult<Vec<Receipt>> {
        let conn = self
            .conn
            .0
            .lock()
            .map_err(|_| LatticeError::Storage("connection lock poisoned".to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT sequence, cid, prev_cid, timestamp_ms, source_id, payload, content_hash \
                 FROM receipts ORDER BY sequence ASC",
            )
            .map_err(|e| LatticeError::Storage(format!("failed to prepare load: {}", e)))?;

        let rows = stmt
            .query_map([], receipt_from_row)
            .map_err(|e| LatticeError::Storage(format!("failed to query receipts: {}", e)))?;

        let mut receipts = Vec::new();
        for row in rows {
            let (mut receipt, payload_json) =
                row.map_err(|e| LatticeError::Storage(format!("failed to read row: {}", e)))?;
            receipt.payload = serde_json::from_str(&payload_json)?;
            receipts.push(receipt);
        }
        Ok(receipts)
    }
}
