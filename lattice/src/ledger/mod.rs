//! Append-only, hash-chained receipt ledger.
//!
//! Every receipt is content-addressed and chained to its predecessor, so the
//! whole history can be re-verified after the fact and any tampering
//! localized to a sequence number. The ledger keeps an in-memory mirror of
//! the chain for queries; a [`ReceiptStore`] backend makes appends durable.
//!
//! Concurrency: an extension lock admits appenders one at a time and is held
//! across the durable write; a separate state lock guards the published
//! mirror and is held only for pointer updates and reads. Queries and
//! verification therefore run concurrently with appends and always see a
//! consistent prefix of the chain.

pub mod store;
pub mod store_sqlite;

pub use store::{InMemoryReceiptStore, ReceiptStore};
pub use store_sqlite::SqliteReceiptStore;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cid::{self, Cid};
use crate::error::{LatticeError, LatticeResult};
use crate::types::{now_ms, Receipt, ReceiptQuery};

/// Snapshot summary of a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub receipts: u64,
    pub head: Cid,
    /// Receipt count per source id.
    pub sources: BTreeMap<String, u64>,
}

struct ChainState {
    receipts: Vec<Receipt>,
    head: Cid,
}

pub struct ReceiptLedger {
    store: Box<dyn ReceiptStore>,
    genesis: Cid,
    /// Admits appenders one at a time; held across the durable write so the
    /// chain cannot fork.
    extend: Mutex<()>,
    /// Published chain mirror; write-held only to advance the head.
    state: RwLock<ChainState>,
}

impl std::fmt::Debug for ReceiptLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (len, head) = match self.state.read() {
            Ok(state) => (state.receipts.len(), state.head.clone()),
            Err(_) => (0, "<poisoned>".to_string()),
        };
        f.debug_struct("ReceiptLedger")
            .field("receipts", &len)
            .field("head", &head)
            .finish()
    }
}

impl ReceiptLedger {
    /// Ephemeral ledger over the in-memory store and the default genesis
    /// sentinel.
    pub fn in_memory() -> Self {
        Self::in_memory_with_genesis(cid::genesis_cid())
    }

    /// Ephemeral ledger anchored at a caller-supplied sentinel.
    pub fn in_memory_with_genesis(genesis: impl Into<Cid>) -> Self {
        let genesis = genesis.into();
        Self {
            store: Box::new(InMemoryReceiptStore::new()),
            extend: Mutex::new(()),
            state: RwLock::new(ChainState {
                receipts: Vec::new(),
                head: genesis.clone(),
            }),
            genesis,
        }
    }

    /// Open a ledger over an arbitrary store, replaying persisted receipts
    /// to recover the head. The loaded chain is re-verified; a corrupt
    /// store fails open with [`LatticeError::ChainCorruption`].
    pub fn open(store: Box<dyn ReceiptStore>, genesis: impl Into<Cid>) -> LatticeResult<Self> {
        let genesis = genesis.into();
        let receipts = store.load_all()?;
        verify_receipts(&receipts, &genesis, 0, receipts.len())?;
        let head = receipts
            .last()
            .map(|r| r.cid.clone())
            .unwrap_or_else(|| genesis.clone());
        if !receipts.is_empty() {
            log::info!(
                "[ReceiptLedger] Restored chain of {} receipts, head {}",
                receipts.len(),
                head
            );
        }
        Ok(Self {
            store,
            genesis,
            extend: Mutex::new(()),
            state: RwLock::new(ChainState { receipts, head }),
        })
    }

    /// Open a SQLite-backed ledger at `path` with the default sentinel.
    pub fn open_sqlite(path: &Path) -> LatticeResult<Self> {
        Self::open(
            Box::new(SqliteReceiptStore::open(path)?),
            cid::genesis_cid(),
        )
    }

    /// Sentinel cid anchoring this chain.
    pub fn genesis(&self) -> &str {
        &self.genesis
    }

    /// Append a payload from `source_id`, returning the full receipt once it
    /// is durable. On storage failure nothing is published: the head is
    /// unchanged and no cid is handed out.
    pub fn append(&self, source_id: impl Into<String>, payload: Value) -> LatticeResult<Receipt> {
        let source_id = source_id.into();
        let _extend = self
            .extend
            .lock()
            .map_err(|_| LatticeError::Storage("ledger extension lock poisoned".to_string()))?;

        let (prev_cid, sequence) = {
            let state = self.read_state()?;
            (state.head.clone(), state.receipts.len() as u64)
        };

        let receipt = Receipt::compute(source_id, payload, &prev_cid, sequence, now_ms());
        self.store.append(&receipt)?;

        {
            let mut state = self
                .state
                .write()
                .map_err(|_| LatticeError::Storage("ledger state lock poisoned".to_string()))?;
            state.head = receipt.cid.clone();
            state.receipts.push(receipt.clone());
        }

        log::debug!(
            "[ReceiptLedger] Appended receipt {} (source {}, seq {})",
            receipt.cid,
            receipt.source_id,
            receipt.sequence
        );
        Ok(receipt)
    }

    /// Cid of the most recent receipt, or the genesis sentinel when empty.
    pub fn head(&self) -> LatticeResult<Cid> {
        Ok(self.read_state()?.head.clone())
    }

    /// Number of receipts in the chain.
    pub fn len(&self) -> LatticeResult<u64> {
        Ok(self.read_state()?.receipts.len() as u64)
    }

    pub fn is_empty(&self) -> LatticeResult<bool> {
        Ok(self.read_state()?.receipts.is_empty())
    }

    /// Look up a receipt by its content address.
    pub fn get(&self, cid: &str) -> LatticeResult<Option<Receipt>> {
        let state = self.read_state()?;
        Ok(state.receipts.iter().find(|r| r.cid == cid).cloned())
    }

    /// Most recent receipt for a producer, if any.
    pub fn latest(&self, source_id: &str) -> LatticeResult<Option<Receipt>> {
        let state = self.read_state()?;
        Ok(state
            .receipts
            .iter()
            .rev()
            .find(|r| r.source_id == source_id)
            .cloned())
    }

    /// Receipts matching `query` in ascending sequence order. The result is
    /// a consistent snapshot: appends racing this call do not disturb it,
    /// and independent calls iterate independently.
    pub fn query(&self, query: &ReceiptQuery) -> LatticeResult<Vec<Receipt>> {
        let state = self.read_state()?;
        let mut out: Vec<Receipt> = state
            .receipts
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Re-verify the whole chain. Pure read; never mutates state.
    pub fn verify_all(&self) -> LatticeResult<()> {
        let state = self.read_state()?;
        verify_receipts(&state.receipts, &self.genesis, 0, state.receipts.len())
    }

    /// Re-verify sequences `[from, to]` inclusive, clamped to the chain.
    /// The first mismatching receipt is reported through
    /// [`LatticeError::ChainCorruption`].
    pub fn verify_range(&self, from: u64, to: u64) -> LatticeResult<()> {
        let state = self.read_state()?;
        let len = state.receipts.len();
        let start = (from as usize).min(len);
        let end = (to as usize).saturating_add(1).min(len);
        verify_receipts(&state.receipts, &self.genesis, start, end)
    }

    /// Snapshot summary: receipt count, head, per-source counts.
    pub fn stats(&self) -> LatticeResult<LedgerStats> {
        let state = self.read_state()?;
        let mut sources: BTreeMap<String, u64> = BTreeMap::new();
        for receipt in &state.receipts {
            *sources.entry(receipt.source_id.clone()).or_insert(0) += 1;
        }
        Ok(LedgerStats {
            receipts: state.receipts.len() as u64,
            head: state.head.clone(),
            sources,
        })
    }

    fn read_state(&self) -> LatticeResult<std::sync::RwLockReadGuard<'_, ChainState>> {
        self.state
            .read()
            .map_err(|_| LatticeError::Storage("ledger state lock poisoned".to_string()))
    }
}

/// Walk `receipts[start..end)` recomputing hashes and checking linkage.
/// `receipts` must hold the chain prefix up to at least `end` so that each
/// receipt's predecessor is available for the linkage check.
pub(crate) fn verify_receipts(
    receipts: &[Receipt],
    genesis: &str,
    start: usize,
    end: usize,
) -> LatticeResult<()> {
    for i in start..end {
        let receipt = &receipts[i];
        let sequence = i as u64;
        if receipt.sequence != sequence {
            return Err(LatticeError::ChainCorruption { sequence });
        }
        let expected_prev = if i == 0 {
            genesis
        } else {
            receipts[i - 1].cid.as_str()
        };
        if receipt.prev_cid != expected_prev {
            return Err(LatticeError::ChainCorruption { sequence });
        }
        if cid::content_hash(&receipt.payload) != receipt.content_hash {
            return Err(LatticeError::ChainCorruption { sequence });
        }
        if receipt.recompute_cid() != receipt.cid {
            return Err(LatticeError::ChainCorruption { sequence });
        }
    }
    Ok(())
}
