//! Storage backends for the receipt ledger.
//!
//! The ledger owns the chain logic; a [`ReceiptStore`] only has to persist
//! receipts in sequence order and hand them back on open. `append` must not
//! return `Ok` before the receipt is as durable as the backend can make it.

use std::sync::Mutex;

use crate::error::{LatticeError, LatticeResult};
use crate::types::Receipt;

pub trait ReceiptStore: Send + Sync {
    /// Persist one receipt. Returns only after the write is durable for
    /// this backend. Must reject sequence gaps and duplicates.
    fn append(&self, receipt: &Receipt) -> LatticeResult<()>;

    /// All persisted receipts in ascending sequence order.
    fn load_all(&self) -> LatticeResult<Vec<Receipt>>;
}

/// Volatile backend for tests and ephemeral ledgers. "Durable" here means
/// applied to the vector; nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryReceiptStore {
    receipts: Mutex<Vec<Receipt>>,
}

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiptStore for InMemoryReceiptStore {
    fn append(&self, receipt: &Receipt) -> LatticeResult<()> {
        let mut receipts = self
            .receipts
            .lock()
            .map_err(|_| LatticeError::Storage("receipt store lock poisoned".to_string()))?;
        if receipt.sequence != receipts.len() as u64 {
            return Err(LatticeError::Storage(format!(
                "sequence {} does not extend store of length {}",
                receipt.sequence,
                receipts.len()
            )));
        }
        receipts.push(receipt.clone());
        Ok(())
    }

    fn load_all(&self) -> LatticeResult<Vec<Receipt>> {
        let receipts = self
            .receipts
            .lock()
            .map_err(|_| LatticeError::Storage("receipt store lock poisoned".to_string()))?;
        Ok(receipts.clone())
    }
}
