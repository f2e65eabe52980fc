//! Lattice core: wires the receipt ledger and the HOLD coordinator into one
//! context object.
//!
//! There is deliberately no global instance. Embedders construct a
//! [`Lattice`], hand clones of its `Arc` components to producer and resolver
//! tasks, and drop it when done; independent lattices never share state.

use std::sync::Arc;

use crate::config::LatticeConfig;
use crate::error::LatticeResult;
use crate::hold::HoldCoordinator;
use crate::ledger::{ReceiptLedger, SqliteReceiptStore};

/// The main entry point: a receipt ledger plus the hold coordinator bound
/// to it.
#[derive(Debug)]
pub struct Lattice {
    ledger: Arc<ReceiptLedger>,
    hold: Arc<HoldCoordinator>,
}

impl Lattice {
    /// Build a lattice from configuration. With `ledger.db_path` set the
    /// chain is durable in SQLite and survives restarts; otherwise it lives
    /// in memory.
    pub fn new(config: LatticeConfig) -> LatticeResult<Self> {
        let ledger = match (&config.ledger.db_path, &config.ledger.genesis) {
            (Some(path), Some(genesis)) => {
                let store = SqliteReceiptStore::open(path)?;
                ReceiptLedger::open(Box::new(store), genesis.clone())?
            }
            (Some(path), None) => ReceiptLedger::open_sqlite(path)?,
            (None, Some(genesis)) => ReceiptLedger::in_memory_with_genesis(genesis.clone()),
            (None, None) => ReceiptLedger::in_memory(),
        };
        let ledger = Arc::new(ledger);
        let hold = Arc::new(HoldCoordinator::new(ledger.clone(), config.hold.clone()));
        log::info!(
            "[Lattice] Initialized (durable: {})",
            config.ledger.db_path.is_some()
        );
        Ok(Self { ledger, hold })
    }

    /// In-memory lattice with default hold settings. Nothing survives drop;
    /// meant for tests and embedding experiments.
    pub fn in_memory() -> Self {
        let ledger = Arc::new(ReceiptLedger::in_memory());
        let hold = Arc::new(HoldCoordinator::new(
            ledger.clone(),
            LatticeConfig::default().hold,
        ));
        Self { ledger, hold }
    }

    pub fn ledger(&self) -> &Arc<ReceiptLedger> {
        &self.ledger
    }

    pub fn hold(&self) -> &Arc<HoldCoordinator> {
        &self.hold
    }

    /// Drain the hold queue and stop accepting notified holds. The ledger
    /// stays readable; appends made by late producers still chain normally.
    pub async fn shutdown(&self) {
        self.hold.shutdown().await;
        log::info!("[Lattice] Shutdown complete");
    }
}
