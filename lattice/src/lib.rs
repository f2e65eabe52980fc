// Lattice Library
// Tamper-evident receipt chain and HOLD coordination for decision pipelines

pub mod cid;
pub mod config;
pub mod error;
pub mod types;

// Receipt chain
pub mod ledger;

// HOLD primitive
pub mod hold;

// Lattice core implementation
pub mod lattice_core;

// Re-export the main entry points
pub use crate::cid::{compute_cid, content_hash, genesis_cid, Cid};
pub use crate::config::{HoldConfig, LatticeConfig, LedgerConfig};
pub use crate::error::{LatticeError, LatticeResult};
pub use crate::hold::{
    HoldCoordinator, HoldListener, HoldPoint, HoldState, HoldStats, ListenerId, Resolution,
    ResolutionKind, Wealth,
};
pub use crate::lattice_core::Lattice;
pub use crate::ledger::{
    InMemoryReceiptStore, LedgerStats, ReceiptLedger, ReceiptStore, SqliteReceiptStore,
};
pub use crate::types::{Receipt, ReceiptQuery};
