//! Runtime configuration for a lattice context.
//!
//! Plain serde structs with defaults at every level, so a partial TOML file
//! (or an empty one) always parses.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LatticeError, LatticeResult};

/// Documented default for how long a hold waits before auto-accepting.
pub const DEFAULT_HOLD_TIMEOUT_MS: u64 = 30_000;

/// Top-level configuration for a [`Lattice`](crate::Lattice) instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LatticeConfig {
    pub ledger: LedgerConfig,
    pub hold: HoldConfig,
}

/// Receipt ledger settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database path. `None` keeps receipts in memory only.
    pub db_path: Option<PathBuf>,
    /// Genesis sentinel override. `None` uses the built-in sentinel.
    pub genesis: Option<String>,
}

/// Hold coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldConfig {
    /// How long a hold waits for a resolver before auto-accepting the
    /// model's top choice, in milliseconds.
    pub default_timeout_ms: u64,
    /// Resolve every hold immediately as an auto-accept. Listeners are
    /// still notified; nothing blocks.
    pub auto_accept: bool,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_HOLD_TIMEOUT_MS,
            auto_accept: false,
        }
    }
}

impl LatticeConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> LatticeResult<Self> {
        toml::from_str(content)
            .map_err(|e| LatticeError::Validation(format!("failed to parse config: {}", e)))
    }

    /// Load a configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> LatticeResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| LatticeError::Storage(format!("failed to read config file: {}", e)))?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LatticeConfig::default();
        assert!(config.ledger.db_path.is_none());
        assert!(config.ledger.genesis.is_none());
        assert_eq!(config.hold.default_timeout_ms, DEFAULT_HOLD_TIMEOUT_MS);
        assert!(!config.hold.auto_accept);
    }

    #[test]
    fn test_empty_toml_parses_to_defaults() {
        let config = LatticeConfig::from_toml_str("").unwrap();
        assert_eq!(config.hold.default_timeout_ms, DEFAULT_HOLD_TIMEOUT_MS);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = LatticeConfig::from_toml_str(
            r#"
            [hold]
            default_timeout_ms = 250

            [ledger]
            db_path = "/tmp/lattice.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.hold.default_timeout_ms, 250);
        assert!(!config.hold.auto_accept);
        assert_eq!(
            config.ledger.db_path,
            Some(PathBuf::from("/tmp/lattice.db"))
        );
        assert!(config.ledger.genesis.is_none());
    }

    #[test]
    fn test_invalid_toml_is_a_validation_error() {
        let err = LatticeConfig::from_toml_str("hold = 3").unwrap_err();
        assert!(matches!(err, LatticeError::Validation(_)));
    }
}
