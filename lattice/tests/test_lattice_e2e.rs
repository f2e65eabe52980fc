use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lattice::{
    HoldConfig, HoldListener, HoldPoint, Lattice, LatticeConfig, LatticeError, LedgerConfig,
    ReceiptQuery, ResolutionKind, Wealth,
};
use serde_json::json;
use tempfile::tempdir;

fn probs(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Listener standing in for an inspection UI: records what it was shown.
struct InspectionListener {
    seen: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait::async_trait]
impl HoldListener for InspectionListener {
    async fn on_hold_opened(&self, hold: &HoldPoint) {
        self.seen
            .lock()
            .unwrap()
            .push((hold.hold_id.clone(), hold.fingerprint.clone()));
    }
}

#[tokio::test]
async fn test_yield_inspect_override_persist_cycle() {
    let dir = tempdir().unwrap();
    let config = LatticeConfig {
        ledger: LedgerConfig {
            db_path: Some(dir.path().join("lattice.db")),
            genesis: None,
        },
        hold: HoldConfig {
            default_timeout_ms: 10_000,
            auto_accept: false,
        },
    };

    let seen = Arc::new(Mutex::new(Vec::new()));
    let head = {
        let lattice = Lattice::new(config.clone()).unwrap();
        lattice
            .hold()
            .register_listener(Arc::new(InspectionListener { seen: seen.clone() }))
            .await;

        // producer pauses on its decision
        let producer = {
            let hold = lattice.hold().clone();
            tokio::spawn(async move {
                hold.yield_point(
                    "pilot",
                    probs(&[("continue", 0.85), ("abort", 0.15)]),
                    Wealth {
                        value: Some(0.4),
                        reasoning: Some(vec!["sensor disagreement".to_string()]),
                        ..Wealth::default()
                    },
                )
                .await
            })
        };

        // resolver inspects and overrides
        let mut pending = None;
        for _ in 0..500 {
            pending = lattice.hold().current_hold();
            if pending.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let pending = pending.expect("hold never became pending");
        assert_eq!(pending.chosen, "continue");

        let kind = lattice
            .hold()
            .resolve(&pending.hold_id, "abort", "operator-7")
            .unwrap();
        assert_eq!(kind, ResolutionKind::Override);

        let resolution = producer.await.unwrap().unwrap();
        assert!(resolution.was_override());
        assert_eq!(resolution.action.as_deref(), Some("abort"));
        assert_eq!(resolution.resolver_id.as_deref(), Some("operator-7"));

        // the listener saw exactly the snapshot the ledger recorded
        let opens = lattice
            .ledger()
            .query(&ReceiptQuery::for_source("hold-open"))
            .unwrap();
        assert_eq!(opens.len(), 1);
        let observed = seen.lock().unwrap().clone();
        assert_eq!(observed.len(), 1);
        assert_eq!(json!(observed[0].0), opens[0].payload["hold_id"]);
        assert_eq!(json!(observed[0].1), opens[0].payload["fingerprint"]);

        lattice.ledger().verify_all().unwrap();
        lattice.shutdown().await;
        lattice.ledger().head().unwrap()
    };

    // restart: the audit trail survives and still verifies
    let lattice = Lattice::new(config).unwrap();
    assert_eq!(lattice.ledger().len().unwrap(), 2);
    assert_eq!(lattice.ledger().head().unwrap(), head);
    lattice.ledger().verify_all().unwrap();

    let closes = lattice
        .ledger()
        .query(&ReceiptQuery::for_source("hold-close"))
        .unwrap();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].payload["kind"], json!("override"));
    assert_eq!(closes[0].payload["action"], json!("abort"));
}

#[tokio::test]
async fn test_auto_accept_config_from_toml() {
    let config = LatticeConfig::from_toml_str(
        r#"
        [hold]
        default_timeout_ms = 600000
        auto_accept = true
        "#,
    )
    .unwrap();
    let lattice = Lattice::new(config).unwrap();

    let start = std::time::Instant::now();
    let resolution = lattice
        .hold()
        .yield_point("pilot", probs(&[("go", 0.6), ("wait", 0.4)]), Wealth::default())
        .await
        .unwrap();

    assert_eq!(resolution.kind, ResolutionKind::TimeoutAutoAccept);
    assert_eq!(resolution.action.as_deref(), Some("go"));
    assert!(start.elapsed() < Duration::from_secs(60));
    assert_eq!(lattice.ledger().len().unwrap(), 2);
}

#[tokio::test]
async fn test_genesis_override_binds_the_chain() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("lattice.db");

    {
        let lattice = Lattice::new(LatticeConfig {
            ledger: LedgerConfig {
                db_path: Some(db_path.clone()),
                genesis: Some("anchor-a".to_string()),
            },
            hold: HoldConfig::default(),
        })
        .unwrap();
        lattice.ledger().append("m1", json!({"n": 1})).unwrap();
    }

    // same sentinel reopens cleanly
    let lattice = Lattice::new(LatticeConfig {
        ledger: LedgerConfig {
            db_path: Some(db_path.clone()),
            genesis: Some("anchor-a".to_string()),
        },
        hold: HoldConfig::default(),
    })
    .unwrap();
    lattice.ledger().verify_all().unwrap();
    drop(lattice);

    // a different sentinel cannot claim this chain
    let err = Lattice::new(LatticeConfig {
        ledger: LedgerConfig {
            db_path: Some(db_path),
            genesis: Some("anchor-b".to_string()),
        },
        hold: HoldConfig::default(),
    })
    .unwrap_err();
    assert!(matches!(
        err,
        LatticeError::ChainCorruption { sequence: 0 }
    ));
}
