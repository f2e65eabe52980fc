use std::sync::Arc;
use std::thread;

use lattice::{LatticeError, ReceiptLedger, ReceiptQuery};
use serde_json::json;
use tempfile::tempdir;

#[test]
fn test_sqlite_chain_survives_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("receipts.db");

    // First process: build a short chain
    let head = {
        let ledger = ReceiptLedger::open_sqlite(&db_path).unwrap();
        ledger.append("planner", json!({"step": "observe"})).unwrap();
        ledger.append("planner", json!({"step": "decide"})).unwrap();
        let last = ledger.append("actuator", json!({"step": "act"})).unwrap();
        last.cid
    };

    // Second process: reopen, recover the head, keep appending
    let ledger = ReceiptLedger::open_sqlite(&db_path).unwrap();
    assert_eq!(ledger.len().unwrap(), 3);
    assert_eq!(ledger.head().unwrap(), head);
    ledger.verify_all().unwrap();

    let next = ledger.append("planner", json!({"step": "observe"})).unwrap();
    assert_eq!(next.prev_cid, head);
    assert_eq!(next.sequence, 3);
    ledger.verify_all().unwrap();
}

#[test]
fn test_sqlite_tampered_row_fails_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("receipts.db");

    {
        let ledger = ReceiptLedger::open_sqlite(&db_path).unwrap();
        for i in 0..3 {
            ledger.append("m1", json!({"step": i})).unwrap();
        }
    }

    // Rewrite one payload behind the ledger's back
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute(
        "UPDATE receipts SET payload = ?1 WHERE sequence = 1",
        rusqlite::params![r#"{"step":999}"#],
    )
    .unwrap();
    drop(conn);

    let err = ReceiptLedger::open_sqlite(&db_path).unwrap_err();
    assert!(matches!(
        err,
        LatticeError::ChainCorruption { sequence: 1 }
    ));
}

#[test]
fn test_sqlite_corruption_localizes_to_first_bad_sequence() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("receipts.db");

    {
        let ledger = ReceiptLedger::open_sqlite(&db_path).unwrap();
        for i in 0..5 {
            ledger.append("m1", json!({"step": i})).unwrap();
        }
    }

    // Corrupt two rows; reopen must report the earlier one
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute(
        "UPDATE receipts SET payload = '{}' WHERE sequence IN (2, 4)",
        [],
    )
    .unwrap();
    drop(conn);

    let err = ReceiptLedger::open_sqlite(&db_path).unwrap_err();
    assert!(matches!(
        err,
        LatticeError::ChainCorruption { sequence: 2 }
    ));
}

#[test]
fn test_concurrent_appends_keep_one_linear_chain() {
    let ledger = Arc::new(ReceiptLedger::in_memory());

    let mut handles = Vec::new();
    for t in 0..4 {
        let ledger = ledger.clone();
        handles.push(thread::spawn(move || {
            let source = format!("writer-{}", t);
            for i in 0..25 {
                ledger.append(&source, json!({"i": i})).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(ledger.len().unwrap(), 100);
    ledger.verify_all().unwrap();

    // Dense sequences, every writer fully represented
    let all = ledger.query(&ReceiptQuery::all()).unwrap();
    for (i, receipt) in all.iter().enumerate() {
        assert_eq!(receipt.sequence, i as u64);
    }
    for t in 0..4 {
        let per_writer = ledger
            .query(&ReceiptQuery::for_source(&format!("writer-{}", t)))
            .unwrap();
        assert_eq!(per_writer.len(), 25);
    }
}

#[test]
fn test_reads_run_against_a_stable_snapshot() {
    let ledger = Arc::new(ReceiptLedger::in_memory());
    for i in 0..10 {
        ledger.append("m1", json!(i)).unwrap();
    }

    let snapshot = ledger.query(&ReceiptQuery::all()).unwrap();
    let head_before = ledger.head().unwrap();

    // Appends after the query do not disturb the materialized result
    ledger.append("m1", json!(10)).unwrap();
    assert_eq!(snapshot.len(), 10);
    assert_eq!(snapshot.last().unwrap().cid, head_before);
    assert_eq!(ledger.len().unwrap(), 11);
}

#[test]
fn test_query_combines_source_since_and_limit() {
    let dir = tempdir().unwrap();
    let ledger = ReceiptLedger::open_sqlite(&dir.path().join("receipts.db")).unwrap();

    for i in 0..8 {
        let source = if i % 2 == 0 { "even" } else { "odd" };
        ledger.append(source, json!({"i": i})).unwrap();
    }

    let filtered = ledger
        .query(&ReceiptQuery::for_source("even").with_since(2).with_limit(2))
        .unwrap();
    assert_eq!(filtered.len(), 2);
    assert_eq!(filtered[0].sequence, 2);
    assert_eq!(filtered[1].sequence, 4);
}

#[test]
fn test_get_by_cid_after_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("receipts.db");

    let cid = {
        let ledger = ReceiptLedger::open_sqlite(&db_path).unwrap();
        ledger.append("m1", json!({"k": "v"})).unwrap().cid
    };

    let ledger = ReceiptLedger::open_sqlite(&db_path).unwrap();
    let receipt = ledger.get(&cid).unwrap().unwrap();
    assert_eq!(receipt.payload, json!({"k": "v"}));
    assert_eq!(receipt.cid, receipt.recompute_cid());
}
