//! Core chain types shared across the crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cid::{self, Cid};

/// One content-addressed record in the chain.
///
/// `cid` commits to the payload (through `content_hash`), the predecessor
/// cid and the sequence number. Mutating a stored receipt or reordering the
/// chain is detectable by recomputing cids along the walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Content address of this receipt.
    pub cid: Cid,
    /// Cid of the predecessor, or the genesis sentinel for sequence 0.
    pub prev_cid: Cid,
    /// Dense 0-based position in the chain.
    pub sequence: u64,
    /// Epoch milliseconds at append time.
    pub timestamp_ms: u64,
    /// Logical producer, e.g. a model id or "hold-open" / "hold-close".
    pub source_id: String,
    /// Opaque structured payload.
    pub payload: Value,
    /// Hash of the payload alone, before chaining.
    pub content_hash: Cid,
}

impl Receipt {
    /// Build the receipt at `sequence` chained onto `prev_cid`.
    pub fn compute(
        source_id: impl Into<String>,
        payload: Value,
        prev_cid: &str,
        sequence: u64,
        timestamp_ms: u64,
    ) -> Self {
        let content_hash = cid::content_hash(&payload);
        let cid = cid::compute_cid(&content_hash, prev_cid, sequence);
        Receipt {
            cid,
            prev_cid: prev_cid.to_string(),
            sequence,
            timestamp_ms,
            source_id: source_id.into(),
            payload,
            content_hash,
        }
    }

    /// Recompute this receipt's cid from its stored payload, predecessor and
    /// sequence. Verification compares the result against the stored `cid`.
    pub fn recompute_cid(&self) -> Cid {
        let content_hash = cid::content_hash(&self.payload);
        cid::compute_cid(&content_hash, &self.prev_cid, self.sequence)
    }
}

/// Filter for ledger queries. Unset fields are unconstrained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiptQuery {
    /// Keep only receipts from this producer.
    pub source_id: Option<String>,
    /// Inclusive lower bound on sequence.
    pub since: Option<u64>,
    /// Truncate the result to this many receipts.
    pub limit: Option<usize>,
}

impl ReceiptQuery {
    /// Match everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a single producer.
    pub fn for_source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Self::default()
        }
    }

    pub fn with_since(mut self, sequence: u64) -> Self {
        self.since = Some(sequence);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, receipt: &Receipt) -> bool {
        if let Some(ref source_id) = self.source_id {
            if &receipt.source_id != source_id {
                return false;
            }
        }
        if let Some(since) = self.since {
            if receipt.sequence < since {
                return false;
            }
        }
        true
    }
}

/// Epoch milliseconds now. Falls back to 0 if the system clock reports a
/// time before the epoch.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_receipt_compute_links_to_prev() {
        let r0 = Receipt::compute("m1", json!({"k": 1}), "G0", 0, 1_000);
        let r1 = Receipt::compute("m1", json!({"k": 2}), &r0.cid, 1, 1_001);
        assert_eq!(r0.prev_cid, "G0");
        assert_eq!(r1.prev_cid, r0.cid);
        assert_eq!(r1.sequence, 1);
        assert_eq!(r0.recompute_cid(), r0.cid);
        assert_eq!(r1.recompute_cid(), r1.cid);
    }

    #[test]
    fn test_recompute_detects_payload_tampering() {
        let mut r = Receipt::compute("m1", json!({"k": 1}), "G0", 0, 1_000);
        r.payload = json!({"k": 999});
        assert_ne!(r.recompute_cid(), r.cid);
    }

    #[test]
    fn test_receipt_serde_round_trip() {
        let r = Receipt::compute("m1", json!({"k": [1, 2, 3]}), "G0", 0, 1_000);
        let text = serde_json::to_string(&r).unwrap();
        let back: Receipt = serde_json::from_str(&text).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_query_builders_and_matching() {
        let r = Receipt::compute("m1", json!(1), "G0", 5, 1_000);
        assert!(ReceiptQuery::all().matches(&r));
        assert!(ReceiptQuery::for_source("m1").matches(&r));
        assert!(!ReceiptQuery::for_source("m2").matches(&r));
        assert!(ReceiptQuery::all().with_since(5).matches(&r));
        assert!(!ReceiptQuery::all().with_since(6).matches(&r));
        let q = ReceiptQuery::for_source("m1").with_since(2).with_limit(10);
        assert_eq!(q.limit, Some(10));
        assert!(q.matches(&r));
    }
}
