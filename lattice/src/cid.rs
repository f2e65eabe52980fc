//! Content addressing for receipts and hold fingerprints.
//!
//! Every cid is the lowercase hex SHA-256 of a canonical byte string. The
//! canonical form of a JSON payload sorts object keys at every depth, so
//! structurally equal values hash identically no matter how they were built.

use once_cell::sync::Lazy;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest, 64 characters.
pub type Cid = String;

/// Preamble hashed once to anchor chains that do not supply their own
/// genesis sentinel.
const GENESIS_PREAMBLE: &str = "lattice:genesis:v1";

static GENESIS_CID: Lazy<Cid> = Lazy::new(|| hash_bytes(GENESIS_PREAMBLE.as_bytes()));

/// Default sentinel cid anchoring sequence 0 of a chain.
pub fn genesis_cid() -> &'static str {
    &GENESIS_CID
}

/// SHA-256 over raw bytes, hex encoded.
pub fn hash_bytes(bytes: &[u8]) -> Cid {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Canonical text form of a JSON value. Object keys are emitted in sorted
/// order at every depth; arrays keep their order; numbers use serde_json's
/// deterministic formatting.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Hash of a payload alone, before chaining.
pub fn content_hash(payload: &Value) -> Cid {
    hash_bytes(canonical_json(payload).as_bytes())
}

/// Chain cid for a receipt: payload hash, predecessor cid and sequence fed
/// through one hasher in fixed order. Same inputs always produce the same
/// cid, so verification can recompute and compare.
pub fn compute_cid(payload_hash: &str, prev_cid: &str, sequence: u64) -> Cid {
    let mut hasher = Sha256::new();
    hasher.update(payload_hash.as_bytes());
    hasher.update(prev_cid.as_bytes());
    hasher.update(sequence.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
