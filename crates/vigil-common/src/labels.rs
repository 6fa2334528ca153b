//! Canonical label handling.
//!
//! Series identity and the storage key suffix both derive from the
//! canonical form `k1=v1,k2=v2,…` with keys sorted lexicographically.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Builds the canonical label string: keys sorted, `k=v` pairs joined by
/// commas. Returns an empty string for an empty map.
pub fn canonical(labels: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = labels.keys().collect();
    keys.sort();

    let mut out = String::new();
    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(k);
        out.push('=');
        out.push_str(&labels[*k]);
    }
    out
}

/// Stable short hash of a label set: hex of the first 8 bytes of the
/// SHA-256 of the canonical form. Empty labels hash to the empty string so
/// that unlabeled series keep a compact storage key.
pub fn hash(labels: &HashMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let digest = Sha256::digest(canonical(labels).as_bytes());
    let mut out = String::with_capacity(16);
    for b in &digest[..8] {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
