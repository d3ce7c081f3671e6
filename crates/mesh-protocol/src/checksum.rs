use sha2::{Digest, Sha256};

/// Compute the content digest of a state value.
///
/// SHA-256 over the compact JSON encoding. `serde_json` keeps object keys
/// sorted, so two structurally equal values always produce the same digest
/// regardless of how their maps were built.
pub fn value_checksum(value: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}
