//! Deterministic content hashing for configuration blocks.
//!
//! Matches the historical implementation: serialize to JSON with sorted
//! keys, run it through SHAKE-256, and take the first 32 hex characters
//! (16 bytes) of the digest. Two daemons announcing the same item set
//! produce the same hash without needing to compare the full payload.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

const DIGEST_HEX_LEN: usize = 32;

/// Hash any serializable value deterministically. Callers should pass a
/// value whose `Serialize` impl sorts map keys (we use `BTreeMap`
/// everywhere in this crate for exactly that reason).
pub fn generate_hash<T: serde::Serialize>(value: &T) -> crate::Result<String> {
    let raw = serde_json::to_vec(value).map_err(|e| crate::Error::Json {
        path: std::path::PathBuf::from("<in-memory>"),
        source: e,
    })?;
    Ok(hash_bytes(&raw))
}

pub fn hash_bytes(raw: &[u8]) -> String {
    let mut hasher = Shake256::default();
    hasher.update(raw);
    let mut reader = hasher.finalize_xof();
    let mut out = vec![0u8; DIGEST_HEX_LEN / 2];
    reader.read(&mut out);
    hex::encode(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn hash_is_32_hex_chars() {
        let mut data = BTreeMap::new();
        data.insert("a", 1);
        data.insert("b", 2);
        let hash = generate_hash(&data).unwrap();
        assert_eq!(hash.len(), DIGEST_HEX_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_is_deterministic_and_order_independent() {
        let mut a = BTreeMap::new();
        a.insert("x", 1);
        a.insert("y", 2);
        let mut b = BTreeMap::new();
        b.insert("y", 2);
        b.insert("x", 1);
        assert_eq!(generate_hash(&a).unwrap(), generate_hash(&b).unwrap());
    }

    #[test]
    fn hash_changes_with_content() {
        let mut a = BTreeMap::new();
        a.insert("x", 1);
        let mut b = BTreeMap::new();
        b.insert("x", 2);
        assert_ne!(generate_hash(&a).unwrap(), generate_hash(&b).unwrap());
    }
}
