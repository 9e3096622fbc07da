//! Identity hashing for passages and embedding vectors.
//!
//! Both hashes are dedup fingerprints, not security primitives. They must be
//! stable across process restarts, so both are built on SHA-256 rather than
//! any per-process-seeded hasher.

use sha2::{Digest, Sha256};

/// Hash raw passage text to a `u64` fingerprint.
///
/// Takes the first 8 bytes (big-endian) of the SHA-256 digest. Used for the
/// cheap pre-embedding duplicate check.
pub fn text_hash(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Hash a normalized embedding vector to its storage key.
///
/// Two embeddings hash identically iff their normalized vectors are
/// bit-identical; near-duplicates are expected to hash differently. The input
/// must already be unit-normalized — hashing a raw vector would produce a key
/// that never matches the stored one.
pub fn embedding_hash(vector: &[f64]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(vec_to_bytes(vector));
    format!("{:x}", hasher.finalize())
}

/// Encode a float vector as little-endian `f64` bytes.
pub fn vec_to_bytes(vector: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 8);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_hash_deterministic() {
        assert_eq!(text_hash("the quick brown fox"), text_hash("the quick brown fox"));
    }

    #[test]
    fn test_text_hash_distinguishes_inputs() {
        assert_ne!(text_hash("alpha"), text_hash("beta"));
        // Whitespace variants are distinct at the content level; only the
        // embedding-stage check can collapse them.
        assert_ne!(text_hash("alpha"), text_hash("alpha "));
    }

    #[test]
    fn test_embedding_hash_identity_key() {
        let v = vec![0.6, 0.8, 0.0];
        assert_eq!(embedding_hash(&v), embedding_hash(&v.clone()));

        // A one-ULP perturbation must produce a different key: this is an
        // identity hash, not a similarity hash.
        let mut w = v.clone();
        w[2] = f64::from_bits(w[2].to_bits() + 1);
        assert_ne!(embedding_hash(&v), embedding_hash(&w));
    }

    #[test]
    fn test_vec_to_bytes_length() {
        assert_eq!(vec_to_bytes(&[1.0, -2.5, 3.125]).len(), 24);
        assert!(vec_to_bytes(&[]).is_empty());
    }
}
