//! Blake3 hashing and hash-chain primitives.

use subtle::ConstantTimeEq;
use thiserror::Error;

/// Size of a Blake3 hash in bytes.
pub const HASH_SIZE: usize = 32;

/// Type alias for a 32-byte hash.
pub type Hash = [u8; HASH_SIZE];

/// The sentinel recorded as `previous_hash` by the first record of a chain.
///
/// Rendered as 64 `'0'` characters in the hex wire form.
pub const GENESIS_PREV_HASH: Hash = [0u8; HASH_SIZE];

/// Errors that can occur during hash chain operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashChainError {
    /// The previous-hash link doesn't match the predecessor's hash.
    #[error("hash chain broken: expected {expected}, got {actual}")]
    ChainBroken {
        /// The expected previous hash (lowercase hex).
        expected: String,
        /// The actual previous hash found (lowercase hex).
        actual: String,
    },

    /// The record hash doesn't match the recomputed value.
    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// The stored hash (lowercase hex).
        expected: String,
        /// The recomputed hash (lowercase hex).
        actual: String,
    },

    /// A hex rendering of a hash has the wrong shape.
    #[error("malformed hash encoding: {reason}")]
    MalformedEncoding {
        /// Why the encoding was rejected.
        reason: String,
    },
}

/// Encodes a hash as lowercase hex (64 characters).
#[must_use]
pub fn encode_hash(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Decodes a lowercase-hex hash rendering back into bytes.
///
/// Uppercase digits are rejected: the wire contract is lowercase hex, and
/// accepting both forms would make two renderings of the same digest compare
/// unequal as canonical strings.
///
/// # Errors
///
/// Returns `MalformedEncoding` if the input is not exactly 64 lowercase hex
/// characters.
pub fn decode_hash(encoded: &str) -> Result<Hash, HashChainError> {
    if encoded.len() != HASH_SIZE * 2 {
        return Err(HashChainError::MalformedEncoding {
            reason: format!("expected {} chars, got {}", HASH_SIZE * 2, encoded.len()),
        });
    }
    if encoded.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(HashChainError::MalformedEncoding {
            reason: "uppercase hex digits are not canonical".to_string(),
        });
    }
    let bytes = hex::decode(encoded).map_err(|e| HashChainError::MalformedEncoding {
        reason: e.to_string(),
    })?;
    let mut hash = [0u8; HASH_SIZE];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

/// Returns `true` if the hash is the genesis sentinel.
#[must_use]
pub fn is_genesis(hash: &Hash) -> bool {
    bool::from(hash.ct_eq(&GENESIS_PREV_HASH))
}

/// Hasher for chained records using Blake3.
///
/// Chain linkage runs through the canonical content itself: every record
/// embeds its predecessor's digest as the `previous_hash` field of the
/// canonical form that gets hashed, so a digest commits to the entire
/// history behind it.
pub struct ChainHasher;

impl ChainHasher {
    /// Computes the digest of canonical content.
    #[must_use]
    pub fn digest(content: &[u8]) -> Hash {
        *blake3::hash(content).as_bytes()
    }

    /// Verifies that a stored digest matches the recomputed value.
    ///
    /// Comparison is constant-time; the digests only appear in the error
    /// rendering after the mismatch is already established.
    ///
    /// # Errors
    ///
    /// Returns `HashMismatch` if the recomputed digest differs.
    pub fn verify_digest(content: &[u8], stored_hash: &Hash) -> Result<(), HashChainError> {
        let computed = Self::digest(content);
        if !bool::from(computed.ct_eq(stored_hash)) {
            return Err(HashChainError::HashMismatch {
                expected: encode_hash(stored_hash),
                actual: encode_hash(&computed),
            });
        }
        Ok(())
    }

    /// Verifies the link between a record's `previous_hash` field and its
    /// predecessor's content digest.
    ///
    /// # Errors
    ///
    /// Returns `ChainBroken` if the hashes don't match.
    pub fn verify_link(
        current_prev_hash: &Hash,
        predecessor_hash: &Hash,
    ) -> Result<(), HashChainError> {
        if !bool::from(current_prev_hash.ct_eq(predecessor_hash)) {
            return Err(HashChainError::ChainBroken {
                expected: encode_hash(predecessor_hash),
                actual: encode_hash(current_prev_hash),
            });
        }
        Ok(())
    }
}
