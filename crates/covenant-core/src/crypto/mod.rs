//! Cryptographic primitives for the receipt ledger.
//!
//! This module provides the hash-chain primitive shared by receipts and
//! negotiation messages:
//!
//! - **Blake3 hashing**: 256-bit content digests, rendered lowercase hex
//! - **Hash-chain linking**: each record's canonical form embeds its
//!   predecessor's digest, so a digest commits to the full history behind it
//!
//! # Example
//!
//! ```rust
//! use covenant_core::crypto::{ChainHasher, GENESIS_PREV_HASH, encode_hash};
//!
//! let first = ChainHasher::digest(b"{\"previous_hash\":\"00..\"}");
//! assert_eq!(encode_hash(&GENESIS_PREV_HASH), "0".repeat(64));
//! assert!(ChainHasher::verify_link(&first, &first).is_ok());
//! ```

mod hash;

pub use hash::{
    ChainHasher, GENESIS_PREV_HASH, HASH_SIZE, Hash, HashChainError, decode_hash, encode_hash,
    is_genesis,
};
