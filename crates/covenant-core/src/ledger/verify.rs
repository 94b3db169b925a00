//! Receipt and chain verification.
//!
//! Verification never mutates state and never throws: results are explicit
//! values so callers can distinguish "didn't check" from "checked and
//! failed". A `false`/break result is a normal outcome, to be reported and
//! investigated, never auto-repaired.

use super::receipt::Receipt;
use crate::crypto::encode_hash;

/// Outcome of walking one actor's receipt chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    /// Whether every digest and every link checked out.
    pub valid: bool,

    /// The id of the first receipt where verification failed, if any.
    pub break_at: Option<String>,

    /// How many receipts were examined before stopping.
    pub checked: usize,
}

impl ChainVerification {
    /// A verification that examined `checked` receipts and found no break.
    #[must_use]
    pub const fn intact(checked: usize) -> Self {
        Self {
            valid: true,
            break_at: None,
            checked,
        }
    }

    fn broken_at(receipt: &Receipt, checked: usize) -> Self {
        Self {
            valid: false,
            break_at: Some(receipt.id.clone()),
            checked,
        }
    }
}

/// Recomputes a single receipt's content hash and compares it to the stored
/// value.
///
/// Returns `false` both for a digest mismatch and for a payload that can no
/// longer be canonicalized (which is itself evidence of tampering).
#[must_use]
pub fn verify_receipt(receipt: &Receipt) -> bool {
    receipt
        .recompute_content_hash()
        .is_some_and(|computed| computed == receipt.content_hash)
}

/// Walks an actor's receipts oldest-to-newest, checking per-receipt digests
/// and predecessor links.
///
/// The first receipt must carry the genesis sentinel as `previous_hash`;
/// every later receipt must carry its predecessor's `content_hash`. The walk
/// stops at the first break.
#[must_use]
pub fn verify_chain(receipts: &[Receipt]) -> ChainVerification {
    let mut expected_prev = encode_hash(&crate::crypto::GENESIS_PREV_HASH);

    for (index, receipt) in receipts.iter().enumerate() {
        if receipt.previous_hash != expected_prev {
            return ChainVerification::broken_at(receipt, index + 1);
        }
        if !verify_receipt(receipt) {
            return ChainVerification::broken_at(receipt, index + 1);
        }
        expected_prev = receipt.content_hash.clone();
    }

    ChainVerification::intact(receipts.len())
}
