//! Append-only, hash-chained receipt ledger.
//!
//! The ledger is the leaf of the system: every sovereignty-relevant action
//! across all components lands here as a [`Receipt`], content-hashed and
//! chained to the actor's previous receipt. Receipts are never updated or
//! deleted once written; tamper evidence comes from recomputing digests and
//! links, not from access control.
//!
//! # Failure Semantics
//!
//! [`ReceiptLedger::append`] never fails on business logic — it
//! unconditionally records. It fails on input that cannot be canonicalized
//! (validation, rejected before any write) or on storage unavailability
//! (fatal to the triggering operation; the write is atomic, so nothing
//! partial is ever persisted). Verification returns explicit result values
//! and never mutates state.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use covenant_core::ledger::{ActionKind, ReceiptLedger};
//! use covenant_core::store::MemoryStore;
//! use serde_json::json;
//!
//! # fn example() -> Result<(), covenant_core::ledger::LedgerError> {
//! let ledger = ReceiptLedger::new(Arc::new(MemoryStore::new()));
//!
//! let receipt = ledger.append("alice", ActionKind::MemoryCreate, json!({"note": "hi"}))?;
//! assert!(ledger.verify(&receipt));
//! assert!(ledger.verify_chain("alice")?.valid);
//! # Ok(())
//! # }
//! ```

pub mod receipt;
pub mod verify;


use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ErrorCategory;
use crate::store::{ReceiptStore, StoreError};

pub use receipt::{
    ActionKind, MAX_ACTOR_ID_LENGTH, MAX_PAYLOAD_BYTES, Receipt, ReceiptDraft, ReceiptError,
};
pub use verify::{ChainVerification, verify_chain, verify_receipt};

/// Errors surfaced by ledger operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// The receipt input was rejected before any write.
    #[error(transparent)]
    Draft(#[from] ReceiptError),

    /// The storage substrate failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Maps the failure onto the shared taxonomy.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Draft(err) => err.category(),
            Self::Store(err) => err.category(),
        }
    }
}

/// Per-actor chain summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStats {
    /// The chain owner.
    pub actor_id: String,

    /// Number of receipts in the chain.
    pub length: usize,

    /// Content hash of the most recent receipt.
    pub head_hash: String,
}

/// The append-only receipt ledger over a storage backend.
pub struct ReceiptLedger<S> {
    store: Arc<S>,
}

impl<S> Clone for ReceiptLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ReceiptStore> ReceiptLedger<S> {
    /// Creates a ledger over the given store.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Records one action for one actor, chained to the actor's previous
    /// receipt.
    ///
    /// # Errors
    ///
    /// Returns a validation error for input that cannot be canonicalized, or
    /// a resource error if storage is unavailable. Nothing partial is ever
    /// written.
    pub fn append(
        &self,
        actor_id: impl Into<String>,
        action_kind: ActionKind,
        payload: Value,
    ) -> Result<Receipt, LedgerError> {
        let draft = ReceiptDraft::new(actor_id, action_kind, payload)?;
        let receipt = self.store.append_receipt(draft)?;
        debug!(
            actor_id = %receipt.actor_id,
            action_kind = action_kind.as_str(),
            content_hash = %receipt.content_hash,
            "receipt appended"
        );
        Ok(receipt)
    }

    /// Returns the actor's full receipt chain, oldest first.
    pub fn get_chain(&self, actor_id: &str) -> Result<Vec<Receipt>, LedgerError> {
        Ok(self.store.receipt_chain(actor_id)?)
    }

    /// Returns a page of the actor's receipts in chain order.
    pub fn list_receipts_for_actor(
        &self,
        actor_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Receipt>, LedgerError> {
        Ok(self.store.receipts_for_actor(actor_id, offset, limit)?)
    }

    /// Looks up one receipt by id.
    pub fn get_receipt(&self, receipt_id: &str) -> Result<Option<Receipt>, LedgerError> {
        Ok(self.store.receipt(receipt_id)?)
    }

    /// Recomputes one receipt's content hash against the stored value.
    ///
    /// Pure check: a `false` result is a normal outcome, not an error.
    #[must_use]
    pub fn verify(&self, receipt: &Receipt) -> bool {
        verify_receipt(receipt)
    }

    /// Walks the actor's chain oldest-to-newest, checking digests and links.
    ///
    /// # Errors
    ///
    /// Fails only if the chain cannot be read; a broken chain is reported in
    /// the returned [`ChainVerification`], not as an error.
    pub fn verify_chain(&self, actor_id: &str) -> Result<ChainVerification, LedgerError> {
        let receipts = self.store.receipt_chain(actor_id)?;
        let outcome = verify_chain(&receipts);
        if !outcome.valid {
            warn!(
                actor_id,
                break_at = outcome.break_at.as_deref().unwrap_or("<none>"),
                "receipt chain verification failed"
            );
        }
        Ok(outcome)
    }

    /// Summarizes every actor chain in the ledger.
    pub fn stats(&self) -> Result<Vec<ChainStats>, LedgerError> {
        let mut stats = Vec::new();
        for actor_id in self.store.actor_ids()? {
            let chain = self.store.receipt_chain(&actor_id)?;
            let Some(head) = chain.last() else { continue };
            stats.push(ChainStats {
                actor_id,
                length: chain.len(),
                head_hash: head.content_hash.clone(),
            });
        }
        Ok(stats)
    }

    /// The shared storage handle.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
