//! Storage traits and backends.
//!
//! Three logical collections back the whole system: receipts (append-only,
//! including negotiation messages), negotiations, and appeals. The traits
//! here define the observable storage contract:
//!
//! - **Append-only receipts**: writers never update or delete receipt or
//!   message rows; the SQLite backend enforces this with triggers, the
//!   memory backend by construction.
//! - **Linearized chains**: chain linking happens inside the store's
//!   per-chain critical section, so two concurrent appends for one actor
//!   (or one negotiation) never share a predecessor.
//! - **Per-entity optimistic versioning**: negotiation and appeal writes
//!   carry the revision the writer read; a mismatch is reported as
//!   [`StoreError::RevisionConflict`] and nothing is written. There is no
//!   process-wide counter or lock table.
//!
//! Two backends are provided: [`MemoryStore`] for tests and embedded use,
//! and [`SqliteStore`] (WAL mode) for durability.

mod memory;
mod sqlite;

use thiserror::Error;

use crate::appeals::state::{Appeal, AppealStatus};
use crate::error::ErrorCategory;
use crate::ledger::receipt::{Receipt, ReceiptDraft};
use crate::negotiation::message::{MessageDraft, NegotiationMessage};
use crate::negotiation::state::{Negotiation, NegotiationStatus};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors surfaced by storage backends.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The storage substrate failed; nothing partial was written.
    #[error("storage unavailable: {reason}")]
    Unavailable {
        /// Backend-specific failure detail.
        reason: String,
    },

    /// A compare-and-swap write lost to a concurrent writer.
    #[error("revision conflict on {entity} {id}: expected {expected}, found {actual}")]
    RevisionConflict {
        /// The entity kind ("negotiation" or "appeal").
        entity: &'static str,
        /// The entity id.
        id: String,
        /// The revision the writer read.
        expected: u64,
        /// The revision actually stored.
        actual: u64,
    },

    /// No entity with the given id exists.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The entity kind.
        entity: &'static str,
        /// The missing id.
        id: String,
    },

    /// An entity with the given id already exists.
    #[error("{entity} already exists: {id}")]
    Duplicate {
        /// The entity kind.
        entity: &'static str,
        /// The duplicated id.
        id: String,
    },

    /// A stored row could not be decoded.
    ///
    /// Reported, never repaired: the row is evidence.
    #[error("corrupted {entity} {id}: {reason}")]
    Corrupted {
        /// The entity kind.
        entity: &'static str,
        /// The id of the corrupt row.
        id: String,
        /// What failed to decode.
        reason: String,
    },
}

impl StoreError {
    /// Maps the failure onto the shared taxonomy.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Unavailable { .. } | Self::RevisionConflict { .. } => ErrorCategory::Resource,
            Self::NotFound { .. } | Self::Duplicate { .. } => ErrorCategory::Validation,
            Self::Corrupted { .. } => ErrorCategory::Integrity,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Unavailable {
            reason: err.to_string(),
        }
    }
}

/// Append-only receipt storage.
pub trait ReceiptStore {
    /// Seals and appends a receipt at the head of the actor's chain.
    ///
    /// The store computes `previous_hash` from the actor's most recent
    /// receipt inside its critical section, so concurrent appends for one
    /// actor are linearized and never fork.
    ///
    /// # Errors
    ///
    /// Fails only on storage unavailability; no partial receipt is ever
    /// persisted.
    fn append_receipt(&self, draft: ReceiptDraft) -> Result<Receipt, StoreError>;

    /// Looks up one receipt by id.
    fn receipt(&self, receipt_id: &str) -> Result<Option<Receipt>, StoreError>;

    /// Returns the actor's receipts in chain order, full history.
    fn receipt_chain(&self, actor_id: &str) -> Result<Vec<Receipt>, StoreError>;

    /// Returns a page of the actor's receipts in chain order.
    fn receipts_for_actor(
        &self,
        actor_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Receipt>, StoreError>;

    /// Returns the most recent receipt for the actor, if any.
    fn chain_head(&self, actor_id: &str) -> Result<Option<Receipt>, StoreError>;

    /// Returns every actor with at least one receipt.
    fn actor_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// Negotiation and negotiation-message storage.
pub trait NegotiationStore {
    /// Inserts a new negotiation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the id already exists.
    fn insert_negotiation(&self, negotiation: &Negotiation) -> Result<(), StoreError>;

    /// Looks up one negotiation by id.
    fn negotiation(&self, negotiation_id: &str) -> Result<Option<Negotiation>, StoreError>;

    /// Replaces a negotiation if its stored revision equals
    /// `expected_revision`; stores it with `expected_revision + 1` and
    /// returns the new revision.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RevisionConflict`] if a concurrent writer got
    /// there first; nothing is written.
    fn update_negotiation(
        &self,
        updated: &Negotiation,
        expected_revision: u64,
    ) -> Result<u64, StoreError>;

    /// Returns every negotiation currently in one of the given statuses.
    fn negotiations_with_status(
        &self,
        statuses: &[NegotiationStatus],
    ) -> Result<Vec<Negotiation>, StoreError>;

    /// Seals and appends a protocol message at the head of the
    /// negotiation's message chain. Same linearization contract as
    /// [`ReceiptStore::append_receipt`].
    fn append_message(&self, draft: MessageDraft) -> Result<NegotiationMessage, StoreError>;

    /// Returns the negotiation's messages in chain order.
    fn messages_for_negotiation(
        &self,
        negotiation_id: &str,
    ) -> Result<Vec<NegotiationMessage>, StoreError>;
}

/// Appeal storage.
pub trait AppealStore {
    /// Inserts a new appeal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the id already exists.
    fn insert_appeal(&self, appeal: &Appeal) -> Result<(), StoreError>;

    /// Looks up one appeal by id.
    fn appeal(&self, appeal_id: &str) -> Result<Option<Appeal>, StoreError>;

    /// Replaces an appeal if its stored revision equals `expected_revision`;
    /// stores it with `expected_revision + 1` and returns the new revision.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RevisionConflict`] if a concurrent writer got
    /// there first; nothing is written.
    fn update_appeal(&self, updated: &Appeal, expected_revision: u64) -> Result<u64, StoreError>;

    /// Returns every appeal currently in one of the given statuses.
    fn appeals_with_status(&self, statuses: &[AppealStatus]) -> Result<Vec<Appeal>, StoreError>;
}

/// The shared storage substrate: all three collections behind one handle.
pub trait TrustStore: ReceiptStore + NegotiationStore + AppealStore + Send + Sync {}

impl<T> TrustStore for T where T: ReceiptStore + NegotiationStore + AppealStore + Send + Sync {}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let conflict = StoreError::RevisionConflict {
            entity: "negotiation",
            id: "n-1".to_string(),
            expected: 3,
            actual: 4,
        };
        assert_eq!(conflict.category(), ErrorCategory::Resource);

        let missing = StoreError::NotFound {
            entity: "appeal",
            id: "a-1".to_string(),
        };
        assert_eq!(missing.category(), ErrorCategory::Validation);

        let corrupt = StoreError::Corrupted {
            entity: "receipt",
            id: "r-1".to_string(),
            reason: "bad json".to_string(),
        };
        assert_eq!(corrupt.category(), ErrorCategory::Integrity);
    }
}
