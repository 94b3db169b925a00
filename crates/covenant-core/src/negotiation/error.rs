//! Negotiation error types.

use thiserror::Error;

use crate::canonical::CanonicalError;
use crate::error::ErrorCategory;
use crate::ledger::LedgerError;
use crate::store::StoreError;

/// Errors that can occur during negotiation operations.
///
/// Validation and state-violation failures are rejected before any mutation
/// and carry enough detail for a client to refresh and retry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NegotiationError {
    /// No negotiation with the given id exists.
    #[error("negotiation not found: {negotiation_id}")]
    NotFound {
        /// The missing id.
        negotiation_id: String,
    },

    /// The declared participant set is malformed.
    #[error("invalid participants: {reason}")]
    InvalidParticipants {
        /// Why the set was rejected.
        reason: String,
    },

    /// The actor is not a declared participant.
    #[error("{actor_id} is not a participant of negotiation {negotiation_id}")]
    NotAParticipant {
        /// The negotiation id.
        negotiation_id: String,
        /// The rejected actor.
        actor_id: String,
    },

    /// The actor already joined this negotiation.
    #[error("{actor_id} already joined negotiation {negotiation_id}")]
    AlreadyJoined {
        /// The negotiation id.
        negotiation_id: String,
        /// The actor.
        actor_id: String,
    },

    /// The operation is not valid in the negotiation's current state.
    #[error("cannot {operation} negotiation {negotiation_id} in state {from_state}")]
    InvalidTransition {
        /// The negotiation id.
        negotiation_id: String,
        /// The current state name.
        from_state: &'static str,
        /// The attempted operation.
        operation: &'static str,
    },

    /// The acceptance targeted a superseded terms version.
    #[error(
        "stale terms version for negotiation {negotiation_id}: accepted {accepted}, current {current}"
    )]
    TermsVersionMismatch {
        /// The negotiation id.
        negotiation_id: String,
        /// The version the actor accepted.
        accepted: u64,
        /// The version currently on the table.
        current: u64,
    },

    /// The actor already accepted the current terms version.
    #[error("{actor_id} already accepted version {terms_version} of negotiation {negotiation_id}")]
    AlreadyAccepted {
        /// The negotiation id.
        negotiation_id: String,
        /// The actor.
        actor_id: String,
        /// The accepted version.
        terms_version: u64,
    },

    /// The actor already finalized this negotiation.
    #[error("{actor_id} already finalized negotiation {negotiation_id}")]
    AlreadyFinalized {
        /// The negotiation id.
        negotiation_id: String,
        /// The actor.
        actor_id: String,
    },

    /// The terms history reached its bound.
    #[error("negotiation {negotiation_id} exceeded {max} terms revisions")]
    TermsHistoryFull {
        /// The negotiation id.
        negotiation_id: String,
        /// The enforced ceiling.
        max: usize,
    },

    /// Optimistic-concurrency retries were exhausted.
    ///
    /// Nothing was written by the losing attempts; the whole call is safe to
    /// retry.
    #[error("contention on negotiation {negotiation_id}: gave up after {retries} retries")]
    ContentionExhausted {
        /// The negotiation id.
        negotiation_id: String,
        /// How many retries were attempted.
        retries: u32,
    },

    /// Opening the dispute's appeal failed.
    #[error("failed to open appeal: {0}")]
    Appeal(#[from] Box<crate::appeals::error::AppealError>),

    /// Terms or payload could not be canonicalized.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    /// Receipt emission failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The storage substrate failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Receipt emission failed.
    #[error(transparent)]
    Receipt(#[from] crate::ledger::receipt::ReceiptError),
}

impl NegotiationError {
    /// Maps the failure onto the shared taxonomy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. }
            | Self::InvalidParticipants { .. }
            | Self::NotAParticipant { .. }
            | Self::AlreadyJoined { .. }
            | Self::TermsVersionMismatch { .. }
            | Self::AlreadyAccepted { .. }
            | Self::AlreadyFinalized { .. }
            | Self::TermsHistoryFull { .. } => ErrorCategory::Validation,
            Self::InvalidTransition { .. } => ErrorCategory::StateViolation,
            Self::ContentionExhausted { .. } => ErrorCategory::Resource,
            Self::Appeal(err) => err.category(),
            Self::Canonical(err) => err.category(),
            Self::Ledger(err) => err.category(),
            Self::Store(err) => err.category(),
            Self::Receipt(err) => err.category(),
        }
    }
}
