//! Appeals error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::ErrorCategory;
use crate::ledger::LedgerError;
use crate::store::StoreError;

/// Errors that can occur during appeals operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppealError {
    /// No appeal with the given id exists.
    #[error("appeal not found: {appeal_id}")]
    NotFound {
        /// The missing id.
        appeal_id: String,
    },

    /// Open input was malformed.
    #[error("invalid appeal input: {reason}")]
    InvalidInput {
        /// Why the input was rejected.
        reason: String,
    },

    /// No candidate satisfies separation-of-duties.
    #[error("no eligible resolver for appeal {appeal_id}")]
    NoEligibleResolver {
        /// The appeal id.
        appeal_id: String,
    },

    /// Too few candidates satisfy separation-of-duties for the requested
    /// board size.
    #[error(
        "insufficient eligible actors for appeal {appeal_id}: needed {needed}, found {available}"
    )]
    InsufficientEligibleActors {
        /// The appeal id.
        appeal_id: String,
        /// The requested board size.
        needed: usize,
        /// How many eligible candidates were available.
        available: usize,
    },

    /// The requested board size is outside the allowed range.
    #[error("board size {size} outside allowed range {min}..={max}")]
    BoardSizeOutOfRange {
        /// The rejected size.
        size: usize,
        /// Lower bound.
        min: usize,
        /// Upper bound.
        max: usize,
    },

    /// A board was already assigned; it only changes through escalation.
    #[error("appeal {appeal_id} already has a review board")]
    BoardAlreadyAssigned {
        /// The appeal id.
        appeal_id: String,
    },

    /// The voter does not sit on the review board.
    #[error("{actor_id} is not on the review board of appeal {appeal_id}")]
    NotABoardMember {
        /// The appeal id.
        appeal_id: String,
        /// The rejected voter.
        actor_id: String,
    },

    /// The operation is not valid in the appeal's current state.
    #[error("cannot {operation} appeal {appeal_id} in state {from_state}")]
    InvalidTransition {
        /// The appeal id.
        appeal_id: String,
        /// The current state name.
        from_state: &'static str,
        /// The attempted operation.
        operation: &'static str,
    },

    /// The single permitted escalation already happened.
    #[error("appeal {appeal_id} already escalated; further breaches are reported, not escalated")]
    AlreadyEscalated {
        /// The appeal id.
        appeal_id: String,
    },

    /// Escalation requested before the review deadline passed.
    #[error("appeal {appeal_id} deadline {deadline} has not been breached")]
    DeadlineNotBreached {
        /// The appeal id.
        appeal_id: String,
        /// The still-future deadline.
        deadline: DateTime<Utc>,
    },

    /// Optimistic-concurrency retries were exhausted.
    #[error("contention on appeal {appeal_id}: gave up after {retries} retries")]
    ContentionExhausted {
        /// The appeal id.
        appeal_id: String,
        /// How many retries were attempted.
        retries: u32,
    },

    /// Receipt emission failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The storage substrate failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppealError {
    /// Maps the failure onto the shared taxonomy.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. }
            | Self::InvalidInput { .. }
            | Self::NoEligibleResolver { .. }
            | Self::InsufficientEligibleActors { .. }
            | Self::BoardSizeOutOfRange { .. }
            | Self::BoardAlreadyAssigned { .. }
            | Self::NotABoardMember { .. }
            | Self::DeadlineNotBreached { .. } => ErrorCategory::Validation,
            Self::InvalidTransition { .. } | Self::AlreadyEscalated { .. } => {
                ErrorCategory::StateViolation
            },
            Self::ContentionExhausted { .. } => ErrorCategory::Resource,
            Self::Ledger(err) => err.category(),
            Self::Store(err) => err.category(),
        }
    }
}
