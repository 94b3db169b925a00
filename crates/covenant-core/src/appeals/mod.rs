//! Appeals resolution.
//!
//! When a binding agreement or a trust-affecting event is disputed, the
//! workflow here assigns an impartial resolver or review board under
//! separation of duties, collects votes, and drives the dispute to a
//! resolved state under a service-level deadline, with one capped
//! escalation.
//!
//! See [`state`] for the state machine diagram, [`eligibility`] for the
//! shared separation-of-duties predicate, and [`workflow`] for operation
//! contracts.

pub mod eligibility;
pub mod error;
pub mod state;
pub mod workflow;

#[cfg(test)]
mod tests;

pub use error::AppealError;
pub use state::{
    Appeal, AppealStatus, MAX_GROUNDS_LENGTH, MAX_REASONING_LENGTH, Resolution, SubjectKind,
    SubjectRef, SupersededVote, VoteDecision, VoteRecord,
};
pub use workflow::{AppealsWorkflow, SlaViolation};
