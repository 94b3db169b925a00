//! Multi-party trust negotiation.
//!
//! A negotiation converges a bounded set of named participants on a binding
//! agreement over versioned terms. Counter-offers strictly increment a
//! monotonic version counter; acceptance is tied to version numbers, never
//! to content equality, so two textually-identical offers at different
//! versions are not interchangeable. Consensus is re-checked after every
//! accept and every offer (an offer invalidates consensus by clearing the
//! acceptance set).
//!
//! See [`state`] for the state machine diagram, [`engine`] for transition
//! contracts, and [`message`] for the per-negotiation audit chain.

pub mod engine;
pub mod error;
pub mod message;
pub mod state;

#[cfg(test)]
mod tests;

pub use engine::{NegotiationEngine, TimeoutSweep};
pub use error::NegotiationError;
pub use message::{MessageDraft, MessageKind, NegotiationMessage};
pub use state::{
    MAX_PARTICIPANTS, MAX_TERMS_HISTORY, Negotiation, NegotiationStatus, TermsRevision,
    compute_binding_hash,
};
