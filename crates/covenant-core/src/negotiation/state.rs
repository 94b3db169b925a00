//! Negotiation state types.
//!
//! # State Machine
//!
//! ```text
//!     create                join (last)            all accept
//! ┌───────────┐        ┌─────────────┐        ┌────────────────────┐
//! │ Initiated │──────► │ Negotiating │──────► │ ConsensusReached   │
//! └─────┬─────┘        └──────┬──────┘        └─────────┬──────────┘
//!       │                     │ offer (clears            │ all finalize
//!       │                     │ acceptances, loops)      ▼
//!       │                     │                    ┌─────────┐   dispute   ┌──────────┐
//!       │                     │                    │ Binding │───────────► │ Disputed │
//!       │                     │                    └─────────┘             └──────────┘
//!       │   withdraw          │   deadline passed
//!       ▼                     ▼
//! ┌───────────┐        ┌─────────┐
//! │ Withdrawn │        │ Expired │
//! └───────────┘        └─────────┘
//! ```
//!
//! `Withdrawn` is reachable from every non-terminal, non-`Binding` state;
//! `Expired` from `Negotiating` and `ConsensusReached` via the timeout sweep.
//! Once `Binding`, only `dispute` may move the negotiation, and only to
//! `Disputed`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::canonical::{self, CanonicalError};
use crate::crypto::{ChainHasher, encode_hash};

/// Maximum number of participants in one negotiation.
///
/// The protocol assumes a bounded, small set of named parties, not an open
/// network.
pub const MAX_PARTICIPANTS: usize = 16;

/// Maximum number of archived terms revisions per negotiation.
pub const MAX_TERMS_HISTORY: usize = 256;

/// Lifecycle status of a negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    /// Created; waiting for declared participants to join.
    Initiated,
    /// All participants joined; offers and acceptances flow.
    Negotiating,
    /// Every participant accepted the current terms version.
    ConsensusReached,
    /// Finalized by every participant; terms are committed. Irreversible
    /// except through a dispute.
    Binding,
    /// Ended by a participant before becoming binding. Terminal.
    Withdrawn,
    /// Deadline passed without consensus or finalization. Terminal.
    Expired,
    /// A binding outcome is under appeal.
    Disputed,
}

impl NegotiationStatus {
    /// Returns the status name used in error messages and receipts.
    #[must_use]
    pub const fn state_name(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Negotiating => "negotiating",
            Self::ConsensusReached => "consensus_reached",
            Self::Binding => "binding",
            Self::Withdrawn => "withdrawn",
            Self::Expired => "expired",
            Self::Disputed => "disputed",
        }
    }

    /// Whether no further protocol action can move this negotiation.
    ///
    /// `Binding` is not terminal in this sense: `dispute` may still move it.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self {
            Self::Withdrawn | Self::Expired | Self::Disputed => true,
            Self::Initiated | Self::Negotiating | Self::ConsensusReached | Self::Binding => false,
        }
    }
}

/// An archived terms version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsRevision {
    /// The version number the terms carried while current.
    pub version: u64,

    /// The archived terms.
    pub terms: Value,

    /// Who authored this version.
    pub author_id: String,

    /// When the version was superseded or recorded.
    pub recorded_at: DateTime<Utc>,
}

/// A multi-party bargaining session over versioned terms.
///
/// `revision` is the optimistic-concurrency token checked and incremented by
/// the store on every write; it is unrelated to `terms_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiation {
    /// Unique negotiation identifier.
    pub id: String,

    /// The actor who created the negotiation. Termination receipts from the
    /// timeout sweep land on this actor's chain.
    pub initiator_id: String,

    /// Ordered set of declared participants (minimum 2, includes the
    /// initiator). Order is significant: the binding hash commits to it.
    pub participants: Vec<String>,

    /// Participants who have joined so far.
    pub joined: BTreeSet<String>,

    /// Current lifecycle status.
    pub status: NegotiationStatus,

    /// The terms currently on the table.
    pub current_terms: Value,

    /// Monotonic version counter for `current_terms`, starting at 1.
    pub terms_version: u64,

    /// Who authored the current terms version.
    pub terms_author: String,

    /// Superseded versions, oldest first, with author and timestamp.
    pub terms_history: Vec<TermsRevision>,

    /// Actors who accepted the *current* terms version, mapped to the
    /// content hash of their accepting receipt. Cleared whenever
    /// `current_terms` changes version. The key set is the acceptance set;
    /// the hashes feed the binding hash.
    pub acceptances: BTreeMap<String, String>,

    /// Actors who finalized after consensus.
    pub finalizations: BTreeSet<String>,

    /// Deadline for reaching consensus while `Negotiating`.
    pub negotiation_deadline: DateTime<Utc>,

    /// Deadline for finalization, stamped on entering `ConsensusReached`.
    pub finalization_deadline: Option<DateTime<Utc>>,

    /// Commitment over final terms and acceptances. Set exactly once, at the
    /// transition to `Binding`.
    pub binding_hash: Option<String>,

    /// When the negotiation was created.
    pub created_at: DateTime<Utc>,

    /// Optimistic-concurrency token, incremented by the store on write.
    pub revision: u64,
}

impl Negotiation {
    /// Builds a freshly-initiated negotiation with the initiator joined.
    #[must_use]
    pub fn new(
        id: String,
        participants: Vec<String>,
        initiator: &str,
        initial_terms: Value,
        negotiation_deadline: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut joined = BTreeSet::new();
        joined.insert(initiator.to_string());

        Self {
            id,
            initiator_id: initiator.to_string(),
            participants,
            joined,
            status: NegotiationStatus::Initiated,
            current_terms: initial_terms,
            terms_version: 1,
            terms_author: initiator.to_string(),
            terms_history: Vec::new(),
            acceptances: BTreeMap::new(),
            finalizations: BTreeSet::new(),
            negotiation_deadline,
            finalization_deadline: None,
            binding_hash: None,
            created_at,
            revision: 0,
        }
    }

    /// Whether the actor is a declared participant.
    #[must_use]
    pub fn is_participant(&self, actor_id: &str) -> bool {
        self.participants.iter().any(|p| p == actor_id)
    }

    /// Whether every declared participant has joined.
    #[must_use]
    pub fn all_joined(&self) -> bool {
        self.participants.iter().all(|p| self.joined.contains(p))
    }

    /// Whether every declared participant accepted the current terms
    /// version.
    #[must_use]
    pub fn has_full_acceptance(&self) -> bool {
        self.participants
            .iter()
            .all(|p| self.acceptances.contains_key(p))
    }

    /// Whether every declared participant finalized.
    #[must_use]
    pub fn all_finalized(&self) -> bool {
        self.participants
            .iter()
            .all(|p| self.finalizations.contains(p))
    }
}

/// Computes the binding hash committing a negotiation's outcome.
///
/// The digest covers the canonical JSON of
///
/// ```text
/// {"acceptance_hashes": [<accepting-receipt content hash per participant,
///                         in participant order>],
///  "negotiation_id": <string>,
///  "terms": <canonical current terms>,
///  "terms_version": <integer>}
/// ```
///
/// so it changes if any accepted term byte, any acceptance, or the
/// participant order changes.
///
/// # Errors
///
/// Returns a [`CanonicalError`] if the terms can no longer be canonicalized.
pub fn compute_binding_hash(negotiation: &Negotiation) -> Result<String, CanonicalError> {
    let acceptance_hashes: Vec<&str> = negotiation
        .participants
        .iter()
        .filter_map(|p| negotiation.acceptances.get(p).map(String::as_str))
        .collect();

    let preimage = json!({
        "acceptance_hashes": acceptance_hashes,
        "negotiation_id": negotiation.id,
        "terms": negotiation.current_terms,
        "terms_version": negotiation.terms_version,
    });
    let bytes = canonical::to_canonical_bytes(&preimage)?;
    Ok(encode_hash(&ChainHasher::digest(&bytes)))
}
