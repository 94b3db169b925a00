//! Appeal state types.
//!
//! # State Machine
//!
//! ```text
//!    open          assign resolver/board        consensus
//! ┌─────────┐      ┌───────────┐              ┌──────────┐
//! │ Pending │────► │ Reviewing │────────────► │ Resolved │
//! └─────────┘      └─────┬─────┘              └──────────┘
//!                        │ deadline breached          ▲
//!                        ▼ (once)                     │ consensus
//!                  ┌───────────┐                      │
//!                  │ Escalated │──────────────────────┘
//!                  └───────────┘
//! ```
//!
//! `Escalated` is reviewing with a widened board and an extended deadline; it
//! may happen at most once. A second deadline breach is reported by the SLA
//! sweep, never auto-escalated.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of dispute grounds text.
pub const MAX_GROUNDS_LENGTH: usize = 4096;

/// Maximum length of vote reasoning text.
pub const MAX_REASONING_LENGTH: usize = 4096;

/// Lifecycle status of an appeal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealStatus {
    /// Opened; no resolver or board assigned yet.
    Pending,
    /// Under review by the assigned resolver and board.
    Reviewing,
    /// Reviewing after the single permitted SLA escalation.
    Escalated,
    /// A resolution was recorded. Terminal.
    Resolved,
}

impl AppealStatus {
    /// Returns the status name used in error messages and receipts.
    #[must_use]
    pub const fn state_name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewing => "reviewing",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
        }
    }

    /// Whether the appeal can still accept votes.
    #[must_use]
    pub const fn accepts_votes(&self) -> bool {
        match self {
            Self::Reviewing | Self::Escalated => true,
            Self::Pending | Self::Resolved => false,
        }
    }
}

/// What kind of thing an appeal disputes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// A binding negotiation outcome.
    Negotiation,
    /// A trust-affecting event recorded in the ledger.
    TrustEvent,
}

impl SubjectKind {
    /// Returns the wire tag for this subject kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Negotiation => "negotiation",
            Self::TrustEvent => "trust_event",
        }
    }
}

/// Reference to the disputed negotiation or event.
///
/// Carries every actor directly party to the disputed action so that
/// separation-of-duties checks need nothing beyond the appeal itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    /// The kind of subject.
    pub kind: SubjectKind,

    /// Negotiation id or receipt id, depending on `kind`.
    pub reference: String,

    /// Actors referenced as subject of the disputed action (for a
    /// negotiation: its participants).
    pub parties: Vec<String>,

    /// The actor who originally reported the disputed event, if any.
    pub reporter_id: Option<String>,
}

/// A board member's decision on an appeal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    /// The disputed outcome stands.
    Uphold,
    /// The disputed outcome is reversed.
    Overturn,
}

impl VoteDecision {
    /// Returns the wire tag for this decision.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uphold => "uphold",
            Self::Overturn => "overturn",
        }
    }
}

/// A vote that was later overwritten, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupersededVote {
    /// The earlier decision.
    pub decision: VoteDecision,

    /// The earlier reasoning.
    pub reasoning: String,

    /// When the earlier vote was cast.
    pub cast_at: DateTime<Utc>,
}

/// The current vote of one board member, with its overwrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// The member's current decision.
    pub decision: VoteDecision,

    /// The member's reasoning.
    pub reasoning: String,

    /// When the current vote was cast.
    pub cast_at: DateTime<Utc>,

    /// Earlier votes by the same member, oldest first. Never discarded.
    pub superseded: Vec<SupersededVote>,
}

/// The recorded outcome of an appeal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// The winning decision.
    pub decision: VoteDecision,

    /// Votes to uphold at resolution time.
    pub uphold_count: usize,

    /// Votes to overturn at resolution time.
    pub overturn_count: usize,

    /// When consensus was detected.
    pub decided_at: DateTime<Utc>,
}

/// A formal dispute over a binding outcome or trust-affecting event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appeal {
    /// Unique appeal identifier.
    pub id: String,

    /// What is disputed.
    pub subject: SubjectRef,

    /// Who opened the dispute.
    pub appellant_id: String,

    /// Why the outcome is disputed.
    pub grounds: String,

    /// Current lifecycle status.
    pub status: AppealStatus,

    /// The assigned impartial resolver, once assigned.
    pub resolver_id: Option<String>,

    /// The assigned review board, once assigned.
    pub review_board: Vec<String>,

    /// Current vote per board member, with overwrite history.
    pub votes: BTreeMap<String, VoteRecord>,

    /// When the appeal was opened.
    pub opened_at: DateTime<Utc>,

    /// Deadline for resolution; extended once on escalation.
    pub review_deadline: DateTime<Utc>,

    /// Set when the single permitted escalation happens.
    pub escalated_at: Option<DateTime<Utc>>,

    /// The recorded outcome, once resolved.
    pub resolution: Option<Resolution>,

    /// When the appeal was resolved.
    pub resolved_at: Option<DateTime<Utc>>,

    /// Optimistic-concurrency token, incremented by the store on write.
    pub revision: u64,
}

impl Appeal {
    /// Builds a freshly-opened appeal.
    #[must_use]
    pub fn new(
        id: String,
        subject: SubjectRef,
        appellant_id: String,
        grounds: String,
        opened_at: DateTime<Utc>,
        review_deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            subject,
            appellant_id,
            grounds,
            status: AppealStatus::Pending,
            resolver_id: None,
            review_board: Vec::new(),
            votes: BTreeMap::new(),
            opened_at,
            review_deadline,
            escalated_at: None,
            resolution: None,
            resolved_at: None,
            revision: 0,
        }
    }

    /// Actors barred from adjudicating this appeal: the appellant, the
    /// original reporter, and every actor referenced as subject of the
    /// disputed action.
    #[must_use]
    pub fn barred_actors(&self) -> BTreeSet<&str> {
        let mut barred: BTreeSet<&str> = BTreeSet::new();
        barred.insert(self.appellant_id.as_str());
        if let Some(reporter) = &self.subject.reporter_id {
            barred.insert(reporter.as_str());
        }
        for party in &self.subject.parties {
            barred.insert(party.as_str());
        }
        barred
    }

    /// Whether the actor sits on the review board.
    #[must_use]
    pub fn is_board_member(&self, actor_id: &str) -> bool {
        self.review_board.iter().any(|m| m == actor_id)
    }

    /// Current (uphold, overturn) tally.
    ///
    /// Only votes from current board members count; a vote left behind by a
    /// superseded board never sways the tally.
    #[must_use]
    pub fn tally(&self) -> (usize, usize) {
        let mut uphold = 0;
        let mut overturn = 0;
        for (voter, vote) in &self.votes {
            if !self.is_board_member(voter) {
                continue;
            }
            match vote.decision {
                VoteDecision::Uphold => uphold += 1,
                VoteDecision::Overturn => overturn += 1,
            }
        }
        (uphold, overturn)
    }

    /// Returns the consensus decision, if one side's votes strictly exceed
    /// half the board size.
    ///
    /// Ties and partial tallies return `None`; there is no tie-break rule.
    #[must_use]
    pub fn consensus(&self) -> Option<VoteDecision> {
        if self.review_board.is_empty() {
            return None;
        }
        let majority = self.review_board.len() / 2;
        let (uphold, overturn) = self.tally();
        if uphold > majority {
            Some(VoteDecision::Uphold)
        } else if overturn > majority {
            Some(VoteDecision::Overturn)
        } else {
            None
        }
    }

    /// Whether the single permitted escalation has already happened.
    #[must_use]
    pub const fn has_escalated(&self) -> bool {
        self.escalated_at.is_some()
    }
}
