//! Receipt type and sealing.
//!
//! A receipt is the immutable record of one action taken by one actor. The
//! ledger does not interpret payload semantics; it records them under a
//! closed [`ActionKind`] tag and chains the record to the actor's previous
//! receipt.
//!
//! # Hashing Contract
//!
//! `content_hash` is the Blake3 digest of the canonical JSON of
//!
//! ```text
//! {"action_kind": <tag>,
//!  "actor_id": <string>,
//!  "created_at": <RFC 3339 UTC, microsecond precision, Z suffix>,
//!  "payload": <canonical payload>,
//!  "previous_hash": <64 lowercase hex chars>}
//! ```
//!
//! rendered lowercase hex. `id` and `content_hash` itself are excluded from
//! the preimage. The first receipt of an actor uses the all-zero sentinel as
//! `previous_hash`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

use crate::canonical::{self, CanonicalError};
use crate::crypto::{ChainHasher, Hash, encode_hash};
use crate::error::ErrorCategory;

/// Maximum length for actor identifiers.
pub const MAX_ACTOR_ID_LENGTH: usize = 256;

/// Maximum canonical payload size in bytes.
///
/// Bounds receipt rows so a single caller cannot bloat the ledger.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Errors raised while drafting a receipt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReceiptError {
    /// The actor id is empty, too long, or contains control characters.
    #[error("invalid actor id: {reason}")]
    InvalidActorId {
        /// Why the id was rejected.
        reason: String,
    },

    /// The canonical payload exceeds [`MAX_PAYLOAD_BYTES`].
    #[error("payload too large: {actual} bytes exceeds {max}")]
    PayloadTooLarge {
        /// Canonical size of the rejected payload.
        actual: usize,
        /// The enforced ceiling.
        max: usize,
    },

    /// The payload cannot be canonicalized.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

impl ReceiptError {
    /// Drafting failures are always input problems.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

/// The closed set of action kinds the ledger records.
///
/// Wire tags are the snake_case variant names. Adding a variant forces every
/// match site in the crate to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// A caller recorded a memory entry.
    MemoryCreate,
    /// A caller updated a memory entry.
    MemoryUpdate,
    /// A caller completed a task.
    TaskComplete,
    /// A negotiation was created.
    NegotiationCreate,
    /// A participant joined a negotiation.
    NegotiationJoin,
    /// New terms were offered.
    NegotiationOffer,
    /// The current terms version was accepted.
    NegotiationAccept,
    /// A participant finalized consensus terms.
    NegotiationFinalize,
    /// A negotiation became binding.
    NegotiationBind,
    /// A negotiation was withdrawn.
    NegotiationWithdraw,
    /// A negotiation expired past its deadline.
    NegotiationExpire,
    /// A binding negotiation was disputed.
    NegotiationDispute,
    /// An appeal was opened.
    AppealOpen,
    /// A resolver was assigned to an appeal.
    AppealAssignResolver,
    /// A review board was assigned to an appeal.
    AppealAssignBoard,
    /// A board member voted on an appeal.
    AppealVote,
    /// An appeal was escalated.
    AppealEscalate,
    /// An appeal was resolved.
    AppealResolve,
}

impl ActionKind {
    /// Returns the wire tag used in canonical forms.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryCreate => "memory_create",
            Self::MemoryUpdate => "memory_update",
            Self::TaskComplete => "task_complete",
            Self::NegotiationCreate => "negotiation_create",
            Self::NegotiationJoin => "negotiation_join",
            Self::NegotiationOffer => "negotiation_offer",
            Self::NegotiationAccept => "negotiation_accept",
            Self::NegotiationFinalize => "negotiation_finalize",
            Self::NegotiationBind => "negotiation_bind",
            Self::NegotiationWithdraw => "negotiation_withdraw",
            Self::NegotiationExpire => "negotiation_expire",
            Self::NegotiationDispute => "negotiation_dispute",
            Self::AppealOpen => "appeal_open",
            Self::AppealAssignResolver => "appeal_assign_resolver",
            Self::AppealAssignBoard => "appeal_assign_board",
            Self::AppealVote => "appeal_vote",
            Self::AppealEscalate => "appeal_escalate",
            Self::AppealResolve => "appeal_resolve",
        }
    }

    /// Parses a wire tag back into a kind.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "memory_create" => Some(Self::MemoryCreate),
            "memory_update" => Some(Self::MemoryUpdate),
            "task_complete" => Some(Self::TaskComplete),
            "negotiation_create" => Some(Self::NegotiationCreate),
            "negotiation_join" => Some(Self::NegotiationJoin),
            "negotiation_offer" => Some(Self::NegotiationOffer),
            "negotiation_accept" => Some(Self::NegotiationAccept),
            "negotiation_finalize" => Some(Self::NegotiationFinalize),
            "negotiation_bind" => Some(Self::NegotiationBind),
            "negotiation_withdraw" => Some(Self::NegotiationWithdraw),
            "negotiation_expire" => Some(Self::NegotiationExpire),
            "negotiation_dispute" => Some(Self::NegotiationDispute),
            "appeal_open" => Some(Self::AppealOpen),
            "appeal_assign_resolver" => Some(Self::AppealAssignResolver),
            "appeal_assign_board" => Some(Self::AppealAssignBoard),
            "appeal_vote" => Some(Self::AppealVote),
            "appeal_escalate" => Some(Self::AppealEscalate),
            "appeal_resolve" => Some(Self::AppealResolve),
            _ => None,
        }
    }
}

/// A validated, not-yet-sealed receipt.
///
/// Drafts carry everything the caller controls; the store supplies the chain
/// position (`previous_hash`) and timestamp inside its per-actor critical
/// section, so concurrent appends for one actor are linearized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptDraft {
    actor_id: String,
    action_kind: ActionKind,
    payload: Value,
}

impl ReceiptDraft {
    /// Validates caller input into a draft.
    ///
    /// # Errors
    ///
    /// Returns a [`ReceiptError`] if the actor id is malformed or the payload
    /// cannot be canonicalized within [`MAX_PAYLOAD_BYTES`].
    pub fn new(
        actor_id: impl Into<String>,
        action_kind: ActionKind,
        payload: Value,
    ) -> Result<Self, ReceiptError> {
        let actor_id = actor_id.into();
        validate_actor_id(&actor_id)?;

        let canonical = canonical::to_canonical_bytes(&payload)?;
        if canonical.len() > MAX_PAYLOAD_BYTES {
            return Err(ReceiptError::PayloadTooLarge {
                actual: canonical.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }

        Ok(Self {
            actor_id,
            action_kind,
            payload,
        })
    }

    /// The actor whose chain this receipt extends.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// The recorded action kind.
    #[must_use]
    pub const fn action_kind(&self) -> ActionKind {
        self.action_kind
    }

    /// Seals the draft into a receipt at the given chain position.
    ///
    /// Called by stores inside their per-actor critical section. The draft
    /// was validated at construction, so canonicalization cannot fail here.
    /// The timestamp is truncated to microseconds so the stored value always
    /// equals the hashed rendering.
    #[must_use]
    pub fn seal(self, previous_hash: &Hash, created_at: DateTime<Utc>) -> Receipt {
        let created_at = truncate_to_micros(created_at);
        let previous_hex = encode_hash(previous_hash);
        let content_hash = content_hash_hex(
            &self.actor_id,
            self.action_kind,
            &self.payload,
            created_at,
            &previous_hex,
        );

        Receipt {
            id: Uuid::new_v4().to_string(),
            actor_id: self.actor_id,
            action_kind: self.action_kind,
            payload: self.payload,
            created_at,
            content_hash,
            previous_hash: previous_hex,
        }
    }
}

/// An immutable, hash-chained record of one action by one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Unique receipt identifier.
    pub id: String,

    /// The party whose chain this receipt belongs to.
    pub actor_id: String,

    /// What was done. Payload semantics are the caller's business.
    pub action_kind: ActionKind,

    /// Caller-supplied structured data, opaque to the ledger.
    pub payload: Value,

    /// When the receipt was sealed.
    pub created_at: DateTime<Utc>,

    /// Blake3 digest of the canonical form, lowercase hex.
    pub content_hash: String,

    /// `content_hash` of the actor's preceding receipt, or the all-zero
    /// sentinel for the first receipt.
    pub previous_hash: String,
}

impl Receipt {
    /// Recomputes the content hash from the stored fields.
    ///
    /// Returns `None` if the stored payload can no longer be canonicalized,
    /// which itself indicates tampering (drafts are validated before
    /// sealing).
    #[must_use]
    pub fn recompute_content_hash(&self) -> Option<String> {
        recompute_hash_checked(
            &self.actor_id,
            self.action_kind,
            &self.payload,
            self.created_at,
            &self.previous_hash,
        )
    }
}

/// Renders a timestamp in the canonical wire form.
#[must_use]
pub fn canonical_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Truncates a timestamp to microsecond precision, the resolution of the
/// canonical wire form.
#[must_use]
pub fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(at.timestamp_micros()).unwrap_or(at)
}

fn validate_actor_id(actor_id: &str) -> Result<(), ReceiptError> {
    if actor_id.is_empty() {
        return Err(ReceiptError::InvalidActorId {
            reason: "must not be empty".to_string(),
        });
    }
    if actor_id.len() > MAX_ACTOR_ID_LENGTH {
        return Err(ReceiptError::InvalidActorId {
            reason: format!("exceeds {MAX_ACTOR_ID_LENGTH} bytes"),
        });
    }
    if actor_id.chars().any(char::is_control) {
        return Err(ReceiptError::InvalidActorId {
            reason: "contains control characters".to_string(),
        });
    }
    Ok(())
}

fn preimage(
    actor_id: &str,
    action_kind: ActionKind,
    payload: &Value,
    created_at: DateTime<Utc>,
    previous_hash_hex: &str,
) -> Value {
    json!({
        "action_kind": action_kind.as_str(),
        "actor_id": actor_id,
        "created_at": canonical_timestamp(created_at),
        "payload": payload,
        "previous_hash": previous_hash_hex,
    })
}

fn content_hash_hex(
    actor_id: &str,
    action_kind: ActionKind,
    payload: &Value,
    created_at: DateTime<Utc>,
    previous_hash_hex: &str,
) -> String {
    // The draft was validated, so canonicalization is infallible here.
    recompute_hash_checked(actor_id, action_kind, payload, created_at, previous_hash_hex)
        .unwrap_or_else(|| encode_hash(&crate::crypto::GENESIS_PREV_HASH))
}

fn recompute_hash_checked(
    actor_id: &str,
    action_kind: ActionKind,
    payload: &Value,
    created_at: DateTime<Utc>,
    previous_hash_hex: &str,
) -> Option<String> {
    let value = preimage(actor_id, action_kind, payload, created_at, previous_hash_hex);
    let bytes = canonical::to_canonical_bytes(&value).ok()?;
    Some(encode_hash(&ChainHasher::digest(&bytes)))
}
