//! Chained protocol messages.
//!
//! Every protocol action on a negotiation (offer, accept, finalize,
//! withdraw, dispute) is recorded as a [`NegotiationMessage`], hash-chained
//! within that negotiation exactly the way receipts chain within an actor:
//! the canonical form embeds the previous message's content hash.
//!
//! # Hashing Contract
//!
//! `content_hash` is the Blake3 digest of the canonical JSON of
//!
//! ```text
//! {"actor_id": <string>,
//!  "created_at": <RFC 3339 UTC, microsecond precision, Z suffix>,
//!  "kind": <tag>,
//!  "negotiation_id": <string>,
//!  "payload": <canonical payload>,
//!  "previous_hash": <64 lowercase hex chars>,
//!  "terms_version": <integer>}
//! ```
//!
//! rendered lowercase hex. The first message of a negotiation uses the
//! all-zero sentinel as `previous_hash`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::canonical;
use crate::crypto::{ChainHasher, Hash, encode_hash};
use crate::ledger::receipt::{ReceiptError, canonical_timestamp, truncate_to_micros};

/// The protocol action a message records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// New or counter terms were proposed.
    Offer,
    /// The current terms version was accepted.
    Accept,
    /// Consensus terms were finalized by one participant.
    Finalize,
    /// The negotiation was withdrawn.
    Withdraw,
    /// The binding outcome was disputed.
    Dispute,
}

impl MessageKind {
    /// Returns the wire tag used in canonical forms.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Accept => "accept",
            Self::Finalize => "finalize",
            Self::Withdraw => "withdraw",
            Self::Dispute => "dispute",
        }
    }
}

/// A validated, not-yet-sealed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    negotiation_id: String,
    actor_id: String,
    kind: MessageKind,
    terms_version: u64,
    payload: Value,
}

impl MessageDraft {
    /// Validates message input into a draft.
    ///
    /// # Errors
    ///
    /// Returns a [`ReceiptError`] if the payload cannot be canonicalized.
    pub fn new(
        negotiation_id: impl Into<String>,
        actor_id: impl Into<String>,
        kind: MessageKind,
        terms_version: u64,
        payload: Value,
    ) -> Result<Self, ReceiptError> {
        canonical::to_canonical_bytes(&payload)?;
        Ok(Self {
            negotiation_id: negotiation_id.into(),
            actor_id: actor_id.into(),
            kind,
            terms_version,
            payload,
        })
    }

    /// The negotiation whose chain this message extends.
    #[must_use]
    pub fn negotiation_id(&self) -> &str {
        &self.negotiation_id
    }

    /// Seals the draft at the given chain position.
    ///
    /// Called by stores inside the negotiation's critical section.
    #[must_use]
    pub fn seal(self, previous_hash: &Hash, created_at: DateTime<Utc>) -> NegotiationMessage {
        let created_at = truncate_to_micros(created_at);
        let previous_hex = encode_hash(previous_hash);
        let preimage = json!({
            "actor_id": self.actor_id,
            "created_at": canonical_timestamp(created_at),
            "kind": self.kind.as_str(),
            "negotiation_id": self.negotiation_id,
            "payload": self.payload,
            "previous_hash": previous_hex,
            "terms_version": self.terms_version,
        });
        // The draft was validated, so canonicalization is infallible here.
        let bytes = canonical::to_canonical_bytes(&preimage).unwrap_or_default();
        let content_hash = encode_hash(&ChainHasher::digest(&bytes));

        NegotiationMessage {
            id: Uuid::new_v4().to_string(),
            negotiation_id: self.negotiation_id,
            actor_id: self.actor_id,
            kind: self.kind,
            terms_version: self.terms_version,
            payload: self.payload,
            created_at,
            content_hash,
            previous_hash: previous_hex,
        }
    }
}

/// An audit record of one protocol action, chained within its negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationMessage {
    /// Unique message identifier.
    pub id: String,

    /// The negotiation this message belongs to.
    pub negotiation_id: String,

    /// The participant who acted.
    pub actor_id: String,

    /// The protocol action performed.
    pub kind: MessageKind,

    /// The terms version in effect when the action was taken.
    pub terms_version: u64,

    /// Action detail (offered terms, withdrawal note, dispute grounds).
    pub payload: Value,

    /// When the message was sealed.
    pub created_at: DateTime<Utc>,

    /// Blake3 digest of the canonical form, lowercase hex.
    pub content_hash: String,

    /// `content_hash` of the negotiation's preceding message, or the
    /// all-zero sentinel.
    pub previous_hash: String,
}

impl NegotiationMessage {
    /// Recomputes the content hash from the stored fields.
    ///
    /// Returns `None` if the stored payload can no longer be canonicalized.
    #[must_use]
    pub fn recompute_content_hash(&self) -> Option<String> {
        let preimage = json!({
            "actor_id": self.actor_id,
            "created_at": canonical_timestamp(self.created_at),
            "kind": self.kind.as_str(),
            "negotiation_id": self.negotiation_id,
            "payload": self.payload,
            "previous_hash": self.previous_hash,
            "terms_version": self.terms_version,
        });
        let bytes = canonical::to_canonical_bytes(&preimage).ok()?;
        Some(encode_hash(&ChainHasher::digest(&bytes)))
    }
}
