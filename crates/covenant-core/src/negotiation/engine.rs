//! Negotiation engine.
//!
//! Drives the versioned offer/counter-offer protocol among the declared
//! participants toward a binding commitment or a terminated outcome. Every
//! transition emits a [`Receipt`](crate::ledger::Receipt) on the acting
//! actor's chain; the five protocol actions (offer, accept, finalize,
//! withdraw, dispute) additionally emit a chained
//! [`NegotiationMessage`](super::message::NegotiationMessage).
//!
//! # Atomicity
//!
//! Every mutation is a read-validate-write cycle guarded by the store's
//! per-entity revision check. A losing writer re-reads and re-validates a
//! bounded number of times; two concurrent `accept` calls can therefore
//! never both observe a stale acceptance set and both claim the consensus
//! transition. Operations on different negotiations never contend.
//!
//! Acceptances record the content hash of the accepting receipt, so the
//! receipt is sealed before the state write. If the state write then loses
//! its revision race to a conflicting transition, the receipt remains on the
//! actor's chain as a record of the attempt while the negotiation state is
//! untouched.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::NegotiationError;
use super::message::{MessageDraft, MessageKind, NegotiationMessage};
use super::state::{
    MAX_PARTICIPANTS, MAX_TERMS_HISTORY, Negotiation, NegotiationStatus, TermsRevision,
    compute_binding_hash,
};
use crate::appeals::error::AppealError;
use crate::appeals::state::{Appeal, MAX_GROUNDS_LENGTH, SubjectKind, SubjectRef};
use crate::appeals::workflow::AppealsWorkflow;
use crate::canonical;
use crate::config::CovenantConfig;
use crate::ledger::{ActionKind, ReceiptLedger};
use crate::store::{StoreError, TrustStore};

/// Outcome of one [`NegotiationEngine::check_timeouts`] sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TimeoutSweep {
    /// Ids of negotiations moved to `Expired` by this sweep.
    pub expired: Vec<String>,

    /// Ids skipped because a concurrent writer transitioned them first.
    pub skipped: Vec<String>,
}

/// The negotiation engine over a shared storage substrate.
pub struct NegotiationEngine<S> {
    store: Arc<S>,
    ledger: ReceiptLedger<S>,
    appeals: AppealsWorkflow<S>,
    config: CovenantConfig,
}

impl<S: TrustStore> NegotiationEngine<S> {
    /// Creates an engine over the given store.
    #[must_use]
    pub fn new(store: Arc<S>, config: CovenantConfig) -> Self {
        let ledger = ReceiptLedger::new(Arc::clone(&store));
        let appeals = AppealsWorkflow::new(Arc::clone(&store), config.appeals.clone());
        Self {
            store,
            ledger,
            appeals,
            config,
        }
    }

    /// Read-only access to the negotiation, if it exists.
    pub fn get_negotiation(&self, negotiation_id: &str) -> Result<Option<Negotiation>, NegotiationError> {
        Ok(self.store.negotiation(negotiation_id)?)
    }

    /// The negotiation's chained protocol messages, oldest first.
    pub fn get_messages(
        &self,
        negotiation_id: &str,
    ) -> Result<Vec<NegotiationMessage>, NegotiationError> {
        Ok(self.store.messages_for_negotiation(negotiation_id)?)
    }

    /// Creates a negotiation among the declared participants.
    ///
    /// The initiator counts as joined; the negotiation enters `Negotiating`
    /// once the last declared participant joins.
    ///
    /// # Errors
    ///
    /// Rejects fewer than two participants, duplicates, a participant set
    /// that omits the initiator, or terms outside the canonical profile.
    pub fn create(
        &self,
        initiator: &str,
        participants: Vec<String>,
        initial_terms: Value,
        negotiation_deadline: DateTime<Utc>,
    ) -> Result<Negotiation, NegotiationError> {
        validate_participants(&participants, initiator)?;
        canonical::to_canonical_bytes(&initial_terms)?;

        let negotiation = Negotiation::new(
            Uuid::new_v4().to_string(),
            participants,
            initiator,
            initial_terms,
            negotiation_deadline,
            Utc::now(),
        );
        self.store.insert_negotiation(&negotiation)?;

        self.ledger.append(
            initiator,
            ActionKind::NegotiationCreate,
            json!({
                "negotiation_id": negotiation.id,
                "participants": negotiation.participants,
                "negotiation_deadline": negotiation.negotiation_deadline.to_rfc3339(),
            }),
        )?;

        info!(
            negotiation_id = %negotiation.id,
            participants = negotiation.participants.len(),
            "negotiation created"
        );
        Ok(negotiation)
    }

    /// Joins a declared participant into the negotiation.
    ///
    /// When the last declared participant joins, the status moves to
    /// `Negotiating`.
    pub fn join(&self, negotiation_id: &str, actor_id: &str) -> Result<Negotiation, NegotiationError> {
        let negotiation = self.mutate(negotiation_id, "join", |n| {
            match n.status {
                NegotiationStatus::Initiated => {},
                _ => {
                    return Err(invalid_transition(n, "join"));
                },
            }
            if !n.is_participant(actor_id) {
                return Err(NegotiationError::NotAParticipant {
                    negotiation_id: n.id.clone(),
                    actor_id: actor_id.to_string(),
                });
            }
            if !n.joined.insert(actor_id.to_string()) {
                return Err(NegotiationError::AlreadyJoined {
                    negotiation_id: n.id.clone(),
                    actor_id: actor_id.to_string(),
                });
            }
            if n.all_joined() {
                n.status = NegotiationStatus::Negotiating;
            }
            Ok(())
        })?;

        self.ledger.append(
            actor_id,
            ActionKind::NegotiationJoin,
            json!({
                "negotiation_id": negotiation.id,
                "status": negotiation.status.state_name(),
            }),
        )?;

        if negotiation.status == NegotiationStatus::Negotiating {
            info!(negotiation_id, "all participants joined, negotiating");
        }
        Ok(negotiation)
    }

    /// Proposes new terms, superseding the current version.
    ///
    /// Archives the outgoing version to the history, increments the
    /// monotonic version counter, and clears every acceptance: consensus is
    /// tied to version numbers, never to content equality.
    pub fn offer(
        &self,
        negotiation_id: &str,
        actor_id: &str,
        new_terms: Value,
    ) -> Result<Negotiation, NegotiationError> {
        canonical::to_canonical_bytes(&new_terms)?;

        let negotiation = self.mutate(negotiation_id, "offer", |n| {
            match n.status {
                NegotiationStatus::Negotiating => {},
                _ => return Err(invalid_transition(n, "offer")),
            }
            if !n.is_participant(actor_id) {
                return Err(NegotiationError::NotAParticipant {
                    negotiation_id: n.id.clone(),
                    actor_id: actor_id.to_string(),
                });
            }
            if n.terms_history.len() >= MAX_TERMS_HISTORY {
                return Err(NegotiationError::TermsHistoryFull {
                    negotiation_id: n.id.clone(),
                    max: MAX_TERMS_HISTORY,
                });
            }

            n.terms_history.push(TermsRevision {
                version: n.terms_version,
                terms: n.current_terms.clone(),
                author_id: n.terms_author.clone(),
                recorded_at: Utc::now(),
            });
            n.current_terms = new_terms.clone();
            n.terms_version += 1;
            n.terms_author = actor_id.to_string();
            n.acceptances.clear();
            Ok(())
        })?;

        self.store.append_message(MessageDraft::new(
            negotiation_id,
            actor_id,
            MessageKind::Offer,
            negotiation.terms_version,
            json!({"terms": negotiation.current_terms}),
        )?)?;
        self.ledger.append(
            actor_id,
            ActionKind::NegotiationOffer,
            json!({
                "negotiation_id": negotiation.id,
                "terms_version": negotiation.terms_version,
            }),
        )?;

        debug!(
            negotiation_id,
            terms_version = negotiation.terms_version,
            "terms offered, acceptances cleared"
        );
        Ok(negotiation)
    }

    /// Accepts the current terms version.
    ///
    /// `accepted_version` is the version the actor saw; a superseded version
    /// is rejected with [`NegotiationError::TermsVersionMismatch`], never
    /// silently retargeted. When the last participant accepts, the status
    /// moves to `ConsensusReached` and the finalization window opens.
    pub fn accept(
        &self,
        negotiation_id: &str,
        actor_id: &str,
        accepted_version: u64,
    ) -> Result<Negotiation, NegotiationError> {
        // Validate against current state before sealing the receipt.
        {
            let current = self.load(negotiation_id)?;
            validate_accept(&current, actor_id, accepted_version)?;
        }

        // The acceptance receipt is sealed first: its content hash is what
        // the negotiation records, and what the binding hash later commits
        // to.
        let receipt = self.ledger.append(
            actor_id,
            ActionKind::NegotiationAccept,
            json!({
                "negotiation_id": negotiation_id,
                "terms_version": accepted_version,
            }),
        )?;

        let receipt_hash = receipt.content_hash.clone();
        let result = self.mutate(negotiation_id, "accept", |n| {
            validate_accept(n, actor_id, accepted_version)?;
            n.acceptances.insert(actor_id.to_string(), receipt_hash.clone());
            if n.has_full_acceptance() {
                n.status = NegotiationStatus::ConsensusReached;
                n.finalization_deadline = Some(
                    Utc::now()
                        + Duration::seconds(
                            i64::try_from(self.config.negotiation.finalization_window_secs)
                                .unwrap_or(i64::MAX),
                        ),
                );
            }
            Ok(())
        });

        let negotiation = match result {
            Ok(n) => n,
            Err(err) => {
                // The receipt stays on the actor's chain as a record of the
                // attempt; the negotiation state was not touched.
                warn!(
                    negotiation_id,
                    actor_id,
                    receipt_id = %receipt.id,
                    "acceptance superseded before it could be recorded"
                );
                return Err(err);
            },
        };

        self.store.append_message(MessageDraft::new(
            negotiation_id,
            actor_id,
            MessageKind::Accept,
            accepted_version,
            json!({"acceptance_receipt": receipt.content_hash}),
        )?)?;

        if negotiation.status == NegotiationStatus::ConsensusReached {
            info!(negotiation_id, terms_version = accepted_version, "consensus reached");
        }
        Ok(negotiation)
    }

    /// Records that the actor finalizes the consensus terms.
    ///
    /// When every participant has finalized, the binding hash is computed
    /// and the negotiation becomes `Binding`, irreversibly.
    pub fn finalize(
        &self,
        negotiation_id: &str,
        actor_id: &str,
    ) -> Result<Negotiation, NegotiationError> {
        let negotiation = self.mutate(negotiation_id, "finalize", |n| {
            match n.status {
                NegotiationStatus::ConsensusReached => {},
                _ => return Err(invalid_transition(n, "finalize")),
            }
            if !n.is_participant(actor_id) {
                return Err(NegotiationError::NotAParticipant {
                    negotiation_id: n.id.clone(),
                    actor_id: actor_id.to_string(),
                });
            }
            if !n.finalizations.insert(actor_id.to_string()) {
                return Err(NegotiationError::AlreadyFinalized {
                    negotiation_id: n.id.clone(),
                    actor_id: actor_id.to_string(),
                });
            }
            if n.all_finalized() {
                n.binding_hash = Some(compute_binding_hash(n)?);
                n.status = NegotiationStatus::Binding;
            }
            Ok(())
        })?;

        self.store.append_message(MessageDraft::new(
            negotiation_id,
            actor_id,
            MessageKind::Finalize,
            negotiation.terms_version,
            json!({}),
        )?)?;
        self.ledger.append(
            actor_id,
            ActionKind::NegotiationFinalize,
            json!({
                "negotiation_id": negotiation.id,
                "terms_version": negotiation.terms_version,
            }),
        )?;

        if negotiation.status == NegotiationStatus::Binding {
            self.ledger.append(
                actor_id,
                ActionKind::NegotiationBind,
                json!({
                    "negotiation_id": negotiation.id,
                    "binding_hash": negotiation.binding_hash,
                }),
            )?;
            info!(
                negotiation_id,
                binding_hash = negotiation.binding_hash.as_deref().unwrap_or(""),
                "negotiation binding"
            );
        }
        Ok(negotiation)
    }

    /// Withdraws the negotiation for all parties.
    ///
    /// One withdrawal ends the whole negotiation; valid from any
    /// non-terminal, non-`Binding` state.
    pub fn withdraw(
        &self,
        negotiation_id: &str,
        actor_id: &str,
    ) -> Result<Negotiation, NegotiationError> {
        let negotiation = self.mutate(negotiation_id, "withdraw", |n| {
            match n.status {
                NegotiationStatus::Initiated
                | NegotiationStatus::Negotiating
                | NegotiationStatus::ConsensusReached => {},
                NegotiationStatus::Binding
                | NegotiationStatus::Withdrawn
                | NegotiationStatus::Expired
                | NegotiationStatus::Disputed => {
                    return Err(invalid_transition(n, "withdraw"));
                },
            }
            if !n.is_participant(actor_id) {
                return Err(NegotiationError::NotAParticipant {
                    negotiation_id: n.id.clone(),
                    actor_id: actor_id.to_string(),
                });
            }
            n.status = NegotiationStatus::Withdrawn;
            Ok(())
        })?;

        self.store.append_message(MessageDraft::new(
            negotiation_id,
            actor_id,
            MessageKind::Withdraw,
            negotiation.terms_version,
            json!({}),
        )?)?;
        self.ledger.append(
            actor_id,
            ActionKind::NegotiationWithdraw,
            json!({"negotiation_id": negotiation.id}),
        )?;

        info!(negotiation_id, actor_id, "negotiation withdrawn");
        Ok(negotiation)
    }

    /// Disputes a binding outcome, opening an appeal.
    ///
    /// Valid only from `Binding`. The appellant need not be a participant: a
    /// binding agreement can affect third parties. The opened appeal bars
    /// every participant of the disputed negotiation, and the appellant,
    /// from adjudicating it.
    pub fn dispute(
        &self,
        negotiation_id: &str,
        actor_id: &str,
        grounds: impl Into<String>,
    ) -> Result<(Negotiation, Appeal), NegotiationError> {
        let grounds = grounds.into();
        // Reject bad appeal input before touching the negotiation, so a
        // failed open can never strand it in Disputed without an appeal.
        if actor_id.is_empty() {
            return Err(Box::new(AppealError::InvalidInput {
                reason: "appellant id must not be empty".to_string(),
            })
            .into());
        }
        if grounds.len() > MAX_GROUNDS_LENGTH {
            return Err(Box::new(AppealError::InvalidInput {
                reason: format!("grounds exceed {MAX_GROUNDS_LENGTH} bytes"),
            })
            .into());
        }

        let negotiation = self.mutate(negotiation_id, "dispute", |n| {
            match n.status {
                NegotiationStatus::Binding => {},
                _ => return Err(invalid_transition(n, "dispute")),
            }
            n.status = NegotiationStatus::Disputed;
            Ok(())
        })?;

        let appeal = self
            .appeals
            .open(
                SubjectRef {
                    kind: SubjectKind::Negotiation,
                    reference: negotiation.id.clone(),
                    parties: negotiation.participants.clone(),
                    reporter_id: None,
                },
                actor_id,
                grounds.clone(),
            )
            .map_err(Box::new)?;

        self.store.append_message(MessageDraft::new(
            negotiation_id,
            actor_id,
            MessageKind::Dispute,
            negotiation.terms_version,
            json!({"appeal_id": appeal.id, "grounds": grounds}),
        )?)?;
        self.ledger.append(
            actor_id,
            ActionKind::NegotiationDispute,
            json!({
                "negotiation_id": negotiation.id,
                "appeal_id": appeal.id,
            }),
        )?;

        warn!(negotiation_id, appeal_id = %appeal.id, "binding outcome disputed");
        Ok((negotiation, appeal))
    }

    /// Moves every deadline-breached negotiation to `Expired`.
    ///
    /// Invoked periodically by an external scheduler with its notion of
    /// `now`. Idempotent: a second sweep over the same state expires
    /// nothing, and exactly one receipt is emitted per expired negotiation.
    pub fn check_timeouts(&self, now: DateTime<Utc>) -> Result<TimeoutSweep, NegotiationError> {
        let candidates = self.store.negotiations_with_status(&[
            NegotiationStatus::Negotiating,
            NegotiationStatus::ConsensusReached,
        ])?;

        let mut sweep = TimeoutSweep::default();
        for candidate in candidates {
            let deadline = match candidate.status {
                NegotiationStatus::ConsensusReached => candidate
                    .finalization_deadline
                    .unwrap_or(candidate.negotiation_deadline),
                _ => candidate.negotiation_deadline,
            };
            if now <= deadline {
                continue;
            }

            let mut expired = candidate.clone();
            expired.status = NegotiationStatus::Expired;
            match self.store.update_negotiation(&expired, candidate.revision) {
                Ok(_) => {},
                Err(StoreError::RevisionConflict { .. }) => {
                    // Someone else transitioned it first; their receipt
                    // covers the outcome.
                    sweep.skipped.push(candidate.id);
                    continue;
                },
                Err(err) => return Err(err.into()),
            }

            self.ledger.append(
                expired.initiator_id.as_str(),
                ActionKind::NegotiationExpire,
                json!({
                    "negotiation_id": expired.id,
                    "deadline": deadline.to_rfc3339(),
                }),
            )?;
            info!(negotiation_id = %expired.id, "negotiation expired");
            sweep.expired.push(expired.id);
        }
        Ok(sweep)
    }

    fn load(&self, negotiation_id: &str) -> Result<Negotiation, NegotiationError> {
        self.store
            .negotiation(negotiation_id)?
            .ok_or_else(|| NegotiationError::NotFound {
                negotiation_id: negotiation_id.to_string(),
            })
    }

    /// Read-validate-write cycle with bounded optimistic retries.
    ///
    /// The closure re-runs against fresh state after every lost race, so
    /// validation always reflects what is actually stored.
    fn mutate(
        &self,
        negotiation_id: &str,
        operation: &'static str,
        apply: impl Fn(&mut Negotiation) -> Result<(), NegotiationError>,
    ) -> Result<Negotiation, NegotiationError> {
        let retries = self.config.negotiation.max_cas_retries;
        for attempt in 0..=retries {
            let mut negotiation = self.load(negotiation_id)?;
            let expected = negotiation.revision;
            apply(&mut negotiation)?;

            match self.store.update_negotiation(&negotiation, expected) {
                Ok(revision) => {
                    negotiation.revision = revision;
                    return Ok(negotiation);
                },
                Err(StoreError::RevisionConflict { .. }) if attempt < retries => {
                    debug!(negotiation_id, operation, attempt, "revision conflict, retrying");
                },
                Err(StoreError::RevisionConflict { .. }) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Err(NegotiationError::ContentionExhausted {
            negotiation_id: negotiation_id.to_string(),
            retries,
        })
    }
}

fn invalid_transition(negotiation: &Negotiation, operation: &'static str) -> NegotiationError {
    NegotiationError::InvalidTransition {
        negotiation_id: negotiation.id.clone(),
        from_state: negotiation.status.state_name(),
        operation,
    }
}

fn validate_accept(
    negotiation: &Negotiation,
    actor_id: &str,
    accepted_version: u64,
) -> Result<(), NegotiationError> {
    match negotiation.status {
        NegotiationStatus::Negotiating => {},
        _ => return Err(invalid_transition(negotiation, "accept")),
    }
    if !negotiation.is_participant(actor_id) {
        return Err(NegotiationError::NotAParticipant {
            negotiation_id: negotiation.id.clone(),
            actor_id: actor_id.to_string(),
        });
    }
    if accepted_version != negotiation.terms_version {
        return Err(NegotiationError::TermsVersionMismatch {
            negotiation_id: negotiation.id.clone(),
            accepted: accepted_version,
            current: negotiation.terms_version,
        });
    }
    if negotiation.acceptances.contains_key(actor_id) {
        return Err(NegotiationError::AlreadyAccepted {
            negotiation_id: negotiation.id.clone(),
            actor_id: actor_id.to_string(),
            terms_version: accepted_version,
        });
    }
    Ok(())
}

fn validate_participants(
    participants: &[String],
    initiator: &str,
) -> Result<(), NegotiationError> {
    if participants.len() < 2 {
        return Err(NegotiationError::InvalidParticipants {
            reason: format!("need at least 2 participants, got {}", participants.len()),
        });
    }
    if participants.len() > MAX_PARTICIPANTS {
        return Err(NegotiationError::InvalidParticipants {
            reason: format!(
                "{} participants exceeds the maximum of {MAX_PARTICIPANTS}",
                participants.len()
            ),
        });
    }
    let mut seen = std::collections::BTreeSet::new();
    for participant in participants {
        if participant.is_empty() {
            return Err(NegotiationError::InvalidParticipants {
                reason: "participant ids must not be empty".to_string(),
            });
        }
        if !seen.insert(participant.as_str()) {
            return Err(NegotiationError::InvalidParticipants {
                reason: format!("duplicate participant: {participant}"),
            });
        }
    }
    if !seen.contains(initiator) {
        return Err(NegotiationError::InvalidParticipants {
            reason: format!("initiator {initiator} must be among the participants"),
        });
    }
    Ok(())
}
