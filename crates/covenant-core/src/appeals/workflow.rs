//! Appeals resolution workflow.
//!
//! Drives a dispute from `Pending` through review to `Resolved` under a
//! service-level deadline: impartial resolver and board assignment with
//! separation of duties, vote collection with an overwrite audit trail,
//! strict-majority consensus detection, and a single capped SLA escalation.
//!
//! Every mutating call emits a receipt tagged with the appeal id and the
//! transition performed, so the full resolution history is independently
//! auditable from the ledger alone. Votes land on the voter's chain;
//! transitions with no single acting participant (assignment, escalation,
//! resolution) land on the appellant's chain, which therefore carries the
//! appeal's complete lifecycle.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::eligibility;
use super::error::AppealError;
use super::state::{
    Appeal, AppealStatus, MAX_GROUNDS_LENGTH, MAX_REASONING_LENGTH, Resolution, SubjectRef,
    SupersededVote, VoteDecision, VoteRecord,
};
use crate::config::{AppealsConfig, MAX_BOARD_SIZE, MIN_BOARD_SIZE};
use crate::ledger::{ActionKind, ReceiptLedger};
use crate::store::{StoreError, TrustStore};

/// One appeal past its review deadline, reported by the SLA sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaViolation {
    /// The breaching appeal.
    pub appeal_id: String,

    /// Its status at sweep time.
    pub status: AppealStatus,

    /// The breached deadline.
    pub review_deadline: DateTime<Utc>,

    /// Whether the single permitted escalation is still available.
    pub can_escalate: bool,
}

/// The appeals workflow over a shared storage substrate.
pub struct AppealsWorkflow<S> {
    store: Arc<S>,
    ledger: ReceiptLedger<S>,
    config: AppealsConfig,
}

impl<S: TrustStore> AppealsWorkflow<S> {
    /// Creates a workflow over the given store.
    #[must_use]
    pub fn new(store: Arc<S>, config: AppealsConfig) -> Self {
        let ledger = ReceiptLedger::new(Arc::clone(&store));
        Self {
            store,
            ledger,
            config,
        }
    }

    /// Read-only access to the appeal, if it exists.
    pub fn get_appeal(&self, appeal_id: &str) -> Result<Option<Appeal>, AppealError> {
        Ok(self.store.appeal(appeal_id)?)
    }

    /// Opens a dispute over a binding outcome or trust-affecting event.
    pub fn open(
        &self,
        subject: SubjectRef,
        appellant_id: &str,
        grounds: impl Into<String>,
    ) -> Result<Appeal, AppealError> {
        let grounds = grounds.into();
        if appellant_id.is_empty() {
            return Err(AppealError::InvalidInput {
                reason: "appellant id must not be empty".to_string(),
            });
        }
        if subject.reference.is_empty() {
            return Err(AppealError::InvalidInput {
                reason: "subject reference must not be empty".to_string(),
            });
        }
        if grounds.len() > MAX_GROUNDS_LENGTH {
            return Err(AppealError::InvalidInput {
                reason: format!("grounds exceed {MAX_GROUNDS_LENGTH} bytes"),
            });
        }

        let opened_at = Utc::now();
        let review_deadline = opened_at + self.review_window();
        let appeal = Appeal::new(
            Uuid::new_v4().to_string(),
            subject,
            appellant_id.to_string(),
            grounds,
            opened_at,
            review_deadline,
        );
        self.store.insert_appeal(&appeal)?;

        self.ledger.append(
            appellant_id,
            ActionKind::AppealOpen,
            json!({
                "appeal_id": appeal.id,
                "subject_kind": appeal.subject.kind.as_str(),
                "subject_reference": appeal.subject.reference,
                "transition": "opened",
            }),
        )?;

        info!(appeal_id = %appeal.id, appellant_id, "appeal opened");
        Ok(appeal)
    }

    /// Assigns an impartial resolver drawn uniformly at random from the
    /// eligible candidates.
    ///
    /// Moves a `Pending` appeal to `Reviewing`.
    ///
    /// # Errors
    ///
    /// Returns [`AppealError::NoEligibleResolver`] when no candidate
    /// satisfies separation of duties.
    pub fn assign_resolver(
        &self,
        appeal_id: &str,
        candidate_pool: &[String],
    ) -> Result<Appeal, AppealError> {
        self.assign_resolver_with_rng(appeal_id, candidate_pool, &mut rand::thread_rng())
    }

    /// [`Self::assign_resolver`] with an injected RNG for deterministic
    /// tests.
    pub fn assign_resolver_with_rng<R: Rng>(
        &self,
        appeal_id: &str,
        candidate_pool: &[String],
        rng: &mut R,
    ) -> Result<Appeal, AppealError> {
        let appeal = self.mutate(appeal_id, "assign_resolver", |a| {
            match a.status {
                AppealStatus::Pending => {},
                AppealStatus::Reviewing if a.resolver_id.is_none() => {},
                _ => return Err(invalid_transition(a, "assign_resolver")),
            }

            let resolver = eligibility::select_resolver(a, candidate_pool, rng).ok_or_else(
                || AppealError::NoEligibleResolver {
                    appeal_id: a.id.clone(),
                },
            )?;
            a.resolver_id = Some(resolver);
            a.status = AppealStatus::Reviewing;
            Ok(())
        })?;

        self.ledger.append(
            appeal.appellant_id.as_str(),
            ActionKind::AppealAssignResolver,
            json!({
                "appeal_id": appeal.id,
                "resolver_id": appeal.resolver_id,
                "transition": "resolver_assigned",
            }),
        )?;

        info!(
            appeal_id,
            resolver_id = appeal.resolver_id.as_deref().unwrap_or(""),
            "resolver assigned"
        );
        Ok(appeal)
    }

    /// Assigns a review board of `size` members (3..=7), drawn uniformly at
    /// random from the eligible candidates, never overlapping the resolver.
    ///
    /// Moves a `Pending` appeal to `Reviewing`. A board only changes after
    /// this through escalation.
    pub fn assign_review_board(
        &self,
        appeal_id: &str,
        size: usize,
        candidate_pool: &[String],
    ) -> Result<Appeal, AppealError> {
        self.assign_review_board_with_rng(appeal_id, size, candidate_pool, &mut rand::thread_rng())
    }

    /// [`Self::assign_review_board`] with an injected RNG for deterministic
    /// tests.
    pub fn assign_review_board_with_rng<R: Rng>(
        &self,
        appeal_id: &str,
        size: usize,
        candidate_pool: &[String],
        rng: &mut R,
    ) -> Result<Appeal, AppealError> {
        if !(MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&size) {
            return Err(AppealError::BoardSizeOutOfRange {
                size,
                min: MIN_BOARD_SIZE,
                max: MAX_BOARD_SIZE,
            });
        }

        let appeal = self.mutate(appeal_id, "assign_review_board", |a| {
            match a.status {
                AppealStatus::Pending | AppealStatus::Reviewing => {},
                _ => return Err(invalid_transition(a, "assign_review_board")),
            }
            if !a.review_board.is_empty() {
                return Err(AppealError::BoardAlreadyAssigned {
                    appeal_id: a.id.clone(),
                });
            }

            let board = eligibility::select_board(a, candidate_pool, size, rng).map_err(
                |available| AppealError::InsufficientEligibleActors {
                    appeal_id: a.id.clone(),
                    needed: size,
                    available,
                },
            )?;
            a.review_board = board;
            a.status = AppealStatus::Reviewing;
            Ok(())
        })?;

        self.ledger.append(
            appeal.appellant_id.as_str(),
            ActionKind::AppealAssignBoard,
            json!({
                "appeal_id": appeal.id,
                "review_board": appeal.review_board,
                "transition": "board_assigned",
            }),
        )?;

        info!(appeal_id, board_size = appeal.review_board.len(), "review board assigned");
        Ok(appeal)
    }

    /// Records one board member's vote.
    ///
    /// Re-voting overwrites the member's decision; the prior vote is
    /// retained in the record's history, never discarded. When one side's
    /// votes strictly exceed half the board, the appeal resolves
    /// immediately.
    pub fn record_vote(
        &self,
        appeal_id: &str,
        voter_id: &str,
        decision: VoteDecision,
        reasoning: impl Into<String>,
    ) -> Result<Appeal, AppealError> {
        let reasoning = reasoning.into();
        if reasoning.len() > MAX_REASONING_LENGTH {
            return Err(AppealError::InvalidInput {
                reason: format!("reasoning exceeds {MAX_REASONING_LENGTH} bytes"),
            });
        }

        let mut was_revote = false;
        let appeal = self.mutate(appeal_id, "record_vote", |a| {
            if !a.status.accepts_votes() {
                return Err(invalid_transition(a, "record_vote"));
            }
            if !a.is_board_member(voter_id) {
                return Err(AppealError::NotABoardMember {
                    appeal_id: a.id.clone(),
                    actor_id: voter_id.to_string(),
                });
            }

            let now = Utc::now();
            was_revote = match a.votes.get_mut(voter_id) {
                Some(existing) => {
                    existing.superseded.push(SupersededVote {
                        decision: existing.decision,
                        reasoning: std::mem::take(&mut existing.reasoning),
                        cast_at: existing.cast_at,
                    });
                    existing.decision = decision;
                    existing.reasoning = reasoning.clone();
                    existing.cast_at = now;
                    true
                },
                None => {
                    a.votes.insert(
                        voter_id.to_string(),
                        VoteRecord {
                            decision,
                            reasoning: reasoning.clone(),
                            cast_at: now,
                            superseded: Vec::new(),
                        },
                    );
                    false
                },
            };

            if let Some(winner) = a.consensus() {
                let (uphold, overturn) = a.tally();
                a.resolution = Some(Resolution {
                    decision: winner,
                    uphold_count: uphold,
                    overturn_count: overturn,
                    decided_at: now,
                });
                a.resolved_at = Some(now);
                a.status = AppealStatus::Resolved;
            }
            Ok(())
        })?;

        self.ledger.append(
            voter_id,
            ActionKind::AppealVote,
            json!({
                "appeal_id": appeal.id,
                "decision": decision.as_str(),
                "revote": was_revote,
                "transition": "vote_recorded",
            }),
        )?;

        if let Some(resolution) = &appeal.resolution {
            self.ledger.append(
                appeal.appellant_id.as_str(),
                ActionKind::AppealResolve,
                json!({
                    "appeal_id": appeal.id,
                    "decision": resolution.decision.as_str(),
                    "uphold": resolution.uphold_count,
                    "overturn": resolution.overturn_count,
                    "transition": "resolved",
                }),
            )?;
            info!(
                appeal_id,
                decision = resolution.decision.as_str(),
                "appeal resolved by board consensus"
            );
        } else {
            debug!(appeal_id, voter_id, "vote recorded, no consensus yet");
        }
        Ok(appeal)
    }

    /// Returns the consensus decision once a strict majority of the board
    /// has voted the same way.
    ///
    /// Ties and partial tallies return `None`: "no consensus yet", not a
    /// tie-break.
    pub fn check_consensus(&self, appeal_id: &str) -> Result<Option<VoteDecision>, AppealError> {
        let appeal = self.load(appeal_id)?;
        if let Some(resolution) = &appeal.resolution {
            return Ok(Some(resolution.decision));
        }
        Ok(appeal.consensus())
    }

    /// Escalates a deadline-breached appeal: widens the board to the
    /// escalated size, extends the deadline once, and moves to `Escalated`.
    ///
    /// At most one escalation per appeal; a second breach is reported by
    /// [`Self::check_sla_violations`], never auto-escalated.
    pub fn escalate(
        &self,
        appeal_id: &str,
        candidate_pool: &[String],
        now: DateTime<Utc>,
    ) -> Result<Appeal, AppealError> {
        self.escalate_with_rng(appeal_id, candidate_pool, now, &mut rand::thread_rng())
    }

    /// [`Self::escalate`] with an injected RNG for deterministic tests.
    pub fn escalate_with_rng<R: Rng>(
        &self,
        appeal_id: &str,
        candidate_pool: &[String],
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Appeal, AppealError> {
        let size = self.config.escalated_board_size;
        let appeal = self.mutate(appeal_id, "escalate", |a| {
            if a.has_escalated() {
                return Err(AppealError::AlreadyEscalated {
                    appeal_id: a.id.clone(),
                });
            }
            match a.status {
                AppealStatus::Pending | AppealStatus::Reviewing => {},
                _ => return Err(invalid_transition(a, "escalate")),
            }
            if now <= a.review_deadline {
                return Err(AppealError::DeadlineNotBreached {
                    appeal_id: a.id.clone(),
                    deadline: a.review_deadline,
                });
            }

            let board = eligibility::select_board(a, candidate_pool, size, rng).map_err(
                |available| AppealError::InsufficientEligibleActors {
                    appeal_id: a.id.clone(),
                    needed: size,
                    available,
                },
            )?;
            // Carried-over members keep their votes; votes from replaced
            // members drop out of the tally by board-membership filtering.
            a.review_board = board;
            a.review_deadline += self.extension_window();
            a.escalated_at = Some(now);
            a.status = AppealStatus::Escalated;
            Ok(())
        })?;

        self.ledger.append(
            appeal.appellant_id.as_str(),
            ActionKind::AppealEscalate,
            json!({
                "appeal_id": appeal.id,
                "review_board": appeal.review_board,
                "review_deadline": appeal.review_deadline.to_rfc3339(),
                "transition": "escalated",
            }),
        )?;

        warn!(appeal_id, "appeal escalated: wider board, extended deadline");
        Ok(appeal)
    }

    /// Lists unresolved appeals past their review deadline.
    ///
    /// A sweep for an external scheduler; the caller decides whether to
    /// escalate each violation. Read-only and idempotent.
    pub fn check_sla_violations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SlaViolation>, AppealError> {
        let open = self.store.appeals_with_status(&[
            AppealStatus::Pending,
            AppealStatus::Reviewing,
            AppealStatus::Escalated,
        ])?;

        let mut violations = Vec::new();
        for appeal in open {
            if now <= appeal.review_deadline {
                continue;
            }
            let violation = SlaViolation {
                appeal_id: appeal.id.clone(),
                status: appeal.status,
                review_deadline: appeal.review_deadline,
                can_escalate: !appeal.has_escalated(),
            };
            warn!(
                appeal_id = %violation.appeal_id,
                can_escalate = violation.can_escalate,
                "appeal past review deadline"
            );
            violations.push(violation);
        }
        Ok(violations)
    }

    fn review_window(&self) -> Duration {
        Duration::seconds(i64::try_from(self.config.review_window_secs).unwrap_or(i64::MAX))
    }

    fn extension_window(&self) -> Duration {
        Duration::seconds(
            i64::try_from(self.config.escalation_extension_secs).unwrap_or(i64::MAX),
        )
    }

    fn load(&self, appeal_id: &str) -> Result<Appeal, AppealError> {
        self.store
            .appeal(appeal_id)?
            .ok_or_else(|| AppealError::NotFound {
                appeal_id: appeal_id.to_string(),
            })
    }

    /// Read-validate-write cycle with bounded optimistic retries.
    ///
    /// The closure re-runs against fresh state after every lost race.
    fn mutate(
        &self,
        appeal_id: &str,
        operation: &'static str,
        mut apply: impl FnMut(&mut Appeal) -> Result<(), AppealError>,
    ) -> Result<Appeal, AppealError> {
        let retries = self.config.max_cas_retries;
        for attempt in 0..=retries {
            let mut appeal = self.load(appeal_id)?;
            let expected = appeal.revision;
            apply(&mut appeal)?;

            match self.store.update_appeal(&appeal, expected) {
                Ok(revision) => {
                    appeal.revision = revision;
                    return Ok(appeal);
                },
                Err(StoreError::RevisionConflict { .. }) if attempt < retries => {
                    debug!(appeal_id, operation, attempt, "revision conflict, retrying");
                },
                Err(StoreError::RevisionConflict { .. }) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Err(AppealError::ContentionExhausted {
            appeal_id: appeal_id.to_string(),
            retries,
        })
    }
}

fn invalid_transition(appeal: &Appeal, operation: &'static str) -> AppealError {
    AppealError::InvalidTransition {
        appeal_id: appeal.id.clone(),
        from_state: appeal.status.state_name(),
        operation,
    }
}
