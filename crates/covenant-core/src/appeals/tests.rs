//! Appeals workflow scenario and property tests.
//!
//! Exercises resolver and board assignment under separation of duties
//! (property-tested across many seeds), the voting and consensus rules, the
//! single capped escalation, and the SLA sweep.

use std::sync::Arc;

use chrono::{Duration, Utc};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;

use super::error::AppealError;
use super::state::{Appeal, AppealStatus, SubjectKind, SubjectRef, VoteDecision};
use super::workflow::AppealsWorkflow;
use crate::config::CovenantConfig;
use crate::ledger::{ActionKind, ReceiptLedger};
use crate::negotiation::NegotiationEngine;
use crate::store::MemoryStore;

fn workflow() -> (Arc<MemoryStore>, AppealsWorkflow<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let workflow = AppealsWorkflow::new(Arc::clone(&store), CovenantConfig::default().appeals);
    (store, workflow)
}

fn subject() -> SubjectRef {
    SubjectRef {
        kind: SubjectKind::Negotiation,
        reference: "neg-1".to_string(),
        parties: vec!["alice".to_string(), "bob".to_string()],
        reporter_id: Some("rita".to_string()),
    }
}

fn open_appeal(workflow: &AppealsWorkflow<MemoryStore>) -> Appeal {
    workflow
        .open(subject(), "carol", "terms were misrepresented")
        .unwrap()
}

fn pool() -> Vec<String> {
    ["alice", "bob", "carol", "rita", "dave", "erin", "frank", "grace", "heidi", "ivan"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

const BARRED: [&str; 4] = ["alice", "bob", "carol", "rita"];

#[test]
fn test_open_validates_input() {
    let (_, workflow) = workflow();

    let empty_appellant = workflow.open(subject(), "", "grounds");
    assert!(matches!(
        empty_appellant,
        Err(AppealError::InvalidInput { .. })
    ));

    let long_grounds = workflow.open(subject(), "carol", "g".repeat(5000));
    assert!(matches!(long_grounds, Err(AppealError::InvalidInput { .. })));

    let appeal = open_appeal(&workflow);
    assert_eq!(appeal.status, AppealStatus::Pending);
    assert!(appeal.review_deadline > appeal.opened_at);
}

#[test]
fn test_assign_resolver_moves_to_reviewing() {
    let (store, workflow) = workflow();
    let appeal = open_appeal(&workflow);

    let mut rng = StdRng::seed_from_u64(11);
    let assigned = workflow
        .assign_resolver_with_rng(&appeal.id, &pool(), &mut rng)
        .unwrap();
    assert_eq!(assigned.status, AppealStatus::Reviewing);
    let resolver = assigned.resolver_id.clone().unwrap();
    assert!(!BARRED.contains(&resolver.as_str()));

    // Re-assignment is a state violation.
    let again = workflow.assign_resolver_with_rng(&appeal.id, &pool(), &mut rng);
    assert!(matches!(again, Err(AppealError::InvalidTransition { .. })));

    // The transition landed on the appellant's chain.
    let ledger = ReceiptLedger::new(store);
    let kinds: Vec<ActionKind> = ledger
        .get_chain("carol")
        .unwrap()
        .iter()
        .map(|r| r.action_kind)
        .collect();
    assert!(kinds.contains(&ActionKind::AppealOpen));
    assert!(kinds.contains(&ActionKind::AppealAssignResolver));
}

#[test]
fn test_assign_resolver_with_no_eligible_pool() {
    let (_, workflow) = workflow();
    let appeal = open_appeal(&workflow);

    let barred_only: Vec<String> = BARRED.iter().map(|s| (*s).to_string()).collect();
    let mut rng = StdRng::seed_from_u64(11);
    let result = workflow.assign_resolver_with_rng(&appeal.id, &barred_only, &mut rng);
    assert!(matches!(result, Err(AppealError::NoEligibleResolver { .. })));
}

#[test]
fn test_assign_board_guards() {
    let (_, workflow) = workflow();
    let appeal = open_appeal(&workflow);
    let mut rng = StdRng::seed_from_u64(11);

    let too_small = workflow.assign_review_board_with_rng(&appeal.id, 2, &pool(), &mut rng);
    assert!(matches!(
        too_small,
        Err(AppealError::BoardSizeOutOfRange { size: 2, .. })
    ));
    let too_large = workflow.assign_review_board_with_rng(&appeal.id, 8, &pool(), &mut rng);
    assert!(matches!(
        too_large,
        Err(AppealError::BoardSizeOutOfRange { size: 8, .. })
    ));

    let thin_pool: Vec<String> =
        ["dave", "erin"].iter().map(|s| (*s).to_string()).collect();
    let insufficient =
        workflow.assign_review_board_with_rng(&appeal.id, 3, &thin_pool, &mut rng);
    assert!(matches!(
        insufficient,
        Err(AppealError::InsufficientEligibleActors { needed: 3, available: 2, .. })
    ));

    let assigned = workflow
        .assign_review_board_with_rng(&appeal.id, 3, &pool(), &mut rng)
        .unwrap();
    assert_eq!(assigned.status, AppealStatus::Reviewing);
    assert_eq!(assigned.review_board.len(), 3);

    let again = workflow.assign_review_board_with_rng(&appeal.id, 3, &pool(), &mut rng);
    assert!(matches!(again, Err(AppealError::BoardAlreadyAssigned { .. })));
}

#[test]
fn test_voting_to_resolution() {
    let (store, workflow) = workflow();
    let appeal = open_appeal(&workflow);
    let mut rng = StdRng::seed_from_u64(42);

    // Votes before a board exists are state violations.
    let early = workflow.record_vote(&appeal.id, "dave", VoteDecision::Uphold, "early");
    assert!(matches!(early, Err(AppealError::InvalidTransition { .. })));

    let assigned = workflow
        .assign_review_board_with_rng(&appeal.id, 3, &pool(), &mut rng)
        .unwrap();
    let board = assigned.review_board.clone();

    let outsider = workflow.record_vote(&appeal.id, "carol", VoteDecision::Overturn, "mine!");
    assert!(matches!(outsider, Err(AppealError::NotABoardMember { .. })));

    let after_first = workflow
        .record_vote(&appeal.id, &board[0], VoteDecision::Uphold, "chain verifies")
        .unwrap();
    assert_eq!(after_first.status, AppealStatus::Reviewing);
    assert_eq!(workflow.check_consensus(&appeal.id).unwrap(), None);

    // A single overturn cannot outweigh it; still no strict majority.
    workflow
        .record_vote(&appeal.id, &board[1], VoteDecision::Overturn, "disagree")
        .unwrap();
    assert_eq!(workflow.check_consensus(&appeal.id).unwrap(), None);

    // The second uphold is the strict majority (2 of 3): resolved upheld.
    let resolved = workflow
        .record_vote(&appeal.id, &board[2], VoteDecision::Uphold, "agree with first")
        .unwrap();
    assert_eq!(resolved.status, AppealStatus::Resolved);
    let resolution = resolved.resolution.clone().unwrap();
    assert_eq!(resolution.decision, VoteDecision::Uphold);
    assert_eq!(resolution.uphold_count, 2);
    assert_eq!(resolution.overturn_count, 1);
    assert!(resolved.resolved_at.is_some());
    assert_eq!(
        workflow.check_consensus(&appeal.id).unwrap(),
        Some(VoteDecision::Uphold)
    );

    // Voting after resolution is a state violation.
    let late = workflow.record_vote(&appeal.id, &board[1], VoteDecision::Uphold, "flip");
    assert!(matches!(late, Err(AppealError::InvalidTransition { .. })));

    // Votes landed on voter chains, the resolution on the appellant's.
    let ledger = ReceiptLedger::new(store);
    let voter_chain = ledger.get_chain(&board[0]).unwrap();
    assert!(voter_chain.iter().any(|r| r.action_kind == ActionKind::AppealVote));
    let appellant_kinds: Vec<ActionKind> = ledger
        .get_chain("carol")
        .unwrap()
        .iter()
        .map(|r| r.action_kind)
        .collect();
    assert!(appellant_kinds.contains(&ActionKind::AppealResolve));
}

#[test]
fn test_revote_overwrites_with_audit_trail() {
    let (_, workflow) = workflow();
    let appeal = open_appeal(&workflow);
    let mut rng = StdRng::seed_from_u64(42);

    let assigned = workflow
        .assign_review_board_with_rng(&appeal.id, 3, &pool(), &mut rng)
        .unwrap();
    let voter = assigned.review_board[0].clone();

    workflow
        .record_vote(&appeal.id, &voter, VoteDecision::Overturn, "first impression")
        .unwrap();
    let after_revote = workflow
        .record_vote(&appeal.id, &voter, VoteDecision::Uphold, "checked the chain")
        .unwrap();

    let record = &after_revote.votes[&voter];
    assert_eq!(record.decision, VoteDecision::Uphold);
    assert_eq!(record.reasoning, "checked the chain");
    assert_eq!(record.superseded.len(), 1);
    assert_eq!(record.superseded[0].decision, VoteDecision::Overturn);
    assert_eq!(record.superseded[0].reasoning, "first impression");
}

#[test]
fn test_escalation_is_gated_and_capped() {
    let (_, workflow) = workflow();
    let appeal = open_appeal(&workflow);
    let mut rng = StdRng::seed_from_u64(5);

    workflow
        .assign_review_board_with_rng(&appeal.id, 3, &pool(), &mut rng)
        .unwrap();

    let before_breach = workflow.escalate_with_rng(&appeal.id, &pool(), Utc::now(), &mut rng);
    assert!(matches!(
        before_breach,
        Err(AppealError::DeadlineNotBreached { .. })
    ));

    let first_breach = appeal.review_deadline + Duration::seconds(1);
    let escalated = workflow
        .escalate_with_rng(&appeal.id, &pool(), first_breach, &mut rng)
        .unwrap();
    assert_eq!(escalated.status, AppealStatus::Escalated);
    assert_eq!(escalated.review_board.len(), 5);
    assert!(escalated.review_deadline > appeal.review_deadline);
    assert!(escalated.has_escalated());

    // Escalated appeals still take votes.
    let voter = escalated.review_board[0].clone();
    workflow
        .record_vote(&appeal.id, &voter, VoteDecision::Overturn, "fresh look")
        .unwrap();

    // The cap: a second breach is reported, never re-escalated.
    let second_breach = escalated.review_deadline + Duration::seconds(1);
    let again = workflow.escalate_with_rng(&appeal.id, &pool(), second_breach, &mut rng);
    assert!(matches!(again, Err(AppealError::AlreadyEscalated { .. })));

    let violations = workflow.check_sla_violations(second_breach).unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].appeal_id, appeal.id);
    assert!(!violations[0].can_escalate);
}

#[test]
fn test_sla_sweep_reports_only_breaches() {
    let (_, workflow) = workflow();
    let appeal = open_appeal(&workflow);

    assert!(workflow.check_sla_violations(Utc::now()).unwrap().is_empty());

    let past = appeal.review_deadline + Duration::seconds(1);
    let violations = workflow.check_sla_violations(past).unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].status, AppealStatus::Pending);
    assert!(violations[0].can_escalate);
}

#[test]
fn test_disputed_negotiation_resolves_through_board() {
    // End-to-end: Alice and Bob bind, Carol disputes, an impartial board
    // upholds the outcome.
    let store = Arc::new(MemoryStore::new());
    let engine = NegotiationEngine::new(Arc::clone(&store), CovenantConfig::default());
    let workflow = AppealsWorkflow::new(Arc::clone(&store), CovenantConfig::default().appeals);

    let negotiation = engine
        .create(
            "alice",
            vec!["alice".to_string(), "bob".to_string()],
            json!({"scope": "shared-memory"}),
            Utc::now() + Duration::hours(24),
        )
        .unwrap();
    engine.join(&negotiation.id, "bob").unwrap();
    engine.accept(&negotiation.id, "alice", 1).unwrap();
    engine.accept(&negotiation.id, "bob", 1).unwrap();
    engine.finalize(&negotiation.id, "alice").unwrap();
    engine.finalize(&negotiation.id, "bob").unwrap();

    let (_, appeal) = engine
        .dispute(&negotiation.id, "carol", "terms were misrepresented")
        .unwrap();

    let mut rng = StdRng::seed_from_u64(97);
    let with_resolver = workflow
        .assign_resolver_with_rng(&appeal.id, &pool(), &mut rng)
        .unwrap();
    let resolver = with_resolver.resolver_id.clone().unwrap();
    assert!(!["alice", "bob", "carol"].contains(&resolver.as_str()));

    let with_board = workflow
        .assign_review_board_with_rng(&appeal.id, 3, &pool(), &mut rng)
        .unwrap();
    let board = with_board.review_board.clone();
    for member in &board {
        assert!(!["alice", "bob", "carol"].contains(&member.as_str()));
        assert_ne!(member, &resolver);
    }

    workflow
        .record_vote(&appeal.id, &board[0], VoteDecision::Uphold, "binding hash checks out")
        .unwrap();
    workflow
        .record_vote(&appeal.id, &board[1], VoteDecision::Overturn, "process concern")
        .unwrap();
    let resolved = workflow
        .record_vote(&appeal.id, &board[2], VoteDecision::Uphold, "agree: upheld")
        .unwrap();

    assert_eq!(resolved.status, AppealStatus::Resolved);
    assert_eq!(resolved.resolution.unwrap().decision, VoteDecision::Uphold);
}

proptest! {
    /// Across arbitrary seeds, neither the resolver nor any board member is
    /// ever the appellant, the reporter, or a party to the disputed action.
    #[test]
    fn prop_assignment_respects_separation_of_duties(seed in any::<u64>()) {
        let (_, workflow) = workflow();
        let appeal = open_appeal(&workflow);

        let mut rng = StdRng::seed_from_u64(seed);
        let with_resolver = workflow
            .assign_resolver_with_rng(&appeal.id, &pool(), &mut rng)
            .unwrap();
        let resolver = with_resolver.resolver_id.clone().unwrap();
        prop_assert!(!BARRED.contains(&resolver.as_str()));

        let with_board = workflow
            .assign_review_board_with_rng(&appeal.id, 3, &pool(), &mut rng)
            .unwrap();
        for member in &with_board.review_board {
            prop_assert!(!BARRED.contains(&member.as_str()));
            prop_assert_ne!(member, &resolver);
        }
    }

    /// Consensus requires a strict majority: with a 3-member board, any
    /// two matching votes decide, and 1-1 splits never do.
    #[test]
    fn prop_strict_majority_decides(first_uphold in any::<bool>(), second_uphold in any::<bool>()) {
        let (_, workflow) = workflow();
        let appeal = open_appeal(&workflow);
        let mut rng = StdRng::seed_from_u64(3);
        let assigned = workflow
            .assign_review_board_with_rng(&appeal.id, 3, &pool(), &mut rng)
            .unwrap();
        let board = assigned.review_board.clone();

        let to_decision = |uphold: bool| if uphold { VoteDecision::Uphold } else { VoteDecision::Overturn };

        workflow
            .record_vote(&appeal.id, &board[0], to_decision(first_uphold), "r1")
            .unwrap();
        prop_assert_eq!(workflow.check_consensus(&appeal.id).unwrap(), None);

        workflow
            .record_vote(&appeal.id, &board[1], to_decision(second_uphold), "r2")
            .unwrap();

        let expected = if first_uphold == second_uphold {
            Some(to_decision(first_uphold))
        } else {
            None
        };
        prop_assert_eq!(workflow.check_consensus(&appeal.id).unwrap(), expected);
    }
}
