//! Negotiation engine scenario and property tests.
//!
//! Exercises the full state machine: join choreography, versioned offers
//! clearing acceptances, stale-version rejection, consensus and binding,
//! withdraw/dispute guards, and idempotent timeout sweeps.

use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};
use proptest::prelude::*;
use serde_json::json;

use super::engine::NegotiationEngine;
use super::error::NegotiationError;
use super::state::{Negotiation, NegotiationStatus};
use crate::config::CovenantConfig;
use crate::ledger::{ActionKind, ReceiptLedger};
use crate::store::MemoryStore;

fn engine() -> (Arc<MemoryStore>, NegotiationEngine<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = NegotiationEngine::new(Arc::clone(&store), CovenantConfig::default());
    (store, engine)
}

fn two_party(engine: &NegotiationEngine<MemoryStore>) -> Negotiation {
    let negotiation = engine
        .create(
            "alice",
            vec!["alice".to_string(), "bob".to_string()],
            json!({"scope": "shared-memory", "retention_days": 30}),
            Utc::now() + Duration::hours(24),
        )
        .unwrap();
    engine.join(&negotiation.id, "bob").unwrap()
}

#[test]
fn test_create_validates_participants() {
    let (_, engine) = engine();
    let deadline = Utc::now() + Duration::hours(1);

    let too_few = engine.create("alice", vec!["alice".to_string()], json!({}), deadline);
    assert!(matches!(
        too_few,
        Err(NegotiationError::InvalidParticipants { .. })
    ));

    let duplicate = engine.create(
        "alice",
        vec!["alice".to_string(), "alice".to_string()],
        json!({}),
        deadline,
    );
    assert!(matches!(
        duplicate,
        Err(NegotiationError::InvalidParticipants { .. })
    ));

    let absent_initiator = engine.create(
        "carol",
        vec!["alice".to_string(), "bob".to_string()],
        json!({}),
        deadline,
    );
    assert!(matches!(
        absent_initiator,
        Err(NegotiationError::InvalidParticipants { .. })
    ));

    let float_terms = engine.create(
        "alice",
        vec!["alice".to_string(), "bob".to_string()],
        json!({"rate": 0.5}),
        deadline,
    );
    assert!(matches!(float_terms, Err(NegotiationError::Canonical(_))));
}

#[test]
fn test_join_choreography() {
    let (_, engine) = engine();
    let negotiation = engine
        .create(
            "alice",
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
            json!({}),
            Utc::now() + Duration::hours(1),
        )
        .unwrap();
    assert_eq!(negotiation.status, NegotiationStatus::Initiated);

    let outsider = engine.join(&negotiation.id, "mallory");
    assert!(matches!(
        outsider,
        Err(NegotiationError::NotAParticipant { .. })
    ));

    let rejoin = engine.join(&negotiation.id, "alice");
    assert!(matches!(rejoin, Err(NegotiationError::AlreadyJoined { .. })));

    let after_bob = engine.join(&negotiation.id, "bob").unwrap();
    assert_eq!(after_bob.status, NegotiationStatus::Initiated);

    let after_carol = engine.join(&negotiation.id, "carol").unwrap();
    assert_eq!(after_carol.status, NegotiationStatus::Negotiating);

    let late = engine.join(&negotiation.id, "bob");
    assert!(matches!(
        late,
        Err(NegotiationError::InvalidTransition { from_state: "negotiating", .. })
    ));
}

#[test]
fn test_offer_requires_negotiating_state() {
    let (_, engine) = engine();
    let negotiation = engine
        .create(
            "alice",
            vec!["alice".to_string(), "bob".to_string()],
            json!({}),
            Utc::now() + Duration::hours(1),
        )
        .unwrap();

    let early = engine.offer(&negotiation.id, "alice", json!({"v": 2}));
    assert!(matches!(
        early,
        Err(NegotiationError::InvalidTransition { from_state: "initiated", operation: "offer", .. })
    ));
}

#[test]
fn test_offer_archives_history_and_clears_acceptances() {
    let (_, engine) = engine();
    let negotiation = two_party(&engine);

    engine.accept(&negotiation.id, "alice", 1).unwrap();
    let counter = engine
        .offer(&negotiation.id, "bob", json!({"scope": "shared-memory", "retention_days": 7}))
        .unwrap();

    assert_eq!(counter.terms_version, 2);
    assert_eq!(counter.terms_author, "bob");
    assert!(counter.acceptances.is_empty(), "offer must clear acceptances");
    assert_eq!(counter.terms_history.len(), 1);
    assert_eq!(counter.terms_history[0].version, 1);
    assert_eq!(counter.terms_history[0].author_id, "alice");
    assert_eq!(
        counter.terms_history[0].terms,
        json!({"scope": "shared-memory", "retention_days": 30})
    );
}

#[test]
fn test_stale_accept_is_rejected_not_retargeted() {
    let (_, engine) = engine();
    let negotiation = two_party(&engine);

    engine
        .offer(&negotiation.id, "bob", json!({"scope": "narrow"}))
        .unwrap();

    let stale = engine.accept(&negotiation.id, "alice", 1);
    assert!(matches!(
        stale,
        Err(NegotiationError::TermsVersionMismatch { accepted: 1, current: 2, .. })
    ));

    // The current version is still unaccepted.
    let current = engine.get_negotiation(&negotiation.id).unwrap().unwrap();
    assert!(current.acceptances.is_empty());
}

#[test]
fn test_accept_guards() {
    let (_, engine) = engine();
    let negotiation = two_party(&engine);

    let outsider = engine.accept(&negotiation.id, "mallory", 1);
    assert!(matches!(
        outsider,
        Err(NegotiationError::NotAParticipant { .. })
    ));

    engine.accept(&negotiation.id, "alice", 1).unwrap();
    let double = engine.accept(&negotiation.id, "alice", 1);
    assert!(matches!(double, Err(NegotiationError::AlreadyAccepted { .. })));
}

#[test]
fn test_full_acceptance_reaches_consensus_and_opens_finalization_window() {
    let (_, engine) = engine();
    let negotiation = two_party(&engine);

    let after_alice = engine.accept(&negotiation.id, "alice", 1).unwrap();
    assert_eq!(after_alice.status, NegotiationStatus::Negotiating);
    assert!(after_alice.finalization_deadline.is_none());

    let after_bob = engine.accept(&negotiation.id, "bob", 1).unwrap();
    assert_eq!(after_bob.status, NegotiationStatus::ConsensusReached);
    assert!(after_bob.finalization_deadline.is_some());
}

#[test]
fn test_binding_flow_end_to_end() {
    let (store, engine) = engine();
    let negotiation = two_party(&engine);

    // Bob counters; Alice's earlier acceptance (if any) is void.
    engine.accept(&negotiation.id, "alice", 1).unwrap();
    engine
        .offer(&negotiation.id, "bob", json!({"scope": "shared-memory", "retention_days": 7}))
        .unwrap();

    engine.accept(&negotiation.id, "alice", 2).unwrap();
    engine.accept(&negotiation.id, "bob", 2).unwrap();

    let premature = engine.offer(&negotiation.id, "alice", json!({"late": true}));
    assert!(matches!(
        premature,
        Err(NegotiationError::InvalidTransition { from_state: "consensus_reached", .. })
    ));

    engine.finalize(&negotiation.id, "alice").unwrap();
    let bound = engine.finalize(&negotiation.id, "bob").unwrap();
    assert_eq!(bound.status, NegotiationStatus::Binding);
    let binding_hash = bound.binding_hash.clone().unwrap();
    assert_eq!(binding_hash.len(), 64);

    // Binding is irreversible: no further offer or withdraw.
    let late_offer = engine.offer(&negotiation.id, "alice", json!({}));
    assert!(matches!(
        late_offer,
        Err(NegotiationError::InvalidTransition { from_state: "binding", .. })
    ));
    let late_withdraw = engine.withdraw(&negotiation.id, "bob");
    assert!(matches!(
        late_withdraw,
        Err(NegotiationError::InvalidTransition { from_state: "binding", operation: "withdraw", .. })
    ));

    // Every participant's chain carries the protocol receipts and verifies.
    let ledger = ReceiptLedger::new(store);
    for actor in ["alice", "bob"] {
        let outcome = ledger.verify_chain(actor).unwrap();
        assert!(outcome.valid, "{actor} chain broke at {:?}", outcome.break_at);
    }
    let alice_kinds: Vec<ActionKind> = ledger
        .get_chain("alice")
        .unwrap()
        .iter()
        .map(|r| r.action_kind)
        .collect();
    assert!(alice_kinds.contains(&ActionKind::NegotiationCreate));
    assert!(alice_kinds.contains(&ActionKind::NegotiationAccept));
    assert!(alice_kinds.contains(&ActionKind::NegotiationFinalize));
}

#[test]
fn test_binding_hash_commits_to_accepted_bytes() {
    let (_, engine) = engine();

    let run = |retention: i64| {
        let negotiation = engine
            .create(
                "alice",
                vec!["alice".to_string(), "bob".to_string()],
                json!({"scope": "shared-memory", "retention_days": retention}),
                Utc::now() + Duration::hours(24),
            )
            .unwrap();
        engine.join(&negotiation.id, "bob").unwrap();
        engine.accept(&negotiation.id, "alice", 1).unwrap();
        engine.accept(&negotiation.id, "bob", 1).unwrap();
        engine.finalize(&negotiation.id, "alice").unwrap();
        engine
            .finalize(&negotiation.id, "bob")
            .unwrap()
            .binding_hash
            .unwrap()
    };

    assert_ne!(run(30), run(31));
}

#[test]
fn test_message_chain_audits_the_protocol() {
    let (store, engine) = engine();
    let negotiation = two_party(&engine);

    engine
        .offer(&negotiation.id, "bob", json!({"scope": "narrow"}))
        .unwrap();
    engine.accept(&negotiation.id, "alice", 2).unwrap();
    engine.accept(&negotiation.id, "bob", 2).unwrap();
    engine.finalize(&negotiation.id, "alice").unwrap();
    engine.finalize(&negotiation.id, "bob").unwrap();

    use crate::store::NegotiationStore;
    let messages = store.messages_for_negotiation(&negotiation.id).unwrap();
    assert_eq!(messages.len(), 5);

    let mut expected_prev = "0".repeat(64);
    for message in &messages {
        assert_eq!(message.previous_hash, expected_prev);
        assert_eq!(
            message.recompute_content_hash().as_deref(),
            Some(message.content_hash.as_str())
        );
        expected_prev = message.content_hash.clone();
    }
}

#[test]
fn test_withdraw_ends_it_for_everyone() {
    let (_, engine) = engine();
    let negotiation = two_party(&engine);

    engine.accept(&negotiation.id, "alice", 1).unwrap();
    let withdrawn = engine.withdraw(&negotiation.id, "bob").unwrap();
    assert_eq!(withdrawn.status, NegotiationStatus::Withdrawn);

    // Terminal for every participant and every operation.
    for result in [
        engine.offer(&negotiation.id, "alice", json!({})),
        engine.accept(&negotiation.id, "alice", 1).map(|_| withdrawn.clone()),
        engine.withdraw(&negotiation.id, "alice"),
        engine.finalize(&negotiation.id, "alice"),
    ] {
        assert!(matches!(
            result,
            Err(NegotiationError::InvalidTransition { from_state: "withdrawn", .. })
        ));
    }
}

#[test]
fn test_dispute_requires_binding() {
    let (_, engine) = engine();
    let negotiation = two_party(&engine);

    let early = engine.dispute(&negotiation.id, "carol", "not binding yet");
    assert!(matches!(
        early,
        Err(NegotiationError::InvalidTransition { from_state: "negotiating", operation: "dispute", .. })
    ));

    engine.accept(&negotiation.id, "alice", 1).unwrap();
    engine.accept(&negotiation.id, "bob", 1).unwrap();
    engine.finalize(&negotiation.id, "alice").unwrap();
    engine.finalize(&negotiation.id, "bob").unwrap();

    let (disputed, appeal) = engine
        .dispute(&negotiation.id, "carol", "terms were misrepresented")
        .unwrap();
    assert_eq!(disputed.status, NegotiationStatus::Disputed);
    assert_eq!(appeal.subject.reference, negotiation.id);
    assert_eq!(appeal.appellant_id, "carol");
    assert!(appeal.subject.parties.contains(&"alice".to_string()));
    assert!(appeal.subject.parties.contains(&"bob".to_string()));

    // Disputed is terminal for the negotiation protocol.
    let late = engine.withdraw(&negotiation.id, "alice");
    assert!(matches!(
        late,
        Err(NegotiationError::InvalidTransition { from_state: "disputed", .. })
    ));
}

#[test]
fn test_timeout_sweep_expires_and_is_idempotent() {
    let (store, engine) = engine();

    let stale = engine
        .create(
            "alice",
            vec!["alice".to_string(), "bob".to_string()],
            json!({}),
            Utc::now() - Duration::hours(1),
        )
        .unwrap();
    engine.join(&stale.id, "bob").unwrap();

    let fresh = engine
        .create(
            "alice",
            vec!["alice".to_string(), "carol".to_string()],
            json!({}),
            Utc::now() + Duration::hours(1),
        )
        .unwrap();
    engine.join(&fresh.id, "carol").unwrap();

    let now = Utc::now();
    let sweep = engine.check_timeouts(now).unwrap();
    assert_eq!(sweep.expired, vec![stale.id.clone()]);
    assert!(sweep.skipped.is_empty());

    let expired = engine.get_negotiation(&stale.id).unwrap().unwrap();
    assert_eq!(expired.status, NegotiationStatus::Expired);
    let untouched = engine.get_negotiation(&fresh.id).unwrap().unwrap();
    assert_eq!(untouched.status, NegotiationStatus::Negotiating);

    // Exactly one expiry receipt, and a second sweep adds nothing.
    let ledger = ReceiptLedger::new(store);
    let expiry_count = |chain: &[crate::ledger::Receipt]| {
        chain
            .iter()
            .filter(|r| r.action_kind == ActionKind::NegotiationExpire)
            .count()
    };
    assert_eq!(expiry_count(&ledger.get_chain("alice").unwrap()), 1);

    let second = engine.check_timeouts(now).unwrap();
    assert!(second.expired.is_empty());
    assert_eq!(expiry_count(&ledger.get_chain("alice").unwrap()), 1);
}

#[test]
fn test_timeout_sweep_covers_stalled_finalization() {
    let (_, engine) = engine();
    let negotiation = two_party(&engine);

    engine.accept(&negotiation.id, "alice", 1).unwrap();
    let consensus = engine.accept(&negotiation.id, "bob", 1).unwrap();
    assert_eq!(consensus.status, NegotiationStatus::ConsensusReached);

    let past_finalization = consensus.finalization_deadline.unwrap() + Duration::seconds(1);
    let sweep = engine.check_timeouts(past_finalization).unwrap();
    assert_eq!(sweep.expired, vec![negotiation.id.clone()]);

    let expired = engine.get_negotiation(&negotiation.id).unwrap().unwrap();
    assert_eq!(expired.status, NegotiationStatus::Expired);
}

#[test]
fn test_concurrent_accepts_reach_consensus_exactly_once() {
    let (_, engine) = engine();
    let participants: Vec<String> = (0..8).map(|i| format!("actor-{i}")).collect();

    let negotiation = engine
        .create(
            "actor-0",
            participants.clone(),
            json!({"scope": "mesh"}),
            Utc::now() + Duration::hours(1),
        )
        .unwrap();
    for participant in &participants[1..] {
        engine.join(&negotiation.id, participant).unwrap();
    }

    thread::scope(|scope| {
        for participant in &participants {
            let engine = &engine;
            let id = negotiation.id.as_str();
            scope.spawn(move || {
                engine.accept(id, participant, 1).unwrap();
            });
        }
    });

    let settled = engine.get_negotiation(&negotiation.id).unwrap().unwrap();
    assert_eq!(settled.status, NegotiationStatus::ConsensusReached);
    assert_eq!(settled.acceptances.len(), participants.len());
    assert!(settled.finalization_deadline.is_some());
}

proptest! {
    /// An offer always empties the acceptance set and strictly increments
    /// the version, whatever interleaving of accepts preceded it.
    #[test]
    fn prop_offer_always_clears_acceptances(rounds in 1usize..5, accept_alice in any::<bool>(), accept_bob in any::<bool>()) {
        let (_, engine) = engine();
        let negotiation = two_party(&engine);

        let mut version = 1u64;
        for round in 0..rounds {
            if accept_alice {
                engine.accept(&negotiation.id, "alice", version).unwrap();
            }
            // Never let the set reach full acceptance: bob only accepts when
            // alice did not, so the negotiation stays in Negotiating.
            if accept_bob && !accept_alice {
                engine.accept(&negotiation.id, "bob", version).unwrap();
            }

            let offered = engine
                .offer(&negotiation.id, "bob", serde_json::json!({"round": round}))
                .unwrap();
            version += 1;

            prop_assert_eq!(offered.terms_version, version);
            prop_assert!(offered.acceptances.is_empty());
        }
    }
}
