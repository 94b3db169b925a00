//! In-memory storage backend.
//!
//! Backs tests and embedded callers. Critical sections are held only for
//! map access, never across hashing I/O of other entities, so operations on
//! different negotiations or appeals contend only on the brief map lock.

// Lock poisoning indicates a panic in another thread, which is
// unrecoverable for an in-process store.
#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use super::{AppealStore, NegotiationStore, ReceiptStore, StoreError};
use crate::appeals::state::{Appeal, AppealStatus};
use crate::crypto::{GENESIS_PREV_HASH, decode_hash};
use crate::ledger::receipt::{Receipt, ReceiptDraft};
use crate::negotiation::message::{MessageDraft, NegotiationMessage};
use crate::negotiation::state::{Negotiation, NegotiationStatus};

/// In-memory implementation of all three storage traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    receipts: RwLock<HashMap<String, Vec<Receipt>>>,
    negotiations: RwLock<HashMap<String, Negotiation>>,
    messages: RwLock<HashMap<String, Vec<NegotiationMessage>>>,
    appeals: RwLock<HashMap<String, Appeal>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiptStore for MemoryStore {
    fn append_receipt(&self, draft: ReceiptDraft) -> Result<Receipt, StoreError> {
        let mut receipts = self.receipts.write().unwrap();
        let chain = receipts.entry(draft.actor_id().to_string()).or_default();

        let previous_hash = match chain.last() {
            Some(head) => {
                decode_hash(&head.content_hash).map_err(|e| StoreError::Corrupted {
                    entity: "receipt",
                    id: head.id.clone(),
                    reason: e.to_string(),
                })?
            },
            None => GENESIS_PREV_HASH,
        };

        let receipt = draft.seal(&previous_hash, Utc::now());
        chain.push(receipt.clone());
        Ok(receipt)
    }

    fn receipt(&self, receipt_id: &str) -> Result<Option<Receipt>, StoreError> {
        let receipts = self.receipts.read().unwrap();
        Ok(receipts
            .values()
            .flat_map(|chain| chain.iter())
            .find(|r| r.id == receipt_id)
            .cloned())
    }

    fn receipt_chain(&self, actor_id: &str) -> Result<Vec<Receipt>, StoreError> {
        let receipts = self.receipts.read().unwrap();
        Ok(receipts.get(actor_id).cloned().unwrap_or_default())
    }

    fn receipts_for_actor(
        &self,
        actor_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Receipt>, StoreError> {
        let receipts = self.receipts.read().unwrap();
        let chain = receipts.get(actor_id).map(Vec::as_slice).unwrap_or_default();
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(chain.iter().skip(offset).take(limit).cloned().collect())
    }

    fn chain_head(&self, actor_id: &str) -> Result<Option<Receipt>, StoreError> {
        let receipts = self.receipts.read().unwrap();
        Ok(receipts.get(actor_id).and_then(|chain| chain.last()).cloned())
    }

    fn actor_ids(&self) -> Result<Vec<String>, StoreError> {
        let receipts = self.receipts.read().unwrap();
        let mut ids: Vec<String> = receipts.keys().cloned().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

impl NegotiationStore for MemoryStore {
    fn insert_negotiation(&self, negotiation: &Negotiation) -> Result<(), StoreError> {
        let mut negotiations = self.negotiations.write().unwrap();
        if negotiations.contains_key(&negotiation.id) {
            return Err(StoreError::Duplicate {
                entity: "negotiation",
                id: negotiation.id.clone(),
            });
        }
        negotiations.insert(negotiation.id.clone(), negotiation.clone());
        Ok(())
    }

    fn negotiation(&self, negotiation_id: &str) -> Result<Option<Negotiation>, StoreError> {
        let negotiations = self.negotiations.read().unwrap();
        Ok(negotiations.get(negotiation_id).cloned())
    }

    fn update_negotiation(
        &self,
        updated: &Negotiation,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        let mut negotiations = self.negotiations.write().unwrap();
        let current = negotiations
            .get(&updated.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "negotiation",
                id: updated.id.clone(),
            })?;

        if current.revision != expected_revision {
            return Err(StoreError::RevisionConflict {
                entity: "negotiation",
                id: updated.id.clone(),
                expected: expected_revision,
                actual: current.revision,
            });
        }

        let mut stored = updated.clone();
        stored.revision = expected_revision + 1;
        let new_revision = stored.revision;
        negotiations.insert(stored.id.clone(), stored);
        Ok(new_revision)
    }

    fn negotiations_with_status(
        &self,
        statuses: &[NegotiationStatus],
    ) -> Result<Vec<Negotiation>, StoreError> {
        let negotiations = self.negotiations.read().unwrap();
        let mut matched: Vec<Negotiation> = negotiations
            .values()
            .filter(|n| statuses.contains(&n.status))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matched)
    }

    fn append_message(&self, draft: MessageDraft) -> Result<NegotiationMessage, StoreError> {
        let mut messages = self.messages.write().unwrap();
        let chain = messages.entry(draft.negotiation_id().to_string()).or_default();

        let previous_hash = match chain.last() {
            Some(head) => {
                decode_hash(&head.content_hash).map_err(|e| StoreError::Corrupted {
                    entity: "negotiation_message",
                    id: head.id.clone(),
                    reason: e.to_string(),
                })?
            },
            None => GENESIS_PREV_HASH,
        };

        let message = draft.seal(&previous_hash, Utc::now());
        chain.push(message.clone());
        Ok(message)
    }

    fn messages_for_negotiation(
        &self,
        negotiation_id: &str,
    ) -> Result<Vec<NegotiationMessage>, StoreError> {
        let messages = self.messages.read().unwrap();
        Ok(messages.get(negotiation_id).cloned().unwrap_or_default())
    }
}

impl AppealStore for MemoryStore {
    fn insert_appeal(&self, appeal: &Appeal) -> Result<(), StoreError> {
        let mut appeals = self.appeals.write().unwrap();
        if appeals.contains_key(&appeal.id) {
            return Err(StoreError::Duplicate {
                entity: "appeal",
                id: appeal.id.clone(),
            });
        }
        appeals.insert(appeal.id.clone(), appeal.clone());
        Ok(())
    }

    fn appeal(&self, appeal_id: &str) -> Result<Option<Appeal>, StoreError> {
        let appeals = self.appeals.read().unwrap();
        Ok(appeals.get(appeal_id).cloned())
    }

    fn update_appeal(&self, updated: &Appeal, expected_revision: u64) -> Result<u64, StoreError> {
        let mut appeals = self.appeals.write().unwrap();
        let current = appeals.get(&updated.id).ok_or_else(|| StoreError::NotFound {
            entity: "appeal",
            id: updated.id.clone(),
        })?;

        if current.revision != expected_revision {
            return Err(StoreError::RevisionConflict {
                entity: "appeal",
                id: updated.id.clone(),
                expected: expected_revision,
                actual: current.revision,
            });
        }

        let mut stored = updated.clone();
        stored.revision = expected_revision + 1;
        let new_revision = stored.revision;
        appeals.insert(stored.id.clone(), stored);
        Ok(new_revision)
    }

    fn appeals_with_status(&self, statuses: &[AppealStatus]) -> Result<Vec<Appeal>, StoreError> {
        let appeals = self.appeals.read().unwrap();
        let mut matched: Vec<Appeal> = appeals
            .values()
            .filter(|a| statuses.contains(&a.status))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matched)
    }
}

#[cfg(test)]
mod unit_tests {
    use serde_json::json;

    use super::*;
    use crate::ledger::receipt::ActionKind;

    fn draft(actor: &str) -> ReceiptDraft {
        ReceiptDraft::new(actor, ActionKind::MemoryCreate, json!({"n": 1})).unwrap()
    }

    #[test]
    fn test_appends_chain_per_actor() {
        let store = MemoryStore::new();
        let first = store.append_receipt(draft("alice")).unwrap();
        let second = store.append_receipt(draft("alice")).unwrap();
        let other = store.append_receipt(draft("bob")).unwrap();

        assert_eq!(first.previous_hash, "0".repeat(64));
        assert_eq!(second.previous_hash, first.content_hash);
        assert_eq!(other.previous_hash, "0".repeat(64));

        let chain = store.receipt_chain("alice").unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(store.chain_head("alice").unwrap().unwrap().id, second.id);
    }

    #[test]
    fn test_receipt_lookup_and_paging() {
        let store = MemoryStore::new();
        let receipts: Vec<Receipt> = (0..5)
            .map(|_| store.append_receipt(draft("alice")).unwrap())
            .collect();

        let found = store.receipt(&receipts[2].id).unwrap().unwrap();
        assert_eq!(found.content_hash, receipts[2].content_hash);

        let page = store.receipts_for_actor("alice", 1, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, receipts[1].id);
        assert_eq!(store.actor_ids().unwrap(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_negotiation_cas() {
        let store = MemoryStore::new();
        let negotiation = Negotiation::new(
            "neg-1".to_string(),
            vec!["alice".to_string(), "bob".to_string()],
            "alice",
            json!({}),
            Utc::now(),
            Utc::now(),
        );
        store.insert_negotiation(&negotiation).unwrap();
        assert!(matches!(
            store.insert_negotiation(&negotiation),
            Err(StoreError::Duplicate { .. })
        ));

        let new_revision = store.update_negotiation(&negotiation, 0).unwrap();
        assert_eq!(new_revision, 1);

        // Stale writer loses.
        assert!(matches!(
            store.update_negotiation(&negotiation, 0),
            Err(StoreError::RevisionConflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_message_chain_per_negotiation() {
        let store = MemoryStore::new();
        let first = store
            .append_message(
                MessageDraft::new(
                    "neg-1",
                    "alice",
                    crate::negotiation::message::MessageKind::Offer,
                    1,
                    json!({}),
                )
                .unwrap(),
            )
            .unwrap();
        let second = store
            .append_message(
                MessageDraft::new(
                    "neg-1",
                    "bob",
                    crate::negotiation::message::MessageKind::Accept,
                    1,
                    json!({}),
                )
                .unwrap(),
            )
            .unwrap();

        assert_eq!(second.previous_hash, first.content_hash);
        assert_eq!(store.messages_for_negotiation("neg-1").unwrap().len(), 2);
    }
}
