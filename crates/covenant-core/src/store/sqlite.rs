//! `SQLite`-backed storage implementation.
//!
//! Uses `SQLite` with WAL mode for the underlying storage. One connection
//! behind a mutex serializes writes; chain linking runs inside a transaction
//! so appends are atomic and linearized. Append-only semantics for receipts
//! and negotiation messages are enforced by schema triggers, not convention.

// Mutex poisoning indicates a panic in another thread, which is
// unrecoverable for an embedded store.
#![allow(clippy::missing_panics_doc)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde_json::Value;

use super::{AppealStore, NegotiationStore, ReceiptStore, StoreError};
use crate::appeals::state::{Appeal, AppealStatus};
use crate::crypto::{GENESIS_PREV_HASH, decode_hash};
use crate::ledger::receipt::{ActionKind, Receipt, ReceiptDraft, canonical_timestamp};
use crate::negotiation::message::{MessageDraft, MessageKind, NegotiationMessage};
use crate::negotiation::state::{Negotiation, NegotiationStatus};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Raw receipt row before decoding.
type ReceiptRow = (String, String, String, String, String, String, String);

/// Raw message row before decoding.
type MessageRow = (
    String,
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    String,
);

/// `SQLite` implementation of all three storage traits.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens or creates a store at the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn decode_receipt(row: ReceiptRow) -> Result<Receipt, StoreError> {
    let (id, actor_id, kind_tag, payload, created_at, content_hash, previous_hash) = row;

    let action_kind = ActionKind::parse(&kind_tag).ok_or_else(|| StoreError::Corrupted {
        entity: "receipt",
        id: id.clone(),
        reason: format!("unknown action kind: {kind_tag}"),
    })?;
    let payload: Value = serde_json::from_str(&payload).map_err(|e| StoreError::Corrupted {
        entity: "receipt",
        id: id.clone(),
        reason: e.to_string(),
    })?;
    let created_at = parse_timestamp(&created_at, "receipt", &id)?;

    Ok(Receipt {
        id,
        actor_id,
        action_kind,
        payload,
        created_at,
        content_hash,
        previous_hash,
    })
}

fn decode_message(row: MessageRow) -> Result<NegotiationMessage, StoreError> {
    let (id, negotiation_id, actor_id, kind_tag, terms_version, payload, created_at, content_hash, previous_hash) =
        row;

    let kind = parse_message_kind(&kind_tag).ok_or_else(|| StoreError::Corrupted {
        entity: "negotiation_message",
        id: id.clone(),
        reason: format!("unknown message kind: {kind_tag}"),
    })?;
    let payload: Value = serde_json::from_str(&payload).map_err(|e| StoreError::Corrupted {
        entity: "negotiation_message",
        id: id.clone(),
        reason: e.to_string(),
    })?;
    let created_at = parse_timestamp(&created_at, "negotiation_message", &id)?;
    let terms_version = u64::try_from(terms_version).map_err(|_| StoreError::Corrupted {
        entity: "negotiation_message",
        id: id.clone(),
        reason: format!("negative terms version: {terms_version}"),
    })?;

    Ok(NegotiationMessage {
        id,
        negotiation_id,
        actor_id,
        kind,
        terms_version,
        payload,
        created_at,
        content_hash,
        previous_hash,
    })
}

fn parse_message_kind(tag: &str) -> Option<MessageKind> {
    match tag {
        "offer" => Some(MessageKind::Offer),
        "accept" => Some(MessageKind::Accept),
        "finalize" => Some(MessageKind::Finalize),
        "withdraw" => Some(MessageKind::Withdraw),
        "dispute" => Some(MessageKind::Dispute),
        _ => None,
    }
}

fn parse_timestamp(
    raw: &str,
    entity: &'static str,
    id: &str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupted {
            entity,
            id: id.to_string(),
            reason: format!("bad timestamp {raw}: {e}"),
        })
}

fn decode_body<T: serde::de::DeserializeOwned>(
    body: &str,
    entity: &'static str,
    id: &str,
) -> Result<T, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Corrupted {
        entity,
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn encode_body<T: serde::Serialize>(
    value: &T,
    entity: &'static str,
    id: &str,
) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupted {
        entity,
        id: id.to_string(),
        reason: e.to_string(),
    })
}

impl ReceiptStore for SqliteStore {
    fn append_receipt(&self, draft: ReceiptDraft) -> Result<Receipt, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let head_hash: Option<String> = tx
            .query_row(
                "SELECT content_hash FROM receipts WHERE actor_id = ?1
                 ORDER BY seq DESC LIMIT 1",
                params![draft.actor_id()],
                |row| row.get(0),
            )
            .optional()?;

        let previous_hash = match head_hash {
            Some(encoded) => decode_hash(&encoded).map_err(|e| StoreError::Corrupted {
                entity: "receipt",
                id: draft.actor_id().to_string(),
                reason: e.to_string(),
            })?,
            None => GENESIS_PREV_HASH,
        };

        let receipt = draft.seal(&previous_hash, Utc::now());
        let payload = encode_body(&receipt.payload, "receipt", &receipt.id)?;

        tx.execute(
            "INSERT INTO receipts (id, actor_id, action_kind, payload, created_at, content_hash, previous_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                receipt.id,
                receipt.actor_id,
                receipt.action_kind.as_str(),
                payload,
                canonical_timestamp(receipt.created_at),
                receipt.content_hash,
                receipt.previous_hash,
            ],
        )?;
        tx.commit()?;

        Ok(receipt)
    }

    fn receipt(&self, receipt_id: &str) -> Result<Option<Receipt>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<ReceiptRow> = conn
            .query_row(
                "SELECT id, actor_id, action_kind, payload, created_at, content_hash, previous_hash
                 FROM receipts WHERE id = ?1",
                params![receipt_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;

        row.map(decode_receipt).transpose()
    }

    fn receipt_chain(&self, actor_id: &str) -> Result<Vec<Receipt>, StoreError> {
        self.receipts_for_actor(actor_id, 0, u64::MAX)
    }

    fn receipts_for_actor(
        &self,
        actor_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Receipt>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, actor_id, action_kind, payload, created_at, content_hash, previous_hash
             FROM receipts WHERE actor_id = ?1
             ORDER BY seq ASC LIMIT ?2 OFFSET ?3",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![actor_id, limit, offset], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<Vec<ReceiptRow>, _>>()?;

        rows.into_iter().map(decode_receipt).collect()
    }

    fn chain_head(&self, actor_id: &str) -> Result<Option<Receipt>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<ReceiptRow> = conn
            .query_row(
                "SELECT id, actor_id, action_kind, payload, created_at, content_hash, previous_hash
                 FROM receipts WHERE actor_id = ?1
                 ORDER BY seq DESC LIMIT 1",
                params![actor_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;

        row.map(decode_receipt).transpose()
    }

    fn actor_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT DISTINCT actor_id FROM receipts ORDER BY actor_id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

impl NegotiationStore for SqliteStore {
    fn insert_negotiation(&self, negotiation: &Negotiation) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM negotiations WHERE id = ?1",
                params![negotiation.id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::Duplicate {
                entity: "negotiation",
                id: negotiation.id.clone(),
            });
        }

        let body = encode_body(negotiation, "negotiation", &negotiation.id)?;
        conn.execute(
            "INSERT INTO negotiations (id, status, revision, body) VALUES (?1, ?2, ?3, ?4)",
            params![
                negotiation.id,
                negotiation.status.state_name(),
                i64::try_from(negotiation.revision).unwrap_or(i64::MAX),
                body,
            ],
        )?;
        Ok(())
    }

    fn negotiation(&self, negotiation_id: &str) -> Result<Option<Negotiation>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM negotiations WHERE id = ?1",
                params![negotiation_id],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|b| decode_body(&b, "negotiation", negotiation_id))
            .transpose()
    }

    fn update_negotiation(
        &self,
        updated: &Negotiation,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();

        let new_revision = expected_revision + 1;
        let mut stored = updated.clone();
        stored.revision = new_revision;
        let body = encode_body(&stored, "negotiation", &stored.id)?;

        let changed = conn.execute(
            "UPDATE negotiations SET status = ?2, revision = ?3, body = ?4
             WHERE id = ?1 AND revision = ?5",
            params![
                stored.id,
                stored.status.state_name(),
                i64::try_from(new_revision).unwrap_or(i64::MAX),
                body,
                i64::try_from(expected_revision).unwrap_or(i64::MAX),
            ],
        )?;

        if changed == 1 {
            return Ok(new_revision);
        }

        let actual: Option<i64> = conn
            .query_row(
                "SELECT revision FROM negotiations WHERE id = ?1",
                params![stored.id],
                |row| row.get(0),
            )
            .optional()?;

        match actual {
            None => Err(StoreError::NotFound {
                entity: "negotiation",
                id: stored.id.clone(),
            }),
            Some(actual) => Err(StoreError::RevisionConflict {
                entity: "negotiation",
                id: stored.id.clone(),
                expected: expected_revision,
                actual: u64::try_from(actual).unwrap_or(0),
            }),
        }
    }

    fn negotiations_with_status(
        &self,
        statuses: &[NegotiationStatus],
    ) -> Result<Vec<Negotiation>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT id, body FROM negotiations WHERE status IN ({placeholders}) ORDER BY id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let tags: Vec<&str> = statuses.iter().map(NegotiationStatus::state_name).collect();

        let rows = stmt
            .query_map(rusqlite::params_from_iter(tags), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<(String, String)>, _>>()?;

        rows.into_iter()
            .map(|(id, body)| decode_body(&body, "negotiation", &id))
            .collect()
    }

    fn append_message(&self, draft: MessageDraft) -> Result<NegotiationMessage, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let head_hash: Option<String> = tx
            .query_row(
                "SELECT content_hash FROM negotiation_messages WHERE negotiation_id = ?1
                 ORDER BY seq DESC LIMIT 1",
                params![draft.negotiation_id()],
                |row| row.get(0),
            )
            .optional()?;

        let previous_hash = match head_hash {
            Some(encoded) => decode_hash(&encoded).map_err(|e| StoreError::Corrupted {
                entity: "negotiation_message",
                id: draft.negotiation_id().to_string(),
                reason: e.to_string(),
            })?,
            None => GENESIS_PREV_HASH,
        };

        let message = draft.seal(&previous_hash, Utc::now());
        let payload = encode_body(&message.payload, "negotiation_message", &message.id)?;

        tx.execute(
            "INSERT INTO negotiation_messages
             (id, negotiation_id, actor_id, kind, terms_version, payload, created_at, content_hash, previous_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id,
                message.negotiation_id,
                message.actor_id,
                message.kind.as_str(),
                i64::try_from(message.terms_version).unwrap_or(i64::MAX),
                payload,
                canonical_timestamp(message.created_at),
                message.content_hash,
                message.previous_hash,
            ],
        )?;
        tx.commit()?;

        Ok(message)
    }

    fn messages_for_negotiation(
        &self,
        negotiation_id: &str,
    ) -> Result<Vec<NegotiationMessage>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, negotiation_id, actor_id, kind, terms_version, payload, created_at, content_hash, previous_hash
             FROM negotiation_messages WHERE negotiation_id = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt
            .query_map(params![negotiation_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })?
            .collect::<Result<Vec<MessageRow>, _>>()?;

        rows.into_iter().map(decode_message).collect()
    }
}

impl AppealStore for SqliteStore {
    fn insert_appeal(&self, appeal: &Appeal) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM appeals WHERE id = ?1",
                params![appeal.id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::Duplicate {
                entity: "appeal",
                id: appeal.id.clone(),
            });
        }

        let body = encode_body(appeal, "appeal", &appeal.id)?;
        conn.execute(
            "INSERT INTO appeals (id, status, revision, body) VALUES (?1, ?2, ?3, ?4)",
            params![
                appeal.id,
                appeal.status.state_name(),
                i64::try_from(appeal.revision).unwrap_or(i64::MAX),
                body,
            ],
        )?;
        Ok(())
    }

    fn appeal(&self, appeal_id: &str) -> Result<Option<Appeal>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM appeals WHERE id = ?1",
                params![appeal_id],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|b| decode_body(&b, "appeal", appeal_id)).transpose()
    }

    fn update_appeal(&self, updated: &Appeal, expected_revision: u64) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();

        let new_revision = expected_revision + 1;
        let mut stored = updated.clone();
        stored.revision = new_revision;
        let body = encode_body(&stored, "appeal", &stored.id)?;

        let changed = conn.execute(
            "UPDATE appeals SET status = ?2, revision = ?3, body = ?4
             WHERE id = ?1 AND revision = ?5",
            params![
                stored.id,
                stored.status.state_name(),
                i64::try_from(new_revision).unwrap_or(i64::MAX),
                body,
                i64::try_from(expected_revision).unwrap_or(i64::MAX),
            ],
        )?;

        if changed == 1 {
            return Ok(new_revision);
        }

        let actual: Option<i64> = conn
            .query_row(
                "SELECT revision FROM appeals WHERE id = ?1",
                params![stored.id],
                |row| row.get(0),
            )
            .optional()?;

        match actual {
            None => Err(StoreError::NotFound {
                entity: "appeal",
                id: stored.id.clone(),
            }),
            Some(actual) => Err(StoreError::RevisionConflict {
                entity: "appeal",
                id: stored.id.clone(),
                expected: expected_revision,
                actual: u64::try_from(actual).unwrap_or(0),
            }),
        }
    }

    fn appeals_with_status(&self, statuses: &[AppealStatus]) -> Result<Vec<Appeal>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql =
            format!("SELECT id, body FROM appeals WHERE status IN ({placeholders}) ORDER BY id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let tags: Vec<&str> = statuses.iter().map(AppealStatus::state_name).collect();

        let rows = stmt
            .query_map(rusqlite::params_from_iter(tags), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<(String, String)>, _>>()?;

        rows.into_iter()
            .map(|(id, body)| decode_body(&body, "appeal", &id))
            .collect()
    }
}
