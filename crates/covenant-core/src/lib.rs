//! Trust negotiation and tamper-evident receipt ledger.
//!
//! `covenant-core` records every sovereignty-relevant action as a
//! cryptographically chained receipt and lets independent parties reach a
//! binding agreement, or dispute one, without a central arbiter deciding the
//! outcome unilaterally.
//!
//! # Architecture
//!
//! Three components share one storage substrate and one hashing primitive:
//!
//! ```text
//! +--------------------+     +---------------------+
//! | NegotiationEngine  |     | AppealsWorkflow     |
//! | offer/accept/      |     | assign/vote/        |
//! | finalize/withdraw/ |---->| escalate/resolve    |
//! | dispute/timeouts   |     |                     |
//! +---------+----------+     +----------+----------+
//!           |                           |
//!           v                           v
//!        +--------------------------------+
//!        | ReceiptLedger (append-only,    |
//!        | hash-chained per actor)        |
//!        +---------------+----------------+
//!                        |
//!                        v
//!        +--------------------------------+
//!        | TrustStore (Memory / SQLite)   |
//!        +--------------------------------+
//! ```
//!
//! Every state transition in either upper component lands a receipt in the
//! ledger, so the full history is independently auditable from the ledger
//! alone.
//!
//! # Hashing Contract
//!
//! Digests are Blake3 (256-bit), rendered lowercase hex, computed over a
//! canonical JSON profile (sorted keys, compact, integer-only numbers); see
//! [`canonical`] and the preimage layouts documented in
//! [`ledger::receipt`] and [`negotiation::message`]. The contract is
//! bit-exact: third parties can recompute and verify every hash from stored
//! fields without access to this implementation.
//!
//! # Concurrency
//!
//! All operations are synchronous request/response, safe to invoke
//! concurrently. Receipt chains are linearized per actor inside the store;
//! negotiation and appeal writes use per-entity optimistic revision checks,
//! so concurrent operations on different entities never block each other.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::{Duration, Utc};
//! use covenant_core::config::CovenantConfig;
//! use covenant_core::negotiation::{NegotiationEngine, NegotiationStatus};
//! use covenant_core::store::MemoryStore;
//! use serde_json::json;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let engine = NegotiationEngine::new(store, CovenantConfig::default());
//!
//! let negotiation = engine.create(
//!     "alice",
//!     vec!["alice".to_string(), "bob".to_string()],
//!     json!({"scope": "shared-memory"}),
//!     Utc::now() + Duration::hours(24),
//! )?;
//! let negotiation = engine.join(&negotiation.id, "bob")?;
//! assert_eq!(negotiation.status, NegotiationStatus::Negotiating);
//!
//! engine.accept(&negotiation.id, "alice", 1)?;
//! let negotiation = engine.accept(&negotiation.id, "bob", 1)?;
//! assert_eq!(negotiation.status, NegotiationStatus::ConsensusReached);
//!
//! engine.finalize(&negotiation.id, "alice")?;
//! let negotiation = engine.finalize(&negotiation.id, "bob")?;
//! assert_eq!(negotiation.status, NegotiationStatus::Binding);
//! assert!(negotiation.binding_hash.is_some());
//! # Ok(())
//! # }
//! ```

pub mod appeals;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod negotiation;
pub mod store;

pub use appeals::{Appeal, AppealError, AppealStatus, AppealsWorkflow, VoteDecision};
pub use config::CovenantConfig;
pub use error::ErrorCategory;
pub use ledger::{ActionKind, ChainVerification, LedgerError, Receipt, ReceiptLedger};
pub use negotiation::{
    Negotiation, NegotiationEngine, NegotiationError, NegotiationStatus,
};
pub use store::{MemoryStore, SqliteStore, TrustStore};
