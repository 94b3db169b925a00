//! Shared error taxonomy.
//!
//! Every fallible operation in this crate maps its failures onto one of four
//! categories so callers can decide how to react without matching on the
//! concrete error type:
//!
//! | Category | Meaning | Retry guidance |
//! |----------|---------|----------------|
//! | `Validation` | malformed input, wrong participant, stale version | safe after correcting the input |
//! | `StateViolation` | operation not legal in the entity's current state | safe after refreshing state |
//! | `Integrity` | recomputed hash mismatch or broken chain | never retried; flag for investigation |
//! | `Resource` | storage unavailable or contention exhausted | safe to retry the whole call |
//!
//! Validation and state-violation failures are rejected before any mutation.
//! Integrity failures are reported, never auto-repaired.

use std::fmt;

/// Coarse classification of a failure, stable across error enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed or stale input; no mutation occurred.
    Validation,

    /// The operation is not valid in the entity's current state; no mutation
    /// occurred.
    StateViolation,

    /// A hash or chain check failed against stored data.
    Integrity,

    /// The storage substrate failed or contention could not be resolved.
    Resource,
}

impl ErrorCategory {
    /// Returns the category's wire tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::StateViolation => "state_violation",
            Self::Integrity => "integrity",
            Self::Resource => "resource",
        }
    }

    /// Whether a caller may retry the same call after corrective action.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation | Self::StateViolation | Self::Resource => true,
            Self::Integrity => false,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_category_tags() {
        assert_eq!(ErrorCategory::Validation.as_str(), "validation");
        assert_eq!(ErrorCategory::StateViolation.as_str(), "state_violation");
        assert_eq!(ErrorCategory::Integrity.as_str(), "integrity");
        assert_eq!(ErrorCategory::Resource.as_str(), "resource");
    }

    #[test]
    fn test_integrity_is_not_retryable() {
        assert!(!ErrorCategory::Integrity.is_retryable());
        assert!(ErrorCategory::Validation.is_retryable());
        assert!(ErrorCategory::Resource.is_retryable());
    }
}
