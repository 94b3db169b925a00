//! Configuration for the negotiation engine and appeals workflow.
//!
//! All windows are expressed in whole seconds and applied relative to the
//! timestamps recorded on the entities themselves, so a sweep invoked late
//! still observes the same deadlines.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum review-board size.
pub const MIN_BOARD_SIZE: usize = 3;

/// Maximum review-board size.
pub const MAX_BOARD_SIZE: usize = 7;

/// Errors raised while validating configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A board size is outside the allowed 3..=7 range.
    #[error("board size {size} outside allowed range {min}..={max}")]
    BoardSizeOutOfRange {
        /// The rejected size.
        size: usize,
        /// Lower bound.
        min: usize,
        /// Upper bound.
        max: usize,
    },

    /// The escalated board is not larger than the initial board.
    #[error("escalated board size {escalated} must exceed default size {default}")]
    EscalatedBoardNotLarger {
        /// Configured escalated size.
        escalated: usize,
        /// Configured default size.
        default: usize,
    },

    /// A time window is zero.
    #[error("{window} must be positive")]
    EmptyWindow {
        /// Name of the offending window.
        window: &'static str,
    },
}

/// Negotiation engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Seconds granted to finalize once consensus is reached.
    pub finalization_window_secs: u64,

    /// Bounded retries for optimistic-concurrency conflicts before the
    /// operation is surfaced as a resource failure.
    pub max_cas_retries: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            finalization_window_secs: 24 * 60 * 60,
            max_cas_retries: 8,
        }
    }
}

/// Appeals workflow tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppealsConfig {
    /// Review-board size assigned on first review.
    pub default_board_size: usize,

    /// Review-board size assigned on escalation.
    pub escalated_board_size: usize,

    /// Seconds from opening (or assignment) to the review deadline.
    pub review_window_secs: u64,

    /// Seconds added to the deadline by the single permitted escalation.
    pub escalation_extension_secs: u64,

    /// Bounded retries for optimistic-concurrency conflicts.
    pub max_cas_retries: u32,
}

impl Default for AppealsConfig {
    fn default() -> Self {
        Self {
            default_board_size: 3,
            escalated_board_size: 5,
            review_window_secs: 72 * 60 * 60,
            escalation_extension_secs: 72 * 60 * 60,
            max_cas_retries: 8,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CovenantConfig {
    /// Negotiation engine settings.
    pub negotiation: NegotiationConfig,

    /// Appeals workflow settings.
    pub appeals: AppealsConfig,
}

impl CovenantConfig {
    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for size in [
            self.appeals.default_board_size,
            self.appeals.escalated_board_size,
        ] {
            if !(MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&size) {
                return Err(ConfigError::BoardSizeOutOfRange {
                    size,
                    min: MIN_BOARD_SIZE,
                    max: MAX_BOARD_SIZE,
                });
            }
        }
        if self.appeals.escalated_board_size <= self.appeals.default_board_size {
            return Err(ConfigError::EscalatedBoardNotLarger {
                escalated: self.appeals.escalated_board_size,
                default: self.appeals.default_board_size,
            });
        }
        if self.negotiation.finalization_window_secs == 0 {
            return Err(ConfigError::EmptyWindow {
                window: "finalization_window_secs",
            });
        }
        if self.appeals.review_window_secs == 0 {
            return Err(ConfigError::EmptyWindow {
                window: "review_window_secs",
            });
        }
        if self.appeals.escalation_extension_secs == 0 {
            return Err(ConfigError::EmptyWindow {
                window: "escalation_extension_secs",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        CovenantConfig::default().validate().unwrap();
    }

    #[test]
    fn test_board_size_bounds() {
        let mut config = CovenantConfig::default();
        config.appeals.default_board_size = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BoardSizeOutOfRange { size: 2, .. })
        ));

        config.appeals.default_board_size = 3;
        config.appeals.escalated_board_size = 9;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BoardSizeOutOfRange { size: 9, .. })
        ));
    }

    #[test]
    fn test_escalated_board_must_grow() {
        let mut config = CovenantConfig::default();
        config.appeals.default_board_size = 5;
        config.appeals.escalated_board_size = 5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EscalatedBoardNotLarger { .. })
        ));
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = CovenantConfig::default();
        config.appeals.review_window_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyWindow { window: "review_window_secs" })
        ));
    }
}
