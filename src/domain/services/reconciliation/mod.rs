//! Reconciliation module
//!
//! Compares the trade ledger with a point-in-time venue snapshot and
//! produces guarded corrective actions. The engine itself is pure; fetching
//! and writing happen in the reconciliation actor.

pub mod attribution;
pub mod engine;
pub mod report;

pub use attribution::{Attribution, AttributionWindow};
pub use engine::{ExecutionQuery, ReconciliationEngine};
pub use report::{
    CorrectiveAction, ReconciliationReport, ReconciliationStatus, RowClassification, RowOutcome,
};

use crate::config::ReconciliationConfig;
use crate::domain::repositories::ledger_store::LedgerError;
use crate::domain::repositories::venue_client::VenueError;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort (part of) a reconciliation pass
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReconciliationError {
    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Venue did not answer within {0}ms")]
    Timeout(u64),

    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("Audit write failed: {0}")]
    Audit(String),

    #[error("Reconciliation actor is not running")]
    ActorUnavailable,
}

impl ReconciliationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ReconciliationError::Venue(_) => "ERR_VENUE",
            ReconciliationError::Ledger(_) => "ERR_LEDGER",
            ReconciliationError::Timeout(_) => "ERR_TIMEOUT",
            ReconciliationError::RetryExhausted { .. } => "ERR_RETRY_EXHAUSTED",
            ReconciliationError::Audit(_) => "ERR_AUDIT",
            ReconciliationError::ActorUnavailable => "ERR_ACTOR_UNAVAILABLE",
        }
    }

    /// Whether retrying the failed step might help
    pub fn is_recoverable(&self) -> bool {
        match self {
            ReconciliationError::Venue(e) => e.is_recoverable(),
            ReconciliationError::Timeout(_) => true,
            ReconciliationError::Ledger(LedgerError::Storage(_)) => true,
            _ => false,
        }
    }
}

/// Retry policy for venue reads
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_millis: u64,
    pub max_delay_millis: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_millis: 1000,
            max_delay_millis: 10000,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ReconciliationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        self.initial_delay_millis
            .saturating_mul(factor)
            .min(self.max_delay_millis)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_for_attempt(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), 1000);
        assert_eq!(policy.delay_for_attempt(1), 2000);
        assert_eq!(policy.delay_for_attempt(3), 8000);
        assert_eq!(policy.delay_for_attempt(4), 10000);
        assert_eq!(policy.delay_for_attempt(80), 10000);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = ReconciliationConfig {
            max_retries: 5,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_retries, 5);
    }

    #[test]
    fn test_error_recoverability() {
        assert!(ReconciliationError::Timeout(100).is_recoverable());
        assert!(ReconciliationError::Venue(VenueError::RateLimited).is_recoverable());
        assert!(!ReconciliationError::Venue(VenueError::AuthenticationError(
            "bad key".to_string()
        ))
        .is_recoverable());
        assert_eq!(
            ReconciliationError::ActorUnavailable.error_code(),
            "ERR_ACTOR_UNAVAILABLE"
        );
    }
}
