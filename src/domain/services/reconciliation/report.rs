//! Outcome of one reconciliation pass.

use crate::domain::entities::venue::{VenueOrder, VenuePosition};
use crate::domain::errors::ReconciliationConflict;
use crate::domain::repositories::ledger_store::TradeCorrection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a ledger row (or an unmatched venue record) compares with the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowClassification {
    Consistent,
    Drifted,
    OrphanInLedger,
    OrphanOnVenue,
}

impl RowClassification {
    pub fn severity(&self) -> ReconciliationStatus {
        match self {
            RowClassification::Consistent => ReconciliationStatus::Ok,
            RowClassification::Drifted => ReconciliationStatus::Minor,
            RowClassification::OrphanOnVenue => ReconciliationStatus::Major,
            RowClassification::OrphanInLedger => ReconciliationStatus::Critical,
        }
    }
}

impl fmt::Display for RowClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RowClassification::Consistent => "CONSISTENT",
            RowClassification::Drifted => "DRIFTED",
            RowClassification::OrphanInLedger => "ORPHAN_IN_LEDGER",
            RowClassification::OrphanOnVenue => "ORPHAN_ON_VENUE",
        };
        write!(f, "{}", name)
    }
}

/// Overall status of a pass, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReconciliationStatus {
    Ok,
    Minor,
    Major,
    Critical,
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Ok => "OK",
                Self::Minor => "MINOR",
                Self::Major => "MAJOR",
                Self::Critical => "CRITICAL",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub trade_id: Option<String>,
    pub venue_reference: Option<String>,
    pub symbol: String,
    pub classification: RowClassification,
    pub explanation: String,
}

/// Something the caller should do about a discrepancy.
///
/// Only `UpdateTrade` and `CancelVenueOrder` mutate state; the review
/// variants are surfaced for a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CorrectiveAction {
    UpdateTrade(TradeCorrection),
    ReviewVenueOrder {
        order: VenueOrder,
        conflict: ReconciliationConflict,
    },
    ReviewVenuePosition {
        position: VenuePosition,
        conflict: ReconciliationConflict,
    },
    CancelVenueOrder {
        order: VenueOrder,
        conflict: ReconciliationConflict,
    },
}

impl CorrectiveAction {
    pub fn trade_id(&self) -> Option<&str> {
        match self {
            CorrectiveAction::UpdateTrade(correction) => Some(&correction.trade_id),
            _ => None,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            CorrectiveAction::UpdateTrade(_) | CorrectiveAction::CancelVenueOrder { .. }
        )
    }

    pub fn describe(&self) -> String {
        match self {
            CorrectiveAction::UpdateTrade(c) => match c.new_status {
                Some(status) => format!(
                    "update trade {}: {} -> {} ({})",
                    c.trade_id, c.expected_status, status, c.reason
                ),
                None => format!("update trade {}: {}", c.trade_id, c.reason),
            },
            CorrectiveAction::ReviewVenueOrder { conflict, .. }
            | CorrectiveAction::ReviewVenuePosition { conflict, .. } => {
                format!("review: {}", conflict)
            }
            CorrectiveAction::CancelVenueOrder { order, .. } => {
                format!("cancel orphan order {} ({})", order.order_id, order.symbol)
            }
        }
    }
}

/// Reconciliation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub venue: String,
    pub timestamp: DateTime<Utc>,
    pub outcomes: Vec<RowOutcome>,
    pub actions: Vec<CorrectiveAction>,
    pub status: ReconciliationStatus,
    /// Filled in by the actor after the guarded writes
    pub corrections_applied: usize,
    pub corrections_skipped: usize,
    pub write_failures: usize,
}

impl ReconciliationReport {
    pub fn new(venue: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            venue: venue.into(),
            timestamp,
            outcomes: Vec::new(),
            actions: Vec::new(),
            status: ReconciliationStatus::Ok,
            corrections_applied: 0,
            corrections_skipped: 0,
            write_failures: 0,
        }
    }

    pub fn add_outcome(&mut self, outcome: RowOutcome) {
        // Update status to worst severity
        self.status = self.status.max(outcome.classification.severity());
        self.outcomes.push(outcome);
    }

    pub fn add_action(&mut self, action: CorrectiveAction) {
        if let CorrectiveAction::UpdateTrade(c) = &action {
            if c.manual_verification_needed {
                self.status = self.status.max(ReconciliationStatus::Major);
            }
        }
        self.actions.push(action);
    }

    pub fn count(&self, classification: RowClassification) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.classification == classification)
            .count()
    }

    pub fn corrections(&self) -> impl Iterator<Item = &TradeCorrection> {
        self.actions.iter().filter_map(|a| match a {
            CorrectiveAction::UpdateTrade(c) => Some(c),
            _ => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} [{}]: {} consistent, {} drifted, {} orphan in ledger, {} orphan on venue, {} actions",
            self.venue,
            self.status,
            self.count(RowClassification::Consistent),
            self.count(RowClassification::Drifted),
            self.count(RowClassification::OrphanInLedger),
            self.count(RowClassification::OrphanOnVenue),
            self.actions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(classification: RowClassification) -> RowOutcome {
        RowOutcome {
            trade_id: Some("t-1".to_string()),
            venue_reference: None,
            symbol: "BTC".to_string(),
            classification,
            explanation: String::new(),
        }
    }

    #[test]
    fn test_status_escalates_to_worst() {
        let mut report = ReconciliationReport::new("hyperliquid", Utc::now());
        assert_eq!(report.status, ReconciliationStatus::Ok);

        report.add_outcome(outcome(RowClassification::Drifted));
        assert_eq!(report.status, ReconciliationStatus::Minor);

        report.add_outcome(outcome(RowClassification::OrphanInLedger));
        report.add_outcome(outcome(RowClassification::Consistent));
        assert_eq!(report.status, ReconciliationStatus::Critical);
        assert_eq!(report.count(RowClassification::Drifted), 1);
    }

    #[test]
    fn test_summary_mentions_counts() {
        let mut report = ReconciliationReport::new("binance", Utc::now());
        report.add_outcome(outcome(RowClassification::Consistent));
        let summary = report.summary();
        assert!(summary.starts_with("binance [OK]"));
        assert!(summary.contains("1 consistent"));
        assert!(report.is_clean());
    }
}
