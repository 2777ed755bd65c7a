//! Ledger Store Trait
//!
//! Read/write access to `Trade` rows. The reconciliation pass is the only
//! writer that resolves conflicts with the venue, and it writes exclusively
//! through [`LedgerStore::apply_correction`], whose guard makes every
//! correction safe to retry.

use crate::domain::entities::trade::{Trade, TradeStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Trade not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt ledger row {id}: {reason}")]
    CorruptRow { id: String, reason: String },
}

impl LedgerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "ERR_TRADE_NOT_FOUND",
            LedgerError::Storage(_) => "ERR_LEDGER_STORAGE",
            LedgerError::CorruptRow { .. } => "ERR_CORRUPT_ROW",
        }
    }
}

/// Field changes computed by reconciliation for one ledger row.
///
/// `expected_status`/`expected_updated_at` capture the row as it was read;
/// a store only applies the change while the row still matches them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCorrection {
    pub trade_id: String,
    pub expected_status: TradeStatus,
    pub expected_updated_at: DateTime<Utc>,
    pub new_status: Option<TradeStatus>,
    pub exchange_order_id: Option<String>,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub position_size: Option<Decimal>,
    pub manual_verification_needed: bool,
    pub sync_issue: Option<String>,
    pub reason: String,
}

impl TradeCorrection {
    pub fn for_trade(trade: &Trade, reason: impl Into<String>) -> Self {
        Self {
            trade_id: trade.id.clone(),
            expected_status: trade.status,
            expected_updated_at: trade.updated_at,
            new_status: None,
            exchange_order_id: None,
            entry_price: None,
            exit_price: None,
            position_size: None,
            manual_verification_needed: false,
            sync_issue: None,
            reason: reason.into(),
        }
    }

    pub fn status(mut self, status: TradeStatus) -> Self {
        self.new_status = Some(status);
        self
    }

    pub fn flag(mut self, issue: impl Into<String>) -> Self {
        self.manual_verification_needed = true;
        self.sync_issue = Some(issue.into());
        self
    }

    /// Appends a sync issue without asking for manual review
    pub fn note(mut self, issue: impl Into<String>) -> Self {
        self.sync_issue = Some(issue.into());
        self
    }

    pub fn exchange_order_id(mut self, id: impl Into<String>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }

    /// Entry price and size attributed from venue fills
    pub fn fill(mut self, entry_price: Decimal, position_size: Decimal) -> Self {
        self.entry_price = Some(entry_price);
        if position_size > Decimal::ZERO {
            self.position_size = Some(position_size);
        }
        self
    }

    pub fn exit_price(mut self, price: Decimal) -> Self {
        self.exit_price = Some(price);
        self
    }

    /// True when applying the correction would change nothing
    pub fn is_noop_for(&self, trade: &Trade) -> bool {
        self.new_status.map_or(true, |s| s == trade.status)
            && self
                .exchange_order_id
                .as_ref()
                .map_or(true, |id| trade.exchange_order_id.as_ref() == Some(id))
            && self.entry_price.map_or(true, |p| trade.entry_price == Some(p))
            && self.exit_price.map_or(true, |p| trade.exit_price == Some(p))
            && self.position_size.map_or(true, |s| trade.position_size == s)
            && (!self.manual_verification_needed || trade.manual_verification_needed)
            && self
                .sync_issue
                .as_ref()
                .map_or(true, |issue| trade.sync_issues.contains(issue))
    }

    /// Applies the correction to an in-memory copy of the row
    pub fn apply_to(&self, trade: &mut Trade, now: DateTime<Utc>) {
        if let Some(status) = self.new_status {
            trade.status = status;
        }
        if let Some(id) = &self.exchange_order_id {
            trade.exchange_order_id = Some(id.clone());
        }
        if let Some(price) = self.entry_price {
            trade.entry_price = Some(price);
        }
        if let Some(price) = self.exit_price {
            trade.exit_price = Some(price);
        }
        if let Some(size) = self.position_size {
            trade.position_size = size;
        }
        if self.manual_verification_needed {
            trade.manual_verification_needed = true;
        }
        if let Some(issue) = &self.sync_issue {
            trade.add_sync_issue(issue.clone());
        }
        trade.updated_at = now;
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert(&self, trade: &Trade) -> LedgerResult<()>;

    async fn get(&self, id: &str) -> LedgerResult<Option<Trade>>;

    async fn list_by_status(&self, statuses: &[TradeStatus]) -> LedgerResult<Vec<Trade>>;

    async fn list_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> LedgerResult<Vec<Trade>>;

    /// Compare-and-set write. Returns `Ok(false)` when the row changed since
    /// the correction was computed, in which case nothing is written.
    async fn apply_correction(&self, correction: &TradeCorrection) -> LedgerResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::intent::PositionType;
    use rust_decimal_macros::dec;

    #[test]
    fn test_apply_to_updates_fields() {
        let mut trade = Trade::pending("t-1", "BTC", PositionType::Long, dec!(0.1));
        let correction = TradeCorrection::for_trade(&trade, "venue reports fill")
            .status(TradeStatus::Open)
            .flag("entry price unverified");
        let now = Utc::now();

        correction.apply_to(&mut trade, now);

        assert_eq!(trade.status, TradeStatus::Open);
        assert!(trade.manual_verification_needed);
        assert!(trade.sync_issues.contains("entry price unverified"));
        assert_eq!(trade.updated_at, now);
    }

    #[test]
    fn test_is_noop_after_apply() {
        let mut trade = Trade::pending("t-2", "ETH", PositionType::Short, dec!(1));
        let correction = TradeCorrection::for_trade(&trade, "filled")
            .status(TradeStatus::Open)
            .fill(dec!(3000), dec!(1.5))
            .note("partially filled");
        assert!(!correction.is_noop_for(&trade));

        correction.apply_to(&mut trade, Utc::now());
        assert!(correction.is_noop_for(&trade));
        assert_eq!(trade.position_size, dec!(1.5));
        assert!(!trade.manual_verification_needed);
    }
}
