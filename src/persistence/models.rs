//! Database Models
//!
//! Rows as stored; conversions to domain types validate every column.

use crate::domain::entities::trade::Trade;
use crate::domain::repositories::ledger_store::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Trade record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRow {
    pub id: String,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub coin_symbol: String,
    pub position_type: String,
    pub status: String,
    pub entry_price: Option<String>,
    pub exit_price: Option<String>,
    pub position_size: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sync_issues: String, // JSON array
    pub manual_verification_needed: bool,
}

impl TradeRow {
    pub fn from_trade(trade: &Trade) -> Result<Self, LedgerError> {
        let sync_issues = serde_json::to_string(&trade.sync_issues).map_err(|e| {
            LedgerError::CorruptRow {
                id: trade.id.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            id: trade.id.clone(),
            exchange_order_id: trade.exchange_order_id.clone(),
            client_order_id: trade.client_order_id.clone(),
            coin_symbol: trade.coin_symbol.clone(),
            position_type: trade.position_type.as_str().to_string(),
            status: trade.status.as_str().to_string(),
            entry_price: trade.entry_price.map(|p| p.to_string()),
            exit_price: trade.exit_price.map(|p| p.to_string()),
            position_size: trade.position_size.to_string(),
            created_at: trade.created_at,
            updated_at: trade.updated_at,
            sync_issues,
            manual_verification_needed: trade.manual_verification_needed,
        })
    }
}

impl TryFrom<TradeRow> for Trade {
    type Error = LedgerError;

    fn try_from(row: TradeRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| LedgerError::CorruptRow {
            id: row.id.clone(),
            reason,
        };
        let decimal = |field: &str, raw: &str| {
            Decimal::from_str(raw).map_err(|e| corrupt(format!("{}: {}", field, e)))
        };

        let position_type = row
            .position_type
            .parse()
            .map_err(|e| corrupt(format!("position_type: {}", e)))?;
        let status = row
            .status
            .parse()
            .map_err(|e| corrupt(format!("status: {}", e)))?;
        let entry_price = row
            .entry_price
            .as_deref()
            .map(|raw| decimal("entry_price", raw))
            .transpose()?;
        let exit_price = row
            .exit_price
            .as_deref()
            .map(|raw| decimal("exit_price", raw))
            .transpose()?;
        let position_size = decimal("position_size", &row.position_size)?;
        let sync_issues: BTreeSet<String> = serde_json::from_str(&row.sync_issues)
            .map_err(|e| corrupt(format!("sync_issues: {}", e)))?;

        Ok(Trade {
            id: row.id,
            exchange_order_id: row.exchange_order_id,
            client_order_id: row.client_order_id,
            coin_symbol: row.coin_symbol,
            position_type,
            status,
            entry_price,
            exit_price,
            position_size,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sync_issues,
            manual_verification_needed: row.manual_verification_needed,
        })
    }
}

/// Reconciliation audit record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReconciliationAuditRow {
    pub id: i64,
    pub venue: String,
    pub reconciliation_timestamp: DateTime<Utc>,
    pub status: String,
    pub consistent_count: i64,
    pub drifted_count: i64,
    pub orphan_in_ledger_count: i64,
    pub orphan_on_venue_count: i64,
    pub corrections_applied: i64,
    pub corrections_skipped: i64,
    pub write_failures: i64,
    pub report_json: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::intent::PositionType;
    use crate::domain::entities::trade::TradeStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_row_round_trip() {
        let mut trade = Trade::pending("t-1", "ETH", PositionType::Short, dec!(2.5))
            .with_client_order_id("c-1")
            .with_status(TradeStatus::Open);
        trade.entry_price = Some(dec!(3050.25));
        trade.add_sync_issue("entry price unverified");

        let row = TradeRow::from_trade(&trade).unwrap();
        assert_eq!(row.status, "OPEN");
        assert_eq!(row.position_type, "SHORT");

        let back = Trade::try_from(row).unwrap();
        assert_eq!(back, trade);
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let trade = Trade::pending("t-2", "BTC", PositionType::Long, dec!(1));
        let mut row = TradeRow::from_trade(&trade).unwrap();
        row.position_size = "lots".to_string();

        match Trade::try_from(row) {
            Err(LedgerError::CorruptRow { id, reason }) => {
                assert_eq!(id, "t-2");
                assert!(reason.starts_with("position_size"));
            }
            other => panic!("expected corrupt row, got {:?}", other),
        }
    }
}
