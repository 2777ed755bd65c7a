//! Ledger row for a trade this system believes it holds.

use crate::domain::entities::intent::PositionType;
use crate::domain::errors::ValidationError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Pending,
    Open,
    PartiallyClosed,
    Closed,
    Failed,
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Open => "OPEN",
            TradeStatus::PartiallyClosed => "PARTIALLY_CLOSED",
            TradeStatus::Closed => "CLOSED",
            TradeStatus::Failed => "FAILED",
            TradeStatus::Cancelled => "CANCELLED",
        }
    }

    /// No further venue activity is expected for terminal rows
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Closed | TradeStatus::Failed | TradeStatus::Cancelled
        )
    }

    /// Rows that claim a live position on the venue
    pub fn holds_position(&self) -> bool {
        matches!(self, TradeStatus::Open | TradeStatus::PartiallyClosed)
    }

    pub fn active() -> [TradeStatus; 3] {
        [
            TradeStatus::Pending,
            TradeStatus::Open,
            TradeStatus::PartiallyClosed,
        ]
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(TradeStatus::Pending),
            "OPEN" => Ok(TradeStatus::Open),
            "PARTIALLY_CLOSED" => Ok(TradeStatus::PartiallyClosed),
            "CLOSED" => Ok(TradeStatus::Closed),
            "FAILED" => Ok(TradeStatus::Failed),
            "CANCELLED" | "CANCELED" => Ok(TradeStatus::Cancelled),
            other => Err(ValidationError::InvalidEnum {
                field: "status".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub coin_symbol: String,
    pub position_type: PositionType,
    pub status: TradeStatus,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub position_size: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sync_issues: BTreeSet<String>,
    pub manual_verification_needed: bool,
}

impl Trade {
    /// A freshly submitted order, not yet confirmed by the venue
    pub fn pending(
        id: impl Into<String>,
        coin_symbol: impl Into<String>,
        position_type: PositionType,
        position_size: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            exchange_order_id: None,
            client_order_id: None,
            coin_symbol: coin_symbol.into(),
            position_type,
            status: TradeStatus::Pending,
            entry_price: None,
            exit_price: None,
            position_size,
            created_at: now,
            updated_at: now,
            sync_issues: BTreeSet::new(),
            manual_verification_needed: false,
        }
    }

    pub fn with_exchange_order_id(mut self, id: impl Into<String>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    pub fn with_status(mut self, status: TradeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn has_venue_identity(&self) -> bool {
        self.exchange_order_id.is_some() || self.client_order_id.is_some()
    }

    /// Records a sync issue; returns false when it was already recorded
    pub fn add_sync_issue(&mut self, issue: impl Into<String>) -> bool {
        self.sync_issues.insert(issue.into())
    }
}
