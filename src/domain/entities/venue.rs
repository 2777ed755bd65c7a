//! Venue-side records consumed by reconciliation.

use crate::domain::entities::intent::PositionType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order status as reported by the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl VenueOrderStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, VenueOrderStatus::New | VenueOrderStatus::PartiallyFilled)
    }

    pub fn has_fills(&self) -> bool {
        matches!(
            self,
            VenueOrderStatus::PartiallyFilled | VenueOrderStatus::Filled
        )
    }
}

impl fmt::Display for VenueOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VenueOrderStatus::New => "NEW",
            VenueOrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            VenueOrderStatus::Filled => "FILLED",
            VenueOrderStatus::Cancelled => "CANCELLED",
            VenueOrderStatus::Rejected => "REJECTED",
            VenueOrderStatus::Expired => "EXPIRED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueOrder {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: PositionType,
    pub size: Decimal,
    pub filled_size: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub status: VenueOrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub position_id: Option<String>,
    pub symbol: String,
    pub side: PositionType,
    pub size: Decimal,
    pub entry_price: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

/// A single fill reported by the venue.
///
/// `side` is the direction of the fill itself: a LONG fill buys, a SHORT
/// fill sells. Closing a short therefore shows up as a LONG execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: String,
    pub order_id: Option<String>,
    pub symbol: String,
    pub side: PositionType,
    pub price: Decimal,
    pub size: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// Point-in-time view of the venue, consumed once per reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VenueSnapshot {
    pub venue: String,
    pub orders: Vec<VenueOrder>,
    pub positions: Vec<VenuePosition>,
    pub executions: Vec<Execution>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl VenueSnapshot {
    pub fn new(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            taken_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_orders(mut self, orders: Vec<VenueOrder>) -> Self {
        self.orders = orders;
        self
    }

    pub fn with_positions(mut self, positions: Vec<VenuePosition>) -> Self {
        self.positions = positions;
        self
    }

    pub fn with_executions(mut self, executions: Vec<Execution>) -> Self {
        self.executions = executions;
        self
    }
}

/// Size-weighted average price of a set of fills
pub fn weighted_average_price<'a, I>(executions: I) -> Option<(Decimal, Decimal)>
where
    I: IntoIterator<Item = &'a Execution>,
{
    let (notional, size) = executions
        .into_iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(notional, size), e| {
            (notional + e.price * e.size, size + e.size)
        });

    if size.is_zero() {
        None
    } else {
        Some((notional / size, size))
    }
}
