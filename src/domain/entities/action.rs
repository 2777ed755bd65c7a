//! Follow-up actions on an existing position.

use crate::domain::errors::ValidationError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of follow-up action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    UpdateSl,
    UpdateEntry,
    /// Take profit level N was reached (1-based)
    TakeProfit(u8),
    OrderFilled,
    OrderCancelled,
    LimitOrderNotFilled,
    ClosePosition,
    StopLossHit,
    PositionClosed,
    BreakEven,
    Tp1AndBreakEven,
    Unknown,
}

impl ActionType {
    /// Wire name used in the AI contract and in logs
    pub fn code(&self) -> String {
        match self {
            ActionType::UpdateSl => "UPDATE_SL".to_string(),
            ActionType::UpdateEntry => "UPDATE_ENTRY".to_string(),
            ActionType::TakeProfit(n) => format!("TAKE_PROFIT_{}", n),
            ActionType::OrderFilled => "ORDER_FILLED".to_string(),
            ActionType::OrderCancelled => "ORDER_CANCELLED".to_string(),
            ActionType::LimitOrderNotFilled => "LIMIT_ORDER_NOT_FILLED".to_string(),
            ActionType::ClosePosition => "CLOSE_POSITION".to_string(),
            ActionType::StopLossHit => "STOP_LOSS_HIT".to_string(),
            ActionType::PositionClosed => "POSITION_CLOSED".to_string(),
            ActionType::BreakEven => "BREAK_EVEN".to_string(),
            ActionType::Tp1AndBreakEven => "TP1_AND_BREAK_EVEN".to_string(),
            ActionType::Unknown => "UNKNOWN".to_string(),
        }
    }

    /// Percentage of the position closed when the action carries none
    pub fn default_close_percentage(&self, later_tp_percentage: Decimal) -> Option<Decimal> {
        match self {
            ActionType::TakeProfit(1) | ActionType::Tp1AndBreakEven => Some(dec!(50)),
            ActionType::TakeProfit(2) => Some(dec!(25)),
            ActionType::TakeProfit(_) => Some(later_tp_percentage),
            ActionType::ClosePosition | ActionType::StopLossHit | ActionType::PositionClosed => {
                Some(dec!(100))
            }
            _ => None,
        }
    }

    pub fn is_full_close(&self) -> bool {
        matches!(
            self,
            ActionType::ClosePosition | ActionType::StopLossHit | ActionType::PositionClosed
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for ActionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        let action = match normalized.as_str() {
            "UPDATE_SL" | "UPDATE_STOP_LOSS" => ActionType::UpdateSl,
            "UPDATE_ENTRY" => ActionType::UpdateEntry,
            "ORDER_FILLED" => ActionType::OrderFilled,
            "ORDER_CANCELLED" | "ORDER_CANCELED" => ActionType::OrderCancelled,
            "LIMIT_ORDER_NOT_FILLED" | "ORDER_NOT_FILLED" => ActionType::LimitOrderNotFilled,
            "CLOSE_POSITION" => ActionType::ClosePosition,
            "STOP_LOSS_HIT" => ActionType::StopLossHit,
            "POSITION_CLOSED" => ActionType::PositionClosed,
            "BREAK_EVEN" | "BREAKEVEN" => ActionType::BreakEven,
            "TP1_AND_BREAK_EVEN" => ActionType::Tp1AndBreakEven,
            "UNKNOWN" => ActionType::Unknown,
            other => {
                let level = other
                    .strip_prefix("TAKE_PROFIT_")
                    .or_else(|| other.strip_prefix("TP"))
                    .and_then(|n| n.parse::<u8>().ok())
                    .filter(|n| *n >= 1);
                match level {
                    Some(n) => ActionType::TakeProfit(n),
                    None => {
                        return Err(ValidationError::InvalidEnum {
                            field: "action_type".to_string(),
                            value: other.to_string(),
                        })
                    }
                }
            }
        };
        Ok(action)
    }
}

/// Value attached to an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ActionValue {
    Price(Decimal),
    BreakEven,
    Text(String),
}

impl fmt::Display for ActionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionValue::Price(p) => write!(f, "{}", p),
            ActionValue::BreakEven => write!(f, "BE"),
            ActionValue::Text(t) => write!(f, "{}", t),
        }
    }
}

/// Side-effect-free description of what the execution collaborator should do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeAction {
    MarketSell,
    PartialSell,
    UpdateStopOrder,
    CancelOrder,
    NoAction,
}

impl fmt::Display for ExchangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeAction::MarketSell => "MARKET_SELL",
            ExchangeAction::PartialSell => "PARTIAL_SELL",
            ExchangeAction::UpdateStopOrder => "UPDATE_STOP_ORDER",
            ExchangeAction::CancelOrder => "CANCEL_ORDER",
            ExchangeAction::NoAction => "NO_ACTION",
        };
        write!(f, "{}", name)
    }
}

/// Position status implied by an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Pending,
    Open,
    PartiallyClosed,
    Closed,
    Cancelled,
    Unknown,
}

/// A classified follow-up signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionAction {
    pub action_type: ActionType,
    pub value: Option<ActionValue>,
    pub close_percentage: Option<Decimal>,
    pub coin_symbol: Option<String>,
    pub reason: String,
    pub source_text: String,
    pub exchange_action: ExchangeAction,
    pub position_status: PositionStatus,
}

/// The parser's name for a classified follow-up
pub type UpdateIntent = PositionAction;

impl PositionAction {
    pub fn unknown(source_text: &str, coin_symbol: Option<String>) -> Self {
        Self {
            action_type: ActionType::Unknown,
            value: None,
            close_percentage: None,
            coin_symbol,
            reason: "no known follow-up pattern matched".to_string(),
            source_text: source_text.to_string(),
            exchange_action: ExchangeAction::NoAction,
            position_status: PositionStatus::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.action_type == ActionType::Unknown
    }
}
