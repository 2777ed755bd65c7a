//! Structured representation of a new-trade signal.

use crate::domain::errors::ValidationError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionType {
    Long,
    Short,
}

impl PositionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionType::Long => "LONG",
            PositionType::Short => "SHORT",
        }
    }

    pub fn opposite(&self) -> PositionType {
        match self {
            PositionType::Long => PositionType::Short,
            PositionType::Short => PositionType::Long,
        }
    }
}

impl fmt::Display for PositionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PositionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LONG" | "BUY" => Ok(PositionType::Long),
            "SHORT" | "SELL" => Ok(PositionType::Short),
            other => Err(ValidationError::InvalidEnum {
                field: "position_type".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// How the entry order is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
    Spot,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Spot => "SPOT",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            "SPOT" => Ok(OrderType::Spot),
            other => Err(ValidationError::InvalidEnum {
                field: "order_type".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Stop loss as written in a signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StopLoss {
    Price(Decimal),
    BreakEven,
    /// e.g. "4h close below 100"
    Conditional(String),
}

impl StopLoss {
    pub fn price(&self) -> Option<Decimal> {
        match self {
            StopLoss::Price(p) => Some(*p),
            _ => None,
        }
    }
}

impl fmt::Display for StopLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopLoss::Price(p) => write!(f, "{}", p),
            StopLoss::BreakEven => write!(f, "BE"),
            StopLoss::Conditional(text) => write!(f, "{}", text),
        }
    }
}

/// A parsed new-trade signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub coin_symbol: String,
    pub position_type: PositionType,
    pub entry_prices: Vec<Decimal>,
    pub stop_loss: Option<StopLoss>,
    pub take_profits: Vec<Decimal>,
    pub order_type: OrderType,
    pub quantity_multiplier: Option<u64>,
    pub risk_level: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TradeIntent {
    pub fn new(
        coin_symbol: impl Into<String>,
        position_type: PositionType,
        entry_prices: Vec<Decimal>,
        order_type: OrderType,
    ) -> Self {
        Self {
            coin_symbol: coin_symbol.into(),
            position_type,
            entry_prices,
            stop_loss: None,
            take_profits: Vec::new(),
            order_type,
            quantity_multiplier: None,
            risk_level: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_stop_loss(mut self, stop_loss: StopLoss) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    /// Symbol as listed on a venue, quantity prefix included ("1000TOSHI")
    pub fn venue_symbol(&self) -> String {
        match self.quantity_multiplier {
            Some(multiplier) if multiplier > 1 => format!("{}{}", multiplier, self.coin_symbol),
            _ => self.coin_symbol.clone(),
        }
    }
}

/// Follow-up context supplied by the chat transport for an existing trade.
///
/// Every field is optional because transports hand over whatever they have.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveTrade {
    #[serde(default)]
    pub trade_id: Option<String>,
    #[serde(default, alias = "symbol")]
    pub coin_symbol: Option<String>,
    #[serde(default, alias = "side")]
    pub position_type: Option<PositionType>,
    #[serde(default)]
    pub entry_price: Option<Decimal>,
    #[serde(default)]
    pub exchange_order_id: Option<String>,
}

impl ActiveTrade {
    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        Self {
            coin_symbol: Some(symbol.into()),
            ..Default::default()
        }
    }

    /// Lenient conversion from whatever JSON the transport delivered
    pub fn from_json(value: &serde_json::Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        let coin_symbol = text("coin_symbol")
            .or_else(|| text("symbol"))
            .map(|s| s.trim().to_uppercase());
        let position_type = text("position_type")
            .or_else(|| text("side"))
            .and_then(|s| s.parse().ok());
        let entry_price = value.get("entry_price").and_then(|v| match v {
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        });
        let trade_id = text("trade_id").or_else(|| {
            value
                .get("id")
                .and_then(|v| v.as_i64())
                .map(|id| id.to_string())
        });

        Self {
            trade_id,
            coin_symbol,
            position_type,
            entry_price,
            exchange_order_id: text("exchange_order_id"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_type_from_str() {
        assert_eq!("long".parse::<PositionType>().unwrap(), PositionType::Long);
        assert_eq!("SELL".parse::<PositionType>().unwrap(), PositionType::Short);
        assert!("sideways".parse::<PositionType>().is_err());
    }

    #[test]
    fn test_order_type_from_str() {
        assert_eq!("limit".parse::<OrderType>().unwrap(), OrderType::Limit);
        assert_eq!(" Spot ".parse::<OrderType>().unwrap(), OrderType::Spot);
        let err = "stop".parse::<OrderType>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid value 'STOP' for order_type");
    }

    #[test]
    fn test_venue_symbol_with_multiplier() {
        let mut intent = TradeIntent::new("TOSHI", PositionType::Long, vec![dec!(0.7172)], OrderType::Market);
        assert_eq!(intent.venue_symbol(), "TOSHI");
        intent.quantity_multiplier = Some(1000);
        assert_eq!(intent.venue_symbol(), "1000TOSHI");
    }

    #[test]
    fn test_active_trade_from_loose_json() {
        let ctx = ActiveTrade::from_json(&serde_json::json!({
            "id": 42,
            "symbol": "eth",
            "side": "short",
            "entry_price": "3120.5"
        }));
        assert_eq!(ctx.trade_id.as_deref(), Some("42"));
        assert_eq!(ctx.coin_symbol.as_deref(), Some("ETH"));
        assert_eq!(ctx.position_type, Some(PositionType::Short));
        assert_eq!(ctx.entry_price, Some(dec!(3120.5)));
    }

    #[test]
    fn test_stop_loss_display() {
        assert_eq!(StopLoss::BreakEven.to_string(), "BE");
        assert_eq!(StopLoss::Price(dec!(112392)).to_string(), "112392");
    }
}
