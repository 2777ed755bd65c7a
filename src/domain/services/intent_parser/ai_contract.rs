//! JSON contract between the parser and the AI completion capability.

use crate::domain::entities::action::{ActionType, ActionValue, PositionAction};
use crate::domain::entities::intent::{OrderType, PositionType, StopLoss, TradeIntent};
use crate::domain::errors::{CapabilityError, ParseError, ValidationError};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

pub const NEW_TRADE_SYSTEM_PROMPT: &str = r#"You extract trading signals into JSON.
Return exactly one JSON object with these fields:
- "coin_symbol": uppercase ticker without quote currency (e.g. "BTC")
- "position_type": "LONG" or "SHORT"
- "entry_prices": array of numbers, in the order written
- "stop_loss": number, "BE", a short condition string, or null
- "take_profits": array of numbers (may be empty)
- "order_type": "MARKET", "LIMIT" or "SPOT"
- "risk_level": string or null
- "confidence": number between 0 and 1
Words like short, shorted, sell mean SHORT; long, longed, buy mean LONG.
If a field is not present in the message use null; never invent prices."#;

pub const UPDATE_SYSTEM_PROMPT: &str = r#"You classify follow-up messages about an open trade into JSON.
Return exactly one JSON object with these fields:
- "action_type": one of UPDATE_SL, UPDATE_ENTRY, TAKE_PROFIT_<n>, ORDER_FILLED,
  ORDER_CANCELLED, LIMIT_ORDER_NOT_FILLED, CLOSE_POSITION, STOP_LOSS_HIT,
  POSITION_CLOSED, BREAK_EVEN, TP1_AND_BREAK_EVEN, UNKNOWN
- "value": number, "BE", or null
- "close_percentage": number between 0 and 100, or null
- "coin_symbol": uppercase ticker or null
- "reason": short explanation
- "confidence": number between 0 and 1
"Stopped BE" means STOP_LOSS_HIT; "Closed BE" means POSITION_CLOSED.
A take profit together with moving the stop to breakeven is TP1_AND_BREAK_EVEN."#;

const QUOTE_SUFFIXES: [&str; 4] = ["USDT", "USDC", "PERP", "USD"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiTradeResponse {
    #[serde(default)]
    pub coin_symbol: Option<String>,
    #[serde(default)]
    pub position_type: Option<String>,
    #[serde(default)]
    pub entry_prices: Option<Value>,
    #[serde(default)]
    pub stop_loss: Option<Value>,
    #[serde(default)]
    pub take_profits: Option<Value>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiUpdateResponse {
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub close_percentage: Option<Value>,
    #[serde(default)]
    pub coin_symbol: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Parses the capability's raw text, tolerating a Markdown code fence
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CapabilityError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|inner| inner.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).map_err(|e| CapabilityError::Schema(e.to_string()))
}

impl AiTradeResponse {
    /// Applies the contract's required-field and enum constraints
    pub fn into_intent(self) -> Result<TradeIntent, ParseError> {
        let raw_symbol = self
            .coin_symbol
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ParseError::missing("coin_symbol"))?;
        let (quantity_multiplier, coin_symbol) = normalize_symbol(&raw_symbol);

        let position_type: PositionType = self
            .position_type
            .ok_or_else(|| ParseError::missing("position_type"))?
            .parse()?;
        let order_type = match self.order_type {
            Some(raw) => raw.parse::<OrderType>()?,
            None => OrderType::Market,
        };

        let entry_prices = decimal_list("entry_prices", self.entry_prices.as_ref())?;
        if entry_prices.is_empty() {
            return Err(ParseError::missing("entry_prices"));
        }
        let take_profits = decimal_list("take_profits", self.take_profits.as_ref())?;
        let stop_loss = self.stop_loss.as_ref().and_then(stop_loss_from);

        let mut intent = TradeIntent::new(coin_symbol, position_type, entry_prices, order_type);
        intent.stop_loss = stop_loss;
        intent.take_profits = take_profits;
        intent.quantity_multiplier = quantity_multiplier;
        intent.risk_level = self
            .risk_level
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty());
        Ok(intent)
    }
}

impl AiUpdateResponse {
    /// Partial action; derived fields are filled in by the update mapper
    pub fn into_action(self, source_text: &str) -> Result<PositionAction, ParseError> {
        let action_type = match self.action_type {
            Some(raw) => raw.parse::<ActionType>()?,
            None => return Err(ParseError::missing("action_type")),
        };

        let value = match self.value.as_ref() {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if is_break_even(s) => Some(ActionValue::BreakEven),
            Some(other) => match decimal_from_value(other) {
                Some(price) => Some(ActionValue::Price(price)),
                None => Some(ActionValue::Text(value_text(other))),
            },
        };
        let close_percentage = self.close_percentage.as_ref().and_then(decimal_from_value);

        let mut action = PositionAction::unknown(source_text, None);
        action.action_type = action_type;
        action.value = value;
        action.close_percentage = close_percentage;
        action.coin_symbol = self
            .coin_symbol
            .filter(|s| !s.trim().is_empty())
            .map(|s| normalize_symbol(&s).1);
        action.reason = self.reason.unwrap_or_default();
        Ok(action)
    }
}

/// "1000pepeusdt" -> (Some(1000), "PEPE")
pub fn normalize_symbol(raw: &str) -> (Option<u64>, String) {
    let mut symbol = raw
        .trim()
        .trim_start_matches(['$', '#'])
        .to_uppercase()
        .replace(['/', '-', '_', ' '], "");
    for suffix in QUOTE_SUFFIXES {
        if symbol.len() > suffix.len() {
            if let Some(stripped) = symbol.strip_suffix(suffix) {
                symbol = stripped.to_string();
                break;
            }
        }
    }

    let digits: String = symbol.chars().take_while(|c| c.is_ascii_digit()).collect();
    if !digits.is_empty() && digits.len() < symbol.len() {
        if let Ok(quantity) = digits.parse::<u64>() {
            if quantity > 0 {
                return (Some(quantity), symbol[digits.len()..].to_string());
            }
        }
    }
    (None, symbol)
}

fn is_break_even(text: &str) -> bool {
    matches!(
        text.trim().to_uppercase().replace([' ', '-'], "").as_str(),
        "BE" | "B/E" | "BREAKEVEN"
    )
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn decimal_from_str(text: &str) -> Option<Decimal> {
    let cleaned = text.trim().replace(',', "");
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => decimal_from_str(&n.to_string()),
        Value::String(s) => decimal_from_str(s),
        _ => None,
    }
}

fn decimal_list(field: &str, value: Option<&Value>) -> Result<Vec<Decimal>, ValidationError> {
    let invalid = |v: &Value| ValidationError::InvalidEnum {
        field: field.to_string(),
        value: value_text(v),
    };

    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| decimal_from_value(item).ok_or_else(|| invalid(item)))
            .collect(),
        Some(Value::String(s)) => s
            .split(|c: char| c == '-' || c == '/' || c == ' ' || c == ';')
            .filter(|part| !part.trim().is_empty())
            .map(|part| decimal_from_str(part).ok_or_else(|| invalid(&Value::String(s.clone()))))
            .collect(),
        Some(other) => decimal_from_value(other)
            .map(|d| vec![d])
            .ok_or_else(|| invalid(other)),
    }
}

fn stop_loss_from(value: &Value) -> Option<StopLoss> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) if is_break_even(s) => Some(StopLoss::BreakEven),
        other => match decimal_from_value(other) {
            Some(price) => Some(StopLoss::Price(price)),
            None => Some(StopLoss::Conditional(value_text(other))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decode_strips_code_fence() {
        let raw = "```json\n{\"coin_symbol\": \"BTC\", \"confidence\": 0.9}\n```";
        let response: AiTradeResponse = decode(raw).unwrap();
        assert_eq!(response.coin_symbol.as_deref(), Some("BTC"));
        assert_eq!(response.confidence, Some(0.9));
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let err = decode::<AiTradeResponse>("I think this is a long").unwrap_err();
        assert!(matches!(err, CapabilityError::Schema(_)));
    }

    #[test]
    fn test_into_intent_converts_lenient_values() {
        let response: AiTradeResponse = decode(
            r#"{"coin_symbol":"1000pepeusdt","position_type":"short","entry_prices":"0.0121-0.0125",
                "stop_loss":"BE","take_profits":[0.011,"0.0105"],"order_type":"limit","confidence":0.8}"#,
        )
        .unwrap();
        let intent = response.into_intent().unwrap();
        assert_eq!(intent.coin_symbol, "PEPE");
        assert_eq!(intent.quantity_multiplier, Some(1000));
        assert_eq!(intent.position_type, PositionType::Short);
        assert_eq!(intent.entry_prices, vec![dec!(0.0121), dec!(0.0125)]);
        assert_eq!(intent.stop_loss, Some(StopLoss::BreakEven));
        assert_eq!(intent.take_profits, vec![dec!(0.011), dec!(0.0105)]);
        assert_eq!(intent.order_type, OrderType::Limit);
    }

    #[test]
    fn test_into_intent_enforces_contract() {
        let missing_side: AiTradeResponse =
            decode(r#"{"coin_symbol":"BTC","entry_prices":[100]}"#).unwrap();
        assert_eq!(
            missing_side.into_intent().unwrap_err(),
            ParseError::missing("position_type")
        );

        let bad_enum: AiTradeResponse =
            decode(r#"{"coin_symbol":"BTC","position_type":"SIDEWAYS","entry_prices":[100]}"#).unwrap();
        assert!(matches!(
            bad_enum.into_intent().unwrap_err(),
            ParseError::Invalid(ValidationError::InvalidEnum { .. })
        ));

        let no_entries: AiTradeResponse =
            decode(r#"{"coin_symbol":"BTC","position_type":"LONG","entry_prices":[]}"#).unwrap();
        assert_eq!(no_entries.into_intent().unwrap_err(), ParseError::missing("entry_prices"));
    }

    #[test]
    fn test_into_action() {
        let response: AiUpdateResponse = decode(
            r#"{"action_type":"UPDATE_SL","value":"2450.5","coin_symbol":"eth","reason":"sl moved"}"#,
        )
        .unwrap();
        let action = response.into_action("sl moved to 2450.5").unwrap();
        assert_eq!(action.action_type, ActionType::UpdateSl);
        assert_eq!(action.value, Some(ActionValue::Price(dec!(2450.5))));
        assert_eq!(action.coin_symbol.as_deref(), Some("ETH"));

        let bad: AiUpdateResponse = decode(r#"{"action_type":"MOON"}"#).unwrap();
        assert!(bad.into_action("moon").is_err());
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("$btc"), (None, "BTC".to_string()));
        assert_eq!(normalize_symbol("ETH/USDT"), (None, "ETH".to_string()));
        assert_eq!(normalize_symbol("1000TOSHI"), (Some(1000), "TOSHI".to_string()));
        assert_eq!(normalize_symbol("USDT"), (None, "USDT".to_string()));
    }
}
