//! Follow-up alert classification.
//!
//! Rules run most-specific first and the first match wins. The mapper keeps
//! no state between calls.

use crate::domain::entities::action::{
    ActionType, ActionValue, ExchangeAction, PositionAction, PositionStatus,
};
use crate::domain::entities::intent::ActiveTrade;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;

fn rx(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern {}: {}", pattern, e))
}

const BE: &str = r"(?:be|b/e|break\s*-?\s*even|entry)";
const STOP: &str = r"(?:sl|stops?|stop\s*-?\s*loss(?:es)?|stoploss(?:es)?)";

static TP1_CUE: Lazy<Regex> =
    Lazy::new(|| rx(r"\b(?:tp\s*1|target\s*1|first\s+(?:tp|target))\b"));
static STOP_TO_BE: Lazy<Regex> = Lazy::new(|| {
    rx(&format!(
        r"\b(?:{stop}\b[^.\n]*?\b{be}\b|(?:move|moved|moving|set|put|shift)\w*\b[^.\n]*?\b{be}\b)",
        stop = STOP,
        be = BE
    ))
});
static STOPPED_BE: Lazy<Regex> = Lazy::new(|| {
    rx(&format!(
        r"\b(?:stopped(?:\s+out)?|sl\s+hit|stop\s+hit)\s*(?:at|@|in|on)?\s*{}\b",
        BE
    ))
});
static CLOSED_BE: Lazy<Regex> = Lazy::new(|| {
    rx(&format!(r"\bclosed?\s*(?:at|@|in|on)?\s*{}\b", BE))
});
static TAKE_PROFIT: Lazy<Regex> =
    Lazy::new(|| rx(r"\b(?:tp|target|take\s*profit)\s*([1-9])\b"));
// Text before a TP token that makes the token a stop destination ("SL to TP1")
static STOP_DESTINATION: Lazy<Regex> = Lazy::new(|| {
    rx(&format!(r"\b{}\b[^.\n]*?(?:\bto|\bat|@)\s*$", STOP))
});
static ALL_TARGETS: Lazy<Regex> =
    Lazy::new(|| rx(r"\ball\s+(?:targets|tps|take\s*profits)\b"));
static STOP_UPDATE: Lazy<Regex> = Lazy::new(|| {
    rx(&format!(
        r"\b(?:(?:move|moved|moving|update|updated|updating|change|changed|adjust|adjusted|raise|raised|lower|lowered|trail|trailing|set|new)\b[^.\n]*?\b{stop}\b|{stop}\b[^.\n]*?\b(?:to|at|now|moved|updated|changed)\b)",
        stop = STOP
    ))
});
static ENTRY_UPDATE: Lazy<Regex> = Lazy::new(|| {
    rx(r"\b(?:(?:update|updated|change|changed|new|adjust|adjusted|move|moved)\b[^.\n]*?\bentry\b|entry\b[^.\n]*?\b(?:updated|changed|moved|now)\b)")
});
static NOT_FILLED: Lazy<Regex> = Lazy::new(|| {
    rx(r"\b(?:not\s+(?:been\s+)?(?:filled|triggered|activated)|didn'?t\s+(?:fill|trigger)|unfilled|never\s+filled)\b")
});
static FILLED: Lazy<Regex> =
    Lazy::new(|| rx(r"\b(?:filled|triggered|activated|entered)\b"));
static CANCELLED: Lazy<Regex> = Lazy::new(|| {
    rx(r"\b(?:cancel|cancelled|canceled|cancelling|remove\s+(?:the\s+)?order|delete\s+(?:the\s+)?order)\b")
});
static STOP_HIT: Lazy<Regex> = Lazy::new(|| {
    rx(r"\b(?:stopped(?:\s+out)?|sl\s+hit|stop\s*-?\s*loss\s+hit|stop\s+hit|hit\s+(?:the\s+)?(?:sl|stop))\b")
});
static CLOSED: Lazy<Regex> = Lazy::new(|| rx(r"\bclosed\b"));
static CLOSE_NOW: Lazy<Regex> =
    Lazy::new(|| rx(r"\b(?:close|exit|get\s+out)\b"));
static TO_NUMBER: Lazy<Regex> =
    Lazy::new(|| rx(r"\b(?:to|at|@)\s*(\d+(?:\.\d+)?)"));
static NUMBER: Lazy<Regex> = Lazy::new(|| rx(r"\d+(?:\.\d+)?"));
static PERCENT: Lazy<Regex> = Lazy::new(|| rx(r"(\d+(?:\.\d+)?)\s*%"));

#[derive(Debug, Clone)]
pub struct UpdateActionMapper {
    later_tp_close_percentage: Decimal,
}

impl Default for UpdateActionMapper {
    fn default() -> Self {
        Self::new(dec!(25))
    }
}

impl UpdateActionMapper {
    pub fn new(later_tp_close_percentage: Decimal) -> Self {
        Self {
            later_tp_close_percentage,
        }
    }

    /// Classifies sanitized alert text. Never fails: unmatched text yields
    /// an `UNKNOWN` action.
    pub fn classify(&self, text: &str, context: Option<&ActiveTrade>) -> PositionAction {
        let lower = text.to_lowercase();
        let symbol = context.and_then(|c| c.coin_symbol.clone());
        let explicit_pct = explicit_percentage(&lower);

        let (action_type, value, reason) = if TP1_CUE.is_match(&lower) && STOP_TO_BE.is_match(&lower) {
            (
                ActionType::Tp1AndBreakEven,
                Some(ActionValue::BreakEven),
                "TP1 reached and stop moved to breakeven".to_string(),
            )
        } else if STOPPED_BE.is_match(&lower) {
            (
                ActionType::StopLossHit,
                Some(ActionValue::BreakEven),
                "stopped out at breakeven".to_string(),
            )
        } else if CLOSED_BE.is_match(&lower) {
            (
                ActionType::PositionClosed,
                Some(ActionValue::BreakEven),
                "position closed at breakeven".to_string(),
            )
        } else if let Some(level) = take_profit_level(&lower) {
            (
                ActionType::TakeProfit(level),
                None,
                format!("take profit {} reached", level),
            )
        } else if ALL_TARGETS.is_match(&lower) {
            (
                ActionType::PositionClosed,
                None,
                "all targets reached".to_string(),
            )
        } else if STOP_UPDATE.is_match(&lower) && !STOP_HIT.is_match(&lower) {
            if STOP_TO_BE.is_match(&lower) {
                (
                    ActionType::BreakEven,
                    Some(ActionValue::BreakEven),
                    "stop moved to breakeven".to_string(),
                )
            } else if let Some(level) = stop_destination_level(&lower) {
                (
                    ActionType::UpdateSl,
                    Some(ActionValue::Text(format!("TP{}", level))),
                    format!("stop loss moved to take profit {}", level),
                )
            } else if let Some(price) = target_number(&lower) {
                (
                    ActionType::UpdateSl,
                    Some(ActionValue::Price(price)),
                    format!("stop loss moved to {}", price),
                )
            } else {
                (
                    ActionType::UpdateSl,
                    Some(ActionValue::BreakEven),
                    "stop loss updated without a level, assuming breakeven".to_string(),
                )
            }
        } else if ENTRY_UPDATE.is_match(&lower) {
            let value = target_number(&lower).map(ActionValue::Price);
            (ActionType::UpdateEntry, value, "entry updated".to_string())
        } else if NOT_FILLED.is_match(&lower) {
            (
                ActionType::LimitOrderNotFilled,
                None,
                "limit order was not filled".to_string(),
            )
        } else if CANCELLED.is_match(&lower) {
            (
                ActionType::OrderCancelled,
                None,
                "order cancelled".to_string(),
            )
        } else if FILLED.is_match(&lower) {
            (ActionType::OrderFilled, None, "order filled".to_string())
        } else if STOP_HIT.is_match(&lower) {
            (ActionType::StopLossHit, None, "stop loss hit".to_string())
        } else if CLOSED.is_match(&lower) {
            (
                ActionType::PositionClosed,
                None,
                "position closed".to_string(),
            )
        } else if CLOSE_NOW.is_match(&lower) {
            (
                ActionType::ClosePosition,
                None,
                "close requested".to_string(),
            )
        } else {
            return PositionAction::unknown(text, symbol);
        };

        let close_percentage = match action_type {
            ActionType::TakeProfit(_) => explicit_pct,
            _ => None,
        };
        self.build(action_type, value, close_percentage, symbol, reason, text)
    }

    /// Assembles a complete action, defaulting the close percentage and
    /// deriving the exchange action and resulting position status.
    pub fn build(
        &self,
        action_type: ActionType,
        value: Option<ActionValue>,
        close_percentage: Option<Decimal>,
        coin_symbol: Option<String>,
        reason: impl Into<String>,
        source_text: &str,
    ) -> PositionAction {
        if action_type == ActionType::Unknown {
            return PositionAction::unknown(source_text, coin_symbol);
        }

        let close_percentage = if action_type.is_full_close() {
            Some(dec!(100))
        } else {
            close_percentage
                .or_else(|| action_type.default_close_percentage(self.later_tp_close_percentage))
        };
        let (exchange_action, position_status) =
            consequences(action_type, close_percentage);

        PositionAction {
            action_type,
            value,
            close_percentage,
            coin_symbol,
            reason: reason.into(),
            source_text: source_text.to_string(),
            exchange_action,
            position_status,
        }
    }

    /// Completes an action produced elsewhere (the AI capability).
    ///
    /// `UNKNOWN` answers are re-run through [`classify`](Self::classify) so
    /// obvious alerts are still recognised; everything else is rebuilt so the
    /// derived fields follow the same table as locally classified actions.
    pub fn complete(
        &self,
        action: PositionAction,
        text: &str,
        context: Option<&ActiveTrade>,
    ) -> PositionAction {
        if action.is_unknown() {
            let reclassified = self.classify(text, context);
            if !reclassified.is_unknown() {
                tracing::debug!(
                    "Reclassified UNKNOWN answer as {}",
                    reclassified.action_type
                );
            }
            return reclassified;
        }

        let coin_symbol = action
            .coin_symbol
            .or_else(|| context.and_then(|c| c.coin_symbol.clone()));
        let value = match (action.action_type, action.value) {
            (ActionType::UpdateSl, None) => Some(ActionValue::BreakEven),
            (ActionType::BreakEven | ActionType::Tp1AndBreakEven, None) => {
                Some(ActionValue::BreakEven)
            }
            (_, value) => value,
        };
        let reason = if action.reason.trim().is_empty() {
            action.action_type.code().to_lowercase().replace('_', " ")
        } else {
            action.reason
        };

        self.build(
            action.action_type,
            value,
            action.close_percentage,
            coin_symbol,
            reason,
            text,
        )
    }
}

fn consequences(
    action_type: ActionType,
    close_percentage: Option<Decimal>,
) -> (ExchangeAction, PositionStatus) {
    match action_type {
        ActionType::TakeProfit(_) | ActionType::Tp1AndBreakEven => {
            if close_percentage.map(|p| p >= dec!(100)).unwrap_or(false) {
                (ExchangeAction::MarketSell, PositionStatus::Closed)
            } else {
                (ExchangeAction::PartialSell, PositionStatus::PartiallyClosed)
            }
        }
        ActionType::ClosePosition | ActionType::StopLossHit | ActionType::PositionClosed => {
            (ExchangeAction::MarketSell, PositionStatus::Closed)
        }
        ActionType::UpdateSl | ActionType::BreakEven => {
            (ExchangeAction::UpdateStopOrder, PositionStatus::Open)
        }
        ActionType::UpdateEntry => (ExchangeAction::NoAction, PositionStatus::Pending),
        ActionType::OrderFilled => (ExchangeAction::NoAction, PositionStatus::Open),
        ActionType::OrderCancelled | ActionType::LimitOrderNotFilled => {
            (ExchangeAction::CancelOrder, PositionStatus::Cancelled)
        }
        ActionType::Unknown => (ExchangeAction::NoAction, PositionStatus::Unknown),
    }
}

/// TP levels mentioned in the text, each paired with whether it is the
/// destination of a stop move rather than a target that was reached
fn take_profit_mentions(lower: &str) -> impl Iterator<Item = (u8, bool)> + '_ {
    TAKE_PROFIT.captures_iter(lower).filter_map(move |caps| {
        let token = caps.get(0)?;
        let level = caps.get(1)?.as_str().parse::<u8>().ok()?;
        Some((level, STOP_DESTINATION.is_match(&lower[..token.start()])))
    })
}

fn take_profit_level(lower: &str) -> Option<u8> {
    take_profit_mentions(lower)
        .find(|(_, stop_destination)| !stop_destination)
        .map(|(level, _)| level)
}

fn stop_destination_level(lower: &str) -> Option<u8> {
    take_profit_mentions(lower)
        .find(|(_, stop_destination)| *stop_destination)
        .map(|(level, _)| level)
}

fn target_number(lower: &str) -> Option<Decimal> {
    let explicit = TO_NUMBER
        .captures(lower)
        .and_then(|caps| caps.get(1))
        .and_then(|m| Decimal::from_str(m.as_str()).ok());
    explicit
        .or_else(|| {
            NUMBER
                .find_iter(lower)
                .last()
                .and_then(|m| Decimal::from_str(m.as_str()).ok())
        })
        .filter(|n| *n > Decimal::ZERO)
}

fn explicit_percentage(lower: &str) -> Option<Decimal> {
    PERCENT
        .captures(lower)
        .and_then(|caps| caps.get(1))
        .and_then(|m| Decimal::from_str(m.as_str()).ok())
        .filter(|p| *p > Decimal::ZERO && *p <= dec!(100))
}
