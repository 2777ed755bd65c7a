//! Text sanitation and intent invariants.

use crate::domain::entities::action::{ActionValue, PositionAction};
use crate::domain::entities::intent::{StopLoss, TradeIntent};
use crate::domain::errors::ValidationError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Characters removed outright: zero-width and bidi controls
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FEFF}'
    )
}

/// ASCII stand-ins for typographic characters common in chat messages
fn ascii_replacement(c: char) -> Option<&'static str> {
    let replacement = match c {
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => "'",
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' => "\"",
        '\u{2010}'..='\u{2015}' | '\u{2212}' => "-",
        '\u{2026}' => "...",
        '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}' => " ",
        '\u{FF04}' => "$",
        '\u{FF03}' => "#",
        _ => return None,
    };
    Some(replacement)
}

#[derive(Debug, Clone, Default)]
pub struct SignalValidator;

impl SignalValidator {
    pub fn new() -> Self {
        Self
    }

    /// Reduces chat text to plain ASCII lines.
    ///
    /// Idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
    pub fn sanitize(&self, text: &str) -> String {
        let mut ascii = String::with_capacity(text.len());
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

        for c in normalized.chars() {
            if is_invisible(c) {
                continue;
            }
            if let Some(replacement) = ascii_replacement(c) {
                ascii.push_str(replacement);
            } else if c == '\n' {
                ascii.push('\n');
            } else if c.is_ascii() && !c.is_ascii_control() {
                ascii.push(c);
            } else {
                // emoji, tabs and any other remnant
                ascii.push(' ');
            }
        }

        let mut lines: Vec<String> = Vec::new();
        for line in ascii.split('\n') {
            let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
            let previous_blank = lines.last().map(|l| l.is_empty()).unwrap_or(true);
            if collapsed.is_empty() && previous_blank {
                continue;
            }
            lines.push(collapsed);
        }
        while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
            lines.pop();
        }

        lines.join("\n")
    }

    /// Structural and numeric invariants of a new-trade intent
    pub fn validate(&self, intent: &TradeIntent) -> Result<(), ValidationError> {
        self.validate_symbol(&intent.coin_symbol)?;

        if intent.entry_prices.is_empty() {
            return Err(ValidationError::EmptyRequiredList {
                field: "entry_prices".to_string(),
            });
        }
        for price in &intent.entry_prices {
            ensure_positive("entry_prices", *price)?;
        }
        if let Some(StopLoss::Price(price)) = &intent.stop_loss {
            ensure_positive("stop_loss", *price)?;
        }
        if let Some(StopLoss::Conditional(text)) = &intent.stop_loss {
            if text.trim().is_empty() {
                return Err(ValidationError::MissingField("stop_loss".to_string()));
            }
        }
        for price in &intent.take_profits {
            ensure_positive("take_profits", *price)?;
        }
        if intent.quantity_multiplier == Some(0) {
            return Err(ValidationError::NonPositiveNumber {
                field: "quantity_multiplier".to_string(),
                value: Decimal::ZERO,
            });
        }

        Ok(())
    }

    /// Invariants of a classified follow-up
    pub fn validate_action(&self, action: &PositionAction) -> Result<(), ValidationError> {
        if let Some(symbol) = &action.coin_symbol {
            self.validate_symbol(symbol)?;
        }
        if let Some(ActionValue::Price(price)) = &action.value {
            ensure_positive("value", *price)?;
        }
        if let Some(percentage) = action.close_percentage {
            if percentage < Decimal::ZERO || percentage > dec!(100) {
                return Err(ValidationError::InvalidEnum {
                    field: "close_percentage".to_string(),
                    value: percentage.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn validate_symbol(&self, symbol: &str) -> Result<(), ValidationError> {
        let valid = symbol.len() >= 2
            && symbol.len() <= 20
            && symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            && symbol.chars().any(|c| c.is_ascii_uppercase());
        if valid {
            Ok(())
        } else {
            Err(ValidationError::InvalidSymbol(symbol.to_string()))
        }
    }
}

fn ensure_positive(field: &str, value: Decimal) -> Result<(), ValidationError> {
    if value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::NonPositiveNumber {
            field: field.to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::action::ActionType;
    use crate::domain::entities::intent::{OrderType, PositionType};
    use proptest::prelude::*;

    fn intent(entries: Vec<Decimal>) -> TradeIntent {
        TradeIntent::new("BTC", PositionType::Short, entries, OrderType::Market)
    }

    #[test]
    fn test_sanitize_strips_invisible_and_typography() {
        let validator = SignalValidator::new();
        let raw = "\u{FEFF}BTC\u{200B} \u{201C}long\u{201D}  entry \u{2013} 100\u{2026}\r\n\u{202E}SL 90 ";
        assert_eq!(validator.sanitize(raw), "BTC \"long\" entry - 100...\nSL 90");
    }

    #[test]
    fn test_sanitize_replaces_emoji_and_collapses_lines() {
        let validator = SignalValidator::new();
        let raw = "\u{1F680}\u{1F680} ETH long\n\n\n\n   TP 2000\t2100  \n\n";
        assert_eq!(validator.sanitize(raw), "ETH long\n\nTP 2000 2100");
    }

    #[test]
    fn test_validate_accepts_well_formed_intent() {
        let validator = SignalValidator::new();
        let intent = intent(vec![dec!(111100)]).with_stop_loss(StopLoss::Price(dec!(112392)));
        assert!(validator.validate(&intent).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_entries() {
        let err = SignalValidator::new().validate(&intent(vec![])).unwrap_err();
        assert_eq!(
            err,
            ValidationError::EmptyRequiredList {
                field: "entry_prices".to_string()
            }
        );
    }

    #[test]
    fn test_validate_rejects_non_positive_prices() {
        let validator = SignalValidator::new();
        let err = validator.validate(&intent(vec![dec!(10), dec!(0)])).unwrap_err();
        assert!(matches!(err, ValidationError::NonPositiveNumber { ref field, .. } if field == "entry_prices"));

        let with_bad_stop = intent(vec![dec!(10)]).with_stop_loss(StopLoss::Price(dec!(-1)));
        let err = validator.validate(&with_bad_stop).unwrap_err();
        assert!(matches!(err, ValidationError::NonPositiveNumber { ref field, .. } if field == "stop_loss"));
    }

    #[test]
    fn test_validate_symbol_rules() {
        let validator = SignalValidator::new();
        assert!(validator.validate_symbol("BTC").is_ok());
        assert!(validator.validate_symbol("1000PEPE").is_ok());
        assert!(validator.validate_symbol("B").is_err());
        assert!(validator.validate_symbol("btc").is_err());
        assert!(validator.validate_symbol("1000").is_err());
    }

    #[test]
    fn test_validate_action_close_percentage() {
        let validator = SignalValidator::new();
        let mut action = PositionAction::unknown("tp1", Some("ETH".to_string()));
        action.action_type = ActionType::TakeProfit(1);
        action.close_percentage = Some(dec!(50));
        assert!(validator.validate_action(&action).is_ok());

        action.close_percentage = Some(dec!(0));
        assert!(validator.validate_action(&action).is_ok());
        action.close_percentage = Some(dec!(100));
        assert!(validator.validate_action(&action).is_ok());

        action.close_percentage = Some(dec!(150));
        assert!(validator.validate_action(&action).is_err());
        action.close_percentage = Some(dec!(-1));
        assert!(validator.validate_action(&action).is_err());
    }

    proptest! {
        #[test]
        fn prop_sanitize_is_idempotent(text in "\\PC{0,80}|[ \\t\\r\\n\u{200B}\u{2019}\u{00A0}a-zA-Z0-9|.:-]{0,80}") {
            let validator = SignalValidator::new();
            let once = validator.sanitize(&text);
            prop_assert_eq!(validator.sanitize(&once), once.clone());
            prop_assert!(once.is_ascii());
        }
    }
}
