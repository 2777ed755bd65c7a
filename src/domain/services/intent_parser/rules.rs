//! Deterministic keyword/regex table for new-trade signals.
//!
//! Works on sanitized ASCII text, so byte offsets in the lowercase copy line
//! up with the original.

use crate::domain::entities::intent::{OrderType, PositionType, StopLoss, TradeIntent};
use crate::domain::errors::ParseError;
use crate::domain::services::symbol_extractor::{SymbolExtraction, SymbolExtractor};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::ops::Range;
use std::str::FromStr;

fn rx(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern {}: {}", pattern, e))
}

static DIRECTION: Lazy<Regex> = Lazy::new(|| {
    rx(r"\b(short|shorted|shorting|shorts|sell|selling|sold|long|longed|longing|longs|buy|buying|bought)\b")
});
static LIMIT: Lazy<Regex> = Lazy::new(|| rx(r"\blimit\b"));
static SPOT: Lazy<Regex> = Lazy::new(|| rx(r"\bspot\b"));
static STOP_LABEL: Lazy<Regex> = Lazy::new(|| {
    rx(r"\b(?:sl|stop\s*-?\s*loss|stoploss|stop|invalidation)\b\s*[:=@-]?\s*")
});
static TP_LABEL: Lazy<Regex> = Lazy::new(|| {
    rx(r"\b(?:tp[1-9]?|tps|targets?|take\s*-?\s*profits?)\b\s*[:=@-]?")
});
static ENTRY_LABEL: Lazy<Regex> = Lazy::new(|| {
    rx(r"\b(?:entry|entries|enter|ep|buy\s+zone|sell\s+zone)\b(?:\s*(?:zone|price|range))?\s*[:=@-]?")
});
static BREAK_EVEN: Lazy<Regex> = Lazy::new(|| rx(r"^(?:be|b/e|break\s*-?\s*even)\b"));
static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| rx(r"^\d+(?:\.\d+)?"));
static ANY_NUMBER: Lazy<Regex> = Lazy::new(|| rx(r"\d+(?:\.\d+)?"));
static LEAD: Lazy<Regex> = Lazy::new(|| rx(r"^\s*"));
static LIST_SEP: Lazy<Regex> = Lazy::new(|| rx(r"^\s*(?:[,/&~-]|and\b|to\b)?\s*"));
static RANGE_SEP: Lazy<Regex> = Lazy::new(|| rx(r"^\s*(?:[-/~]|to\b)\s*"));
static LINE_STOP: Lazy<Regex> = Lazy::new(|| rx(r"\b(?:tp[1-9]?|tps|targets?|take\s*-?\s*profits?|entry|entries)\b"));
static LEVERAGE: Lazy<Regex> = Lazy::new(|| {
    rx(r"\b\d+(?:\.\d+)?\s*x\b|\bx\s*\d+\b|\b(?:leverage|lev)\b\s*[:=-]?\s*(?:cross|isolated)?\s*\d+(?:\.\d+)?\s*x?|\b(?:cross|isolated)\s*\d+\s*x?")
});
static PERCENTAGE: Lazy<Regex> = Lazy::new(|| rx(r"\d+(?:\.\d+)?\s*%"));
static TIMEFRAME: Lazy<Regex> =
    Lazy::new(|| rx(r"\b\d+ ?(?:m|h|d|w|min|mins|hr|hrs|hour|hours|day|days|week|weeks)\b"));
static RISK: Lazy<Regex> = Lazy::new(|| {
    rx(r"\brisk(?:\s*level)?\b\s*[:=-]?\s*(very\s+high|low|medium|mid|high|extreme|\d+(?:\.\d+)?\s*%?)|\b(very\s+high|low|medium|mid|high|extreme)\s+risk\b")
});

/// Explicit direction word, first occurrence wins
pub fn explicit_direction(lower: &str) -> Option<PositionType> {
    let word = DIRECTION.captures(lower)?.get(1)?.as_str();
    if word.starts_with("short") || word.starts_with("sell") || word == "sold" {
        Some(PositionType::Short)
    } else {
        Some(PositionType::Long)
    }
}

/// Order type named in the text, if any
pub fn explicit_order_type(lower: &str) -> Option<OrderType> {
    if SPOT.is_match(lower) {
        Some(OrderType::Spot)
    } else if LIMIT.is_match(lower) {
        Some(OrderType::Limit)
    } else {
        None
    }
}

pub fn order_type_of(lower: &str) -> OrderType {
    explicit_order_type(lower).unwrap_or(OrderType::Market)
}

/// "111,100" -> "111100". Comma lists ("100,200,300") are left alone.
pub fn strip_thousands_separators(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        if c == ',' && is_thousands_comma(bytes, i) {
            continue;
        }
        out.push(c);
    }
    out
}

fn is_thousands_comma(bytes: &[u8], i: usize) -> bool {
    let digit = |j: usize| bytes.get(j).map(|b| b.is_ascii_digit()).unwrap_or(false);

    // 1-3 digits before, starting at a word boundary
    let mut start = i;
    while start > 0 && digit(start - 1) {
        start -= 1;
    }
    let lead = i - start;
    if lead == 0 || lead > 3 {
        return false;
    }
    if start > 0 {
        let prev = bytes[start - 1];
        if prev.is_ascii_alphanumeric() || prev == b',' || prev == b'.' {
            return false;
        }
    }

    // exactly 3 digits after, not followed by another group
    if !(digit(i + 1) && digit(i + 2) && digit(i + 3)) || digit(i + 4) {
        return false;
    }
    !(bytes.get(i + 4) == Some(&b',') && digit(i + 5))
}

/// Reads a run of numbers starting at `start`.
///
/// Returns the values and the byte offset just past the last one.
fn number_list(lower: &str, start: usize, range_only: bool) -> (Vec<Decimal>, usize) {
    let mut values = Vec::new();
    let mut pos = start;
    loop {
        let rest = &lower[pos..];
        let separator = if values.is_empty() {
            LEAD.find(rest)
        } else if range_only {
            RANGE_SEP.find(rest)
        } else {
            LIST_SEP.find(rest)
        };
        let Some(separator) = separator else {
            break;
        };
        let Some(number) = LEADING_NUMBER.find(&rest[separator.end()..]) else {
            break;
        };
        let end = pos + separator.end() + number.end();
        if lower[end..].starts_with(|c: char| c.is_ascii_alphabetic() || c == '%') {
            break;
        }
        match Decimal::from_str(number.as_str()) {
            Ok(value) => values.push(value),
            Err(_) => break,
        }
        pos = end;
    }
    (values, pos)
}

#[derive(Debug, Clone, Default)]
pub struct RuleBasedParser {
    extractor: SymbolExtractor,
}

impl RuleBasedParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the extractor's cleaned text into an intent.
    ///
    /// Fails with `MissingRequiredField` when no symbol or entry is found
    /// and `AmbiguousSymbol` when several tickers compete.
    pub fn parse_new_trade(&self, extraction: &SymbolExtraction) -> Result<TradeIntent, ParseError> {
        let text = strip_thousands_separators(&extraction.cleaned_text.replace('|', " "));
        let lower = text.to_ascii_lowercase();

        let coin_symbol = match &extraction.symbol {
            Some(symbol) => symbol.clone(),
            None => {
                let candidates = self.extractor.candidates(&text);
                match candidates.len() {
                    0 => return Err(ParseError::missing("coin_symbol")),
                    1 => candidates[0].clone(),
                    _ => return Err(ParseError::AmbiguousSymbol { candidates }),
                }
            }
        };

        let mut masked: Vec<Range<usize>> = Vec::new();

        let stop_loss = self.stop_loss(&text, &lower, &mut masked);
        let take_profits = self.take_profits(&lower, &mut masked);
        let risk_level = self.risk_level(&lower, &mut masked);
        for pattern in [&*LEVERAGE, &*PERCENTAGE, &*TIMEFRAME] {
            masked.extend(pattern.find_iter(&lower).map(|m| m.range()));
        }

        let entry_prices = self.entry_prices(&lower, &mut masked);
        if entry_prices.is_empty() {
            return Err(ParseError::missing("entry_prices"));
        }

        let position_type = explicit_direction(&lower).unwrap_or(PositionType::Long);
        let mut intent = TradeIntent::new(coin_symbol, position_type, entry_prices, order_type_of(&lower));
        intent.stop_loss = stop_loss;
        intent.take_profits = take_profits;
        intent.risk_level = risk_level;
        intent.quantity_multiplier = extraction.quantity;
        Ok(intent)
    }

    fn stop_loss(&self, text: &str, lower: &str, masked: &mut Vec<Range<usize>>) -> Option<StopLoss> {
        let label = STOP_LABEL.find(lower)?;
        let rest = &lower[label.end()..];

        if let Some(be) = BREAK_EVEN.find(rest) {
            masked.push(label.start()..label.end() + be.end());
            return Some(StopLoss::BreakEven);
        }

        if let Some(number) = LEADING_NUMBER.find(rest) {
            let end = label.end() + number.end();
            let is_percentage = lower[end..].trim_start().starts_with('%');
            let glued = lower[end..].starts_with(|c: char| c.is_ascii_alphabetic());
            if !is_percentage && !glued {
                masked.push(label.start()..end);
                return Decimal::from_str(number.as_str()).ok().map(StopLoss::Price);
            }
        }

        // Conditional stop: rest of the line up to the next section keyword
        let line_end = rest.find('\n').unwrap_or(rest.len());
        let line = &rest[..line_end];
        let cut = LINE_STOP.find(line).map(|m| m.start()).unwrap_or(line.len());
        let start = label.end();
        let condition = text[start..start + cut].trim();
        if condition.chars().any(|c| c.is_ascii_digit()) {
            masked.push(label.start()..start + cut);
            Some(StopLoss::Conditional(condition.to_string()))
        } else {
            None
        }
    }

    fn take_profits(&self, lower: &str, masked: &mut Vec<Range<usize>>) -> Vec<Decimal> {
        let mut targets = Vec::new();
        for label in TP_LABEL.find_iter(lower) {
            let (values, end) = number_list(lower, label.end(), false);
            masked.push(label.start()..end.max(label.end()));
            targets.extend(values);
        }
        targets
    }

    fn risk_level(&self, lower: &str, masked: &mut Vec<Range<usize>>) -> Option<String> {
        let caps = RISK.captures(lower)?;
        let whole = caps.get(0)?;
        masked.push(whole.range());
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
    }

    fn entry_prices(&self, lower: &str, masked: &mut Vec<Range<usize>>) -> Vec<Decimal> {
        for label in ENTRY_LABEL.find_iter(lower) {
            if overlaps(masked, label.start()) {
                continue;
            }
            let (values, end) = number_list(lower, label.end(), false);
            if !values.is_empty() {
                masked.push(label.start()..end);
                return values;
            }
        }

        // Unlabeled: first free-standing number, optionally a range
        let bytes = lower.as_bytes();
        for number in ANY_NUMBER.find_iter(lower) {
            if overlaps(masked, number.start()) {
                continue;
            }
            let glued_before = number.start() > 0 && {
                let prev = bytes[number.start() - 1];
                prev.is_ascii_alphanumeric() || prev == b'.'
            };
            let glued_after = lower[number.end()..].starts_with(|c: char| c.is_ascii_alphabetic());
            if glued_before || glued_after {
                continue;
            }
            let (values, _) = number_list(lower, number.start(), true);
            if !values.is_empty() {
                return values;
            }
        }
        Vec::new()
    }
}

fn overlaps(masked: &[Range<usize>], position: usize) -> bool {
    masked.iter().any(|r| r.contains(&position))
}
