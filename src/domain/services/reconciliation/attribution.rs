//! Attributing venue executions to ledger rows that carry no venue identity.
//!
//! Rows without an exchange or client order ID can only be matched by
//! symbol, side and time. An execution is attributed to a row only when no
//! other row could plausibly own it; otherwise the row is flagged and left
//! untouched.

use crate::domain::entities::trade::Trade;
use crate::domain::entities::venue::{weighted_average_price, Execution};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;

const QUOTE_SUFFIXES: &[&str] = &["PERP", "USDT", "USDC", "USD"];

/// Normalizes venue tickers such as `BTC-USD-PERP` or `1000PEPEUSDT` to
/// the bare base symbol used in the ledger.
pub fn base_symbol(symbol: &str) -> String {
    let mut base: String = symbol
        .to_uppercase()
        .chars()
        .filter(|c| !matches!(c, '-' | '/' | '_' | ' '))
        .collect();

    loop {
        let stripped = QUOTE_SUFFIXES
            .iter()
            .find(|suffix| base.len() > suffix.len() && base.ends_with(*suffix))
            .map(|suffix| base.len() - suffix.len());
        match stripped {
            Some(len) => base.truncate(len),
            None => break,
        }
    }
    base
}

pub fn symbols_match(ledger_symbol: &str, venue_symbol: &str) -> bool {
    base_symbol(ledger_symbol) == base_symbol(venue_symbol)
}

/// Time range in which fills may belong to a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AttributionWindow {
    /// `[created_at - buffer, updated_at + buffer]`
    pub fn for_trade(trade: &Trade, buffer: Duration) -> Self {
        let last_touch = trade.updated_at.max(trade.created_at);
        Self {
            start: trade.created_at - buffer,
            end: last_touch + buffer,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    /// Smallest window covering both
    pub fn union(&self, other: &AttributionWindow) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attribution {
    Attributed {
        executions: Vec<Execution>,
        average_price: Decimal,
        total_size: Decimal,
    },
    /// Other rows could own the same fills
    Ambiguous { competing: Vec<String> },
    Unattributed,
}

impl Attribution {
    fn from_candidates(candidates: Vec<Execution>) -> Self {
        match weighted_average_price(candidates.iter()) {
            Some((average_price, total_size)) => Attribution::Attributed {
                executions: candidates,
                average_price,
                total_size,
            },
            None => Attribution::Unattributed,
        }
    }
}

/// Opening fills for `trade`: same symbol and side, inside the trade's
/// window, not already owned by an order some other row is matched to.
pub fn attribute_entry(
    trade: &Trade,
    executions: &[Execution],
    claimed_order_ids: &HashSet<String>,
    peers: &[&Trade],
    buffer: Duration,
) -> Attribution {
    let window = AttributionWindow::for_trade(trade, buffer);
    let candidates: Vec<Execution> = executions
        .iter()
        .filter(|e| e.side == trade.position_type)
        .filter(|e| symbols_match(&trade.coin_symbol, &e.symbol))
        .filter(|e| window.contains(e.executed_at))
        .filter(|e| {
            e.order_id
                .as_ref()
                .map_or(true, |id| !claimed_order_ids.contains(id))
        })
        .cloned()
        .collect();

    if candidates.is_empty() {
        return Attribution::Unattributed;
    }

    let competing: Vec<String> = peers
        .iter()
        .filter(|p| p.id != trade.id && !p.status.is_terminal() && !p.has_venue_identity())
        .filter(|p| p.position_type == trade.position_type)
        .filter(|p| symbols_match(&trade.coin_symbol, &p.coin_symbol))
        .filter(|p| {
            let peer_window = AttributionWindow::for_trade(p, buffer);
            candidates.iter().any(|e| peer_window.contains(e.executed_at))
        })
        .map(|p| p.id.clone())
        .collect();

    if competing.is_empty() {
        Attribution::from_candidates(candidates)
    } else {
        Attribution::Ambiguous { competing }
    }
}

/// Closing fills for a row whose position is gone: opposite side, same
/// symbol, between the row's creation and `now`. Ambiguous as soon as
/// another live row holds the same symbol and side.
pub fn attribute_exit(
    trade: &Trade,
    executions: &[Execution],
    peers: &[&Trade],
    now: DateTime<Utc>,
) -> Attribution {
    let closing_side = trade.position_type.opposite();
    let candidates: Vec<Execution> = executions
        .iter()
        .filter(|e| e.side == closing_side)
        .filter(|e| symbols_match(&trade.coin_symbol, &e.symbol))
        .filter(|e| e.executed_at >= trade.created_at && e.executed_at <= now)
        .cloned()
        .collect();

    if candidates.is_empty() {
        return Attribution::Unattributed;
    }

    let competing: Vec<String> = peers
        .iter()
        .filter(|p| p.id != trade.id && p.status.holds_position())
        .filter(|p| p.position_type == trade.position_type)
        .filter(|p| symbols_match(&trade.coin_symbol, &p.coin_symbol))
        .map(|p| p.id.clone())
        .collect();

    if competing.is_empty() {
        Attribution::from_candidates(candidates)
    } else {
        Attribution::Ambiguous { competing }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::intent::PositionType;
    use crate::domain::entities::trade::TradeStatus;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    fn trade(id: &str, side: PositionType, created: DateTime<Utc>) -> Trade {
        let mut trade = Trade::pending(id, "SOL", side, dec!(10));
        trade.created_at = created;
        trade.updated_at = created;
        trade
    }

    fn fill(id: &str, side: PositionType, price: Decimal, size: Decimal, when: DateTime<Utc>) -> Execution {
        Execution {
            execution_id: id.to_string(),
            order_id: None,
            symbol: "SOL-USD".to_string(),
            side,
            price,
            size,
            executed_at: when,
        }
    }

    #[test]
    fn test_base_symbol_strips_quotes_and_separators() {
        assert_eq!(base_symbol("BTC-USD-PERP"), "BTC");
        assert_eq!(base_symbol("1000pepeusdt"), "1000PEPE");
        assert_eq!(base_symbol("ETH/USDC"), "ETH");
        assert_eq!(base_symbol("USDT"), "USDT");
        assert!(symbols_match("SOL", "SOL-USD"));
        assert!(!symbols_match("SOL", "SOLX-USD"));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let t = trade("t-1", PositionType::Long, at(12, 0));
        let window = AttributionWindow::for_trade(&t, Duration::minutes(30));
        assert!(window.contains(at(11, 30)));
        assert!(window.contains(at(12, 30)));
        assert!(!window.contains(at(12, 31)));
    }

    #[test]
    fn test_entry_attribution_averages_fills() {
        let t = trade("t-1", PositionType::Long, at(12, 0));
        let fills = vec![
            fill("e-1", PositionType::Long, dec!(100), dec!(4), at(12, 1)),
            fill("e-2", PositionType::Long, dec!(110), dec!(6), at(12, 2)),
            fill("e-3", PositionType::Short, dec!(120), dec!(6), at(12, 3)),
        ];

        let result = attribute_entry(&t, &fills, &HashSet::new(), &[&t], Duration::minutes(30));
        match result {
            Attribution::Attributed {
                executions,
                average_price,
                total_size,
            } => {
                assert_eq!(executions.len(), 2);
                assert_eq!(average_price, dec!(106));
                assert_eq!(total_size, dec!(10));
            }
            other => panic!("expected attribution, got {:?}", other),
        }
    }

    #[test]
    fn test_entry_attribution_ambiguous_with_overlapping_peer() {
        let a = trade("t-a", PositionType::Long, at(12, 0));
        let b = trade("t-b", PositionType::Long, at(12, 10));
        let fills = vec![fill("e-1", PositionType::Long, dec!(100), dec!(10), at(12, 5))];

        let result = attribute_entry(&a, &fills, &HashSet::new(), &[&a, &b], Duration::minutes(30));
        assert_eq!(
            result,
            Attribution::Ambiguous {
                competing: vec!["t-b".to_string()]
            }
        );
    }

    #[test]
    fn test_entry_attribution_skips_claimed_orders() {
        let t = trade("t-1", PositionType::Long, at(12, 0));
        let mut claimed_fill = fill("e-1", PositionType::Long, dec!(100), dec!(10), at(12, 5));
        claimed_fill.order_id = Some("o-9".to_string());
        let claimed: HashSet<String> = ["o-9".to_string()].into_iter().collect();

        let result = attribute_entry(&t, &[claimed_fill], &claimed, &[], Duration::minutes(30));
        assert_eq!(result, Attribution::Unattributed);
    }

    #[test]
    fn test_exit_attribution_uses_opposite_side() {
        let t = trade("t-1", PositionType::Short, at(12, 0)).with_status(TradeStatus::Open);
        let fills = vec![
            fill("e-1", PositionType::Short, dec!(100), dec!(10), at(12, 1)),
            fill("e-2", PositionType::Long, dec!(90), dec!(10), at(13, 0)),
        ];

        match attribute_exit(&t, &fills, &[&t], at(14, 0)) {
            Attribution::Attributed { average_price, .. } => assert_eq!(average_price, dec!(90)),
            other => panic!("expected attribution, got {:?}", other),
        }
    }

    #[test]
    fn test_exit_attribution_ambiguous_with_live_peer() {
        let t = trade("t-1", PositionType::Long, at(12, 0)).with_status(TradeStatus::Open);
        let peer = trade("t-2", PositionType::Long, at(12, 30)).with_status(TradeStatus::Open);
        let fills = vec![fill("e-1", PositionType::Short, dec!(90), dec!(10), at(13, 0))];

        assert!(matches!(
            attribute_exit(&t, &fills, &[&t, &peer], at(14, 0)),
            Attribution::Ambiguous { .. }
        ));
    }
}
