//! Reconciliation engine
//!
//! Pure comparison of ledger rows against a [`VenueSnapshot`]. Each row is
//! matched to venue records by exchange order ID, then client order ID,
//! then symbol and side (positions), and finally by time window for rows
//! that never received a venue identity. Every mutation it proposes is a
//! [`TradeCorrection`] guarded by the row state it was computed from, so a
//! second pass over the corrected ledger proposes nothing.

use super::attribution::{
    attribute_entry, attribute_exit, base_symbol, symbols_match, Attribution, AttributionWindow,
};
use super::report::{CorrectiveAction, ReconciliationReport, RowClassification, RowOutcome};
use crate::config::ReconciliationConfig;
use crate::domain::entities::intent::PositionType;
use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::domain::entities::venue::{
    weighted_average_price, Execution, VenueOrder, VenueOrderStatus, VenuePosition, VenueSnapshot,
};
use crate::domain::errors::ReconciliationConflict;
use crate::domain::repositories::ledger_store::TradeCorrection;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Executions the actor should fetch before a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionQuery {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

struct Verdict {
    classification: RowClassification,
    explanation: String,
    venue_reference: Option<String>,
    correction: Option<TradeCorrection>,
}

impl Verdict {
    fn consistent(explanation: impl Into<String>) -> Self {
        Self {
            classification: RowClassification::Consistent,
            explanation: explanation.into(),
            venue_reference: None,
            correction: None,
        }
    }

    fn with(classification: RowClassification, correction: TradeCorrection) -> Self {
        Self {
            classification,
            explanation: correction.reason.clone(),
            venue_reference: None,
            correction: Some(correction),
        }
    }

    fn reference(mut self, reference: Option<&str>) -> Self {
        self.venue_reference = reference.map(str::to_string);
        self
    }
}

/// Lookup tables over one snapshot
struct VenueIndex<'a> {
    by_order_id: HashMap<&'a str, &'a VenueOrder>,
    by_client_id: HashMap<&'a str, &'a VenueOrder>,
    positions: &'a [VenuePosition],
    executions: &'a [Execution],
}

impl<'a> VenueIndex<'a> {
    fn new(snapshot: &'a VenueSnapshot) -> Self {
        let by_order_id = snapshot
            .orders
            .iter()
            .map(|o| (o.order_id.as_str(), o))
            .collect();
        let by_client_id = snapshot
            .orders
            .iter()
            .filter_map(|o| o.client_order_id.as_deref().map(|id| (id, o)))
            .collect();
        Self {
            by_order_id,
            by_client_id,
            positions: &snapshot.positions,
            executions: &snapshot.executions,
        }
    }

    fn order_for(&self, trade: &Trade) -> Option<&'a VenueOrder> {
        trade
            .exchange_order_id
            .as_deref()
            .and_then(|id| self.by_order_id.get(id).copied())
            .or_else(|| {
                trade
                    .client_order_id
                    .as_deref()
                    .and_then(|id| self.by_client_id.get(id).copied())
            })
    }

    fn position_for(&self, trade: &Trade) -> Option<&'a VenuePosition> {
        self.positions.iter().find(|p| {
            p.side == trade.position_type
                && p.size > Decimal::ZERO
                && symbols_match(&trade.coin_symbol, &p.symbol)
        })
    }

    fn fills_for_order(&self, order_id: &str) -> Vec<&'a Execution> {
        self.executions
            .iter()
            .filter(|e| e.order_id.as_deref() == Some(order_id))
            .collect()
    }
}

pub struct ReconciliationEngine {
    buffer: Duration,
    size_tolerance_pct: Decimal,
    cancel_orphans: bool,
}

impl ReconciliationEngine {
    pub fn new(config: &ReconciliationConfig) -> Self {
        Self {
            buffer: config.timestamp_buffer(),
            size_tolerance_pct: config.size_tolerance_pct,
            cancel_orphans: config.cancel_orphans,
        }
    }

    /// One execution query per symbol, covering every active row's window
    /// up to `now`
    pub fn execution_queries(&self, ledger: &[Trade], now: DateTime<Utc>) -> Vec<ExecutionQuery> {
        let mut windows: BTreeMap<String, AttributionWindow> = BTreeMap::new();
        for trade in ledger.iter().filter(|t| !t.status.is_terminal()) {
            let window = AttributionWindow::for_trade(trade, self.buffer);
            windows
                .entry(base_symbol(&trade.coin_symbol))
                .and_modify(|w| *w = w.union(&window))
                .or_insert(window);
        }

        windows
            .into_iter()
            .map(|(symbol, window)| ExecutionQuery {
                symbol,
                start: window.start,
                end: window.end.max(now),
            })
            .collect()
    }

    pub fn corrective_actions(
        &self,
        snapshot: &VenueSnapshot,
        ledger: &[Trade],
    ) -> Vec<CorrectiveAction> {
        self.reconcile(snapshot, ledger).actions
    }

    pub fn reconcile(&self, snapshot: &VenueSnapshot, ledger: &[Trade]) -> ReconciliationReport {
        let now = snapshot.taken_at.unwrap_or_else(Utc::now);
        let mut report = ReconciliationReport::new(snapshot.venue.clone(), now);
        let index = VenueIndex::new(snapshot);

        let mut rows: Vec<&Trade> = ledger.iter().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let matched: HashMap<&str, &VenueOrder> = rows
            .iter()
            .filter_map(|t| index.order_for(t).map(|o| (t.id.as_str(), o)))
            .collect();

        // Orders already owned by some row, directly or through its known ID
        let claimed_order_ids: HashSet<String> = matched
            .values()
            .map(|o| o.order_id.clone())
            .chain(rows.iter().filter_map(|t| t.exchange_order_id.clone()))
            .collect();

        for trade in &rows {
            let order = matched.get(trade.id.as_str()).copied();
            let verdict = match trade.status {
                TradeStatus::Pending => {
                    self.check_pending(trade, order, &index, &claimed_order_ids, &rows, now)
                }
                TradeStatus::Open | TradeStatus::PartiallyClosed => {
                    self.check_holding(trade, order, &index, &rows, now)
                }
                TradeStatus::Closed | TradeStatus::Failed | TradeStatus::Cancelled => {
                    self.check_terminal(trade, order)
                }
            };
            self.record(&mut report, trade, verdict);
        }

        self.record_venue_orphans(&mut report, snapshot, &claimed_order_ids, &rows);

        debug!("Reconciliation pass computed: {}", report.summary());
        report
    }

    fn record(&self, report: &mut ReconciliationReport, trade: &Trade, verdict: Verdict) {
        report.add_outcome(RowOutcome {
            trade_id: Some(trade.id.clone()),
            venue_reference: verdict.venue_reference,
            symbol: trade.coin_symbol.clone(),
            classification: verdict.classification,
            explanation: verdict.explanation,
        });

        if let Some(correction) = verdict.correction {
            if correction.is_noop_for(trade) {
                debug!("Trade {} already carries correction: {}", trade.id, correction.reason);
            } else {
                report.add_action(CorrectiveAction::UpdateTrade(correction));
            }
        }
    }

    fn check_pending(
        &self,
        trade: &Trade,
        order: Option<&VenueOrder>,
        index: &VenueIndex<'_>,
        claimed_order_ids: &HashSet<String>,
        rows: &[&Trade],
        now: DateTime<Utc>,
    ) -> Verdict {
        if let Some(order) = order {
            return self.pending_with_order(trade, order, index);
        }

        if let Some(order_id) = trade.exchange_order_id.as_deref() {
            let fills = index.fills_for_order(order_id);
            if let Some((price, size)) = weighted_average_price(fills.iter().copied()) {
                let correction = TradeCorrection::for_trade(
                    trade,
                    format!("{} executions reported for order {}", fills.len(), order_id),
                )
                .status(TradeStatus::Open)
                .fill(price, size);
                return Verdict::with(RowClassification::Drifted, correction)
                    .reference(Some(order_id));
            }
        }

        if !trade.has_venue_identity() {
            match attribute_entry(trade, index.executions, claimed_order_ids, rows, self.buffer) {
                Attribution::Attributed {
                    executions,
                    average_price,
                    total_size,
                } => {
                    let correction = TradeCorrection::for_trade(
                        trade,
                        format!("{} executions attributed by time window", executions.len()),
                    )
                    .status(TradeStatus::Open)
                    .fill(average_price, total_size);
                    return Verdict::with(RowClassification::Drifted, correction);
                }
                Attribution::Ambiguous { competing } => {
                    return self.ambiguous(trade, &competing);
                }
                Attribution::Unattributed => {}
            }
        }

        if now - trade.updated_at > self.buffer {
            let conflict = ReconciliationConflict::OrphanInLedger {
                trade_id: trade.id.clone(),
                detail: "pending order not found on venue".to_string(),
            };
            warn!("Trade {}: {}", trade.id, conflict);
            let correction =
                TradeCorrection::for_trade(trade, conflict.to_string()).flag(conflict.to_string());
            return Verdict::with(RowClassification::OrphanInLedger, correction);
        }

        Verdict::consistent("awaiting venue confirmation")
    }

    fn pending_with_order(
        &self,
        trade: &Trade,
        order: &VenueOrder,
        index: &VenueIndex<'_>,
    ) -> Verdict {
        let learned_id = (trade.exchange_order_id.as_deref() != Some(order.order_id.as_str()))
            .then(|| order.order_id.clone());
        let correction = |reason: String| {
            let base = TradeCorrection::for_trade(trade, reason);
            match &learned_id {
                Some(id) => base.exchange_order_id(id.clone()),
                None => base,
            }
        };

        let fills = index.fills_for_order(&order.order_id);
        let from_fills = weighted_average_price(fills.iter().copied());
        let fill_price = order
            .average_fill_price
            .or_else(|| from_fills.map(|(price, _)| price));
        let filled_size = if order.filled_size > Decimal::ZERO {
            order.filled_size
        } else {
            from_fills.map_or(Decimal::ZERO, |(_, size)| size)
        };
        let reference = Some(order.order_id.as_str());

        let opened = |reason: String| {
            let c = correction(reason).status(TradeStatus::Open);
            match fill_price {
                Some(price) if order.status == VenueOrderStatus::Filled => c.fill(price, filled_size),
                Some(price) => c
                    .fill(price, filled_size)
                    .note(format!("partially filled: {} of {}", filled_size, order.size)),
                None => c.flag(format!("order {} filled without a fill price", order.order_id)),
            }
        };

        let verdict = match order.status {
            VenueOrderStatus::Filled | VenueOrderStatus::PartiallyFilled => Verdict::with(
                RowClassification::Drifted,
                opened(format!("venue order {} is {}", order.order_id, order.status)),
            ),
            VenueOrderStatus::Cancelled | VenueOrderStatus::Expired
                if filled_size > Decimal::ZERO =>
            {
                Verdict::with(
                    RowClassification::Drifted,
                    opened(format!(
                        "venue order {} is {} after partial fill",
                        order.order_id, order.status
                    )),
                )
            }
            VenueOrderStatus::Cancelled | VenueOrderStatus::Expired => Verdict::with(
                RowClassification::Drifted,
                correction(format!("venue order {} is {}", order.order_id, order.status))
                    .status(TradeStatus::Cancelled),
            ),
            VenueOrderStatus::Rejected => Verdict::with(
                RowClassification::Drifted,
                correction(format!("venue order {} was rejected", order.order_id))
                    .status(TradeStatus::Failed),
            ),
            VenueOrderStatus::New if learned_id.is_some() => Verdict::with(
                RowClassification::Drifted,
                correction(format!("venue order {} matched by client order id", order.order_id)),
            ),
            VenueOrderStatus::New => Verdict::consistent("order resting on venue"),
        };
        verdict.reference(reference)
    }

    fn check_holding(
        &self,
        trade: &Trade,
        order: Option<&VenueOrder>,
        index: &VenueIndex<'_>,
        rows: &[&Trade],
        now: DateTime<Utc>,
    ) -> Verdict {
        if let Some(position) = index.position_for(trade) {
            let reference = position.position_id.as_deref().or(Some(position.symbol.as_str()));
            let sharing = rows
                .iter()
                .filter(|t| t.status.holds_position())
                .filter(|t| t.position_type == trade.position_type)
                .filter(|t| symbols_match(&t.coin_symbol, &trade.coin_symbol))
                .count()
                > 1;

            if trade.status == TradeStatus::Open && !sharing {
                if let Some(diff_pct) = self.size_mismatch(trade.position_size, position.size) {
                    let issue = format!(
                        "size mismatch: ledger {} venue {} ({}%)",
                        trade.position_size, position.size, diff_pct
                    );
                    let correction = TradeCorrection::for_trade(trade, issue.clone()).flag(issue);
                    return Verdict::with(RowClassification::Drifted, correction)
                        .reference(reference);
                }
            }
            return Verdict::consistent("position present on venue").reference(reference);
        }

        if let Some(order) = order {
            if order.status.has_fills() {
                return Verdict::consistent(format!("venue order {} shows fills", order.order_id))
                    .reference(Some(order.order_id.as_str()));
            }
            if order.status == VenueOrderStatus::New {
                let issue = format!(
                    "ledger is {} but venue order {} has no fills",
                    trade.status, order.order_id
                );
                let correction = TradeCorrection::for_trade(trade, issue.clone()).flag(issue);
                return Verdict::with(RowClassification::Drifted, correction)
                    .reference(Some(order.order_id.as_str()));
            }
        }

        let conflict = ReconciliationConflict::OrphanInLedger {
            trade_id: trade.id.clone(),
            detail: format!("no {} position for {} on venue", trade.position_type, trade.coin_symbol),
        };
        warn!("Trade {}: {}", trade.id, conflict);
        let mut correction = TradeCorrection::for_trade(trade, conflict.to_string())
            .status(TradeStatus::Closed)
            .flag(conflict.to_string());
        if let Attribution::Attributed { average_price, .. } =
            attribute_exit(trade, index.executions, rows, now)
        {
            correction = correction.exit_price(average_price);
        }
        Verdict::with(RowClassification::OrphanInLedger, correction)
    }

    fn check_terminal(&self, trade: &Trade, order: Option<&VenueOrder>) -> Verdict {
        match order {
            Some(order) if order.status.is_open() => {
                let issue = format!(
                    "ledger is {} but venue order {} is {}",
                    trade.status, order.order_id, order.status
                );
                let correction = TradeCorrection::for_trade(trade, issue.clone()).flag(issue);
                Verdict::with(RowClassification::Drifted, correction)
                    .reference(Some(order.order_id.as_str()))
            }
            _ => Verdict::consistent(format!("{} row has no live venue order", trade.status)),
        }
    }

    fn ambiguous(&self, trade: &Trade, competing: &[String]) -> Verdict {
        let conflict = ReconciliationConflict::AmbiguousAttribution {
            trade_id: trade.id.clone(),
            detail: format!("executions also fit trades {}", competing.join(", ")),
        };
        warn!("Trade {}: {}", trade.id, conflict);
        let correction =
            TradeCorrection::for_trade(trade, conflict.to_string()).flag(conflict.to_string());
        Verdict::with(RowClassification::Drifted, correction)
    }

    /// Relative difference in percent when it exceeds the tolerance
    fn size_mismatch(&self, ledger_size: Decimal, venue_size: Decimal) -> Option<Decimal> {
        if venue_size <= Decimal::ZERO {
            return None;
        }
        let diff_pct = ((ledger_size - venue_size).abs() / venue_size * Decimal::ONE_HUNDRED)
            .round_dp(2);
        (diff_pct > self.size_tolerance_pct).then_some(diff_pct)
    }

    fn record_venue_orphans(
        &self,
        report: &mut ReconciliationReport,
        snapshot: &VenueSnapshot,
        claimed_order_ids: &HashSet<String>,
        rows: &[&Trade],
    ) {
        let unidentified_live = |symbol: &str, side: PositionType| {
            rows.iter().any(|t| {
                !t.status.is_terminal()
                    && !t.has_venue_identity()
                    && t.position_type == side
                    && symbols_match(&t.coin_symbol, symbol)
            })
        };

        for order in snapshot.orders.iter().filter(|o| o.status.is_open()) {
            if claimed_order_ids.contains(&order.order_id) {
                continue;
            }
            // A row without IDs may own it; never act on a guess
            if unidentified_live(&order.symbol, order.side) {
                continue;
            }

            let conflict = ReconciliationConflict::OrphanOnVenue {
                kind: "order".to_string(),
                reference: order.order_id.clone(),
                symbol: order.symbol.clone(),
            };
            warn!("{}", conflict);
            report.add_outcome(RowOutcome {
                trade_id: None,
                venue_reference: Some(order.order_id.clone()),
                symbol: order.symbol.clone(),
                classification: RowClassification::OrphanOnVenue,
                explanation: conflict.to_string(),
            });

            let cancellable = self.cancel_orphans
                && order.status == VenueOrderStatus::New
                && order.filled_size.is_zero();
            report.add_action(if cancellable {
                CorrectiveAction::CancelVenueOrder {
                    order: order.clone(),
                    conflict,
                }
            } else {
                CorrectiveAction::ReviewVenueOrder {
                    order: order.clone(),
                    conflict,
                }
            });
        }

        for position in snapshot.positions.iter().filter(|p| p.size > Decimal::ZERO) {
            let owned = rows.iter().any(|t| {
                !t.status.is_terminal()
                    && t.position_type == position.side
                    && symbols_match(&t.coin_symbol, &position.symbol)
            });
            if owned {
                continue;
            }

            let conflict = ReconciliationConflict::OrphanOnVenue {
                kind: "position".to_string(),
                reference: position
                    .position_id
                    .clone()
                    .unwrap_or_else(|| format!("{} {}", position.side, position.symbol)),
                symbol: position.symbol.clone(),
            };
            warn!("{}", conflict);
            report.add_outcome(RowOutcome {
                trade_id: None,
                venue_reference: position.position_id.clone(),
                symbol: position.symbol.clone(),
                classification: RowClassification::OrphanOnVenue,
                explanation: conflict.to_string(),
            });
            report.add_action(CorrectiveAction::ReviewVenuePosition {
                position: position.clone(),
                conflict,
            });
        }
    }
}
