//! Reconciliation Actor
//!
//! This actor runs reconciliation passes for one venue, either on a
//! `tokio::time::interval` schedule or on demand. A pass collects a venue
//! snapshot and the live ledger rows, runs the pure [`ReconciliationEngine`],
//! then carries out the proposed actions one at a time. A failure in one
//! write is logged and counted; the pass goes on.

use crate::config::ReconciliationConfig;
use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::domain::entities::venue::{Execution, VenueOrder, VenueSnapshot};
use crate::domain::repositories::ledger_store::LedgerStore;
use crate::domain::repositories::venue_client::{VenueClient, VenueResult};
use crate::domain::services::reconciliation::{
    CorrectiveAction, ReconciliationEngine, ReconciliationError, ReconciliationReport,
    ReconciliationStatus, RetryPolicy,
};
use crate::persistence::ReconciliationRepository;
use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Channel capacity for reconciliation actor messages
const RECONCILIATION_CHANNEL_CAPACITY: usize = 100;

/// Terminal rows younger than this are still compared against open orders
const TERMINAL_ROW_LOOKBACK_HOURS: i64 = 24;

/// Messages that can be sent to the reconciliation actor
#[derive(Debug)]
pub enum ReconciliationMessage {
    /// Run a pass now
    ReconcileNow {
        reply: mpsc::Sender<Result<ReconciliationReport, ReconciliationError>>,
    },

    /// Get statistics and the last report
    GetStatus {
        reply: mpsc::Sender<ReconciliationActorStatus>,
    },

    /// Shutdown the actor
    Shutdown,
}

/// Reconciliation actor statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationStats {
    pub total_reconciliations: u64,
    pub successful_reconciliations: u64,
    pub failed_reconciliations: u64,
    pub corrections_applied: u64,
    pub last_reconciliation: Option<DateTime<Utc>>,
    pub last_status: Option<ReconciliationStatus>,
}

#[derive(Debug, Clone)]
pub struct ReconciliationActorStatus {
    pub venue: String,
    pub stats: ReconciliationStats,
    pub last_report: Option<ReconciliationReport>,
}

/// Reconciliation Actor
pub struct ReconciliationActor {
    venue: Arc<dyn VenueClient>,
    ledger: Arc<dyn LedgerStore>,
    audit: Option<Arc<dyn ReconciliationRepository>>,
    engine: ReconciliationEngine,
    retry: RetryPolicy,
    config: ReconciliationConfig,
    stats: ReconciliationStats,
    last_report: Option<ReconciliationReport>,
}

impl ReconciliationActor {
    /// Create a new reconciliation actor
    pub fn new(
        venue: Arc<dyn VenueClient>,
        ledger: Arc<dyn LedgerStore>,
        audit: Option<Arc<dyn ReconciliationRepository>>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            venue,
            ledger,
            audit,
            engine: ReconciliationEngine::new(&config),
            retry: RetryPolicy::from_config(&config),
            config,
            stats: ReconciliationStats::default(),
            last_report: None,
        }
    }

    /// Spawn a new reconciliation actor
    pub fn spawn(
        venue: Arc<dyn VenueClient>,
        ledger: Arc<dyn LedgerStore>,
        audit: Option<Arc<dyn ReconciliationRepository>>,
        config: ReconciliationConfig,
    ) -> mpsc::Sender<ReconciliationMessage> {
        let (tx, rx) = mpsc::channel(RECONCILIATION_CHANNEL_CAPACITY);

        let actor = Self::new(venue, ledger, audit, config);

        tokio::spawn(async move {
            actor.run(rx).await;
        });

        info!("ReconciliationActor spawned");
        tx
    }

    /// Main actor loop
    async fn run(mut self, mut rx: mpsc::Receiver<ReconciliationMessage>) {
        info!(
            "ReconciliationActor started for {} (scheduled: {}, every {}s)",
            self.venue.name(),
            self.config.enabled,
            self.config.interval_seconds
        );

        let mut ticker = self.config.enabled.then(|| {
            let period = self.config.interval();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        debug!("All ReconciliationActor senders dropped");
                        break;
                    };
                    match msg {
                        ReconciliationMessage::ReconcileNow { reply } => {
                            debug!("ReconciliationActor received ReconcileNow");
                            let result = self.reconcile_once().await;
                            self.update_stats(&result);
                            if let Err(e) = reply.send(result).await {
                                error!("Failed to send ReconcileNow reply: {:?}", e);
                            }
                        }

                        ReconciliationMessage::GetStatus { reply } => {
                            debug!("ReconciliationActor received GetStatus");
                            let status = ReconciliationActorStatus {
                                venue: self.venue.name().to_string(),
                                stats: self.stats.clone(),
                                last_report: self.last_report.clone(),
                            };
                            if let Err(e) = reply.send(status).await {
                                error!("Failed to send GetStatus reply: {:?}", e);
                            }
                        }

                        ReconciliationMessage::Shutdown => {
                            info!("ReconciliationActor received shutdown signal");
                            break;
                        }
                    }
                }

                _ = next_tick(&mut ticker) => {
                    debug!("Scheduled reconciliation for {}", self.venue.name());
                    let result = self.reconcile_once().await;
                    if let Err(e) = &result {
                        warn!(
                            "Scheduled reconciliation failed for {} [{}]: {}",
                            self.venue.name(),
                            e.error_code(),
                            e
                        );
                    }
                    self.update_stats(&result);
                }
            }
        }

        info!("ReconciliationActor stopped");
    }

    /// One full pass: collect, compare, correct, audit
    async fn reconcile_once(&self) -> Result<ReconciliationReport, ReconciliationError> {
        let (snapshot, ledger) = timeout(self.config.timeout(), self.collect())
            .await
            .map_err(|_| {
                warn!(
                    "Reconciliation snapshot for {} timed out after {}ms",
                    self.venue.name(),
                    self.config.timeout_milliseconds
                );
                ReconciliationError::Timeout(self.config.timeout_milliseconds)
            })??;

        let mut report = self.engine.reconcile(&snapshot, &ledger);
        self.carry_out(&mut report).await;

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.save_reconciliation(&report).await {
                error!("Failed to persist reconciliation audit: {}", e);
            }
        }

        info!("{}", report.summary());
        Ok(report)
    }

    /// Fetch the venue snapshot and the ledger rows it is compared with
    async fn collect(&self) -> Result<(VenueSnapshot, Vec<Trade>), ReconciliationError> {
        let taken_at = Utc::now();
        let since = taken_at - chrono::Duration::hours(TERMINAL_ROW_LOOKBACK_HOURS);
        let active = TradeStatus::active();

        let (orders, positions, live_rows, recent_rows) = tokio::join!(
            with_retry(&self.retry, "get_open_orders", || self.venue.get_open_orders()),
            with_retry(&self.retry, "get_positions", || self.venue.get_positions()),
            self.ledger.list_by_status(&active),
            self.ledger.list_created_between(since, taken_at),
        );
        let mut orders = orders?;
        let positions = positions?;

        // Live rows plus recently closed ones, each once
        let mut seen = HashSet::new();
        let ledger: Vec<Trade> = live_rows?
            .into_iter()
            .chain(recent_rows?.into_iter().filter(|t| t.status.is_terminal()))
            .filter(|t| seen.insert(t.id.clone()))
            .collect();

        orders.extend(self.departed_orders(&ledger, &orders).await?);

        let queries = self.engine.execution_queries(&ledger, taken_at);
        let executions: Vec<Execution> = try_join_all(queries.iter().map(|q| {
            with_retry(&self.retry, "get_executions", move || {
                self.venue.get_executions(&q.symbol, q.start, q.end)
            })
        }))
        .await?
        .into_iter()
        .flatten()
        .collect();

        debug!(
            "Snapshot for {}: {} orders, {} positions, {} executions, {} ledger rows",
            self.venue.name(),
            orders.len(),
            positions.len(),
            executions.len(),
            ledger.len()
        );

        let snapshot = VenueSnapshot {
            venue: self.venue.name().to_string(),
            orders,
            positions,
            executions,
            taken_at: Some(taken_at),
        };
        Ok((snapshot, ledger))
    }

    /// Orders of PENDING rows that are no longer on the open book
    async fn departed_orders(
        &self,
        ledger: &[Trade],
        open_orders: &[VenueOrder],
    ) -> Result<Vec<VenueOrder>, ReconciliationError> {
        let open_ids: HashSet<&str> = open_orders.iter().map(|o| o.order_id.as_str()).collect();
        let lookups = ledger
            .iter()
            .filter(|t| t.status == TradeStatus::Pending)
            .filter_map(|t| t.exchange_order_id.as_deref())
            .filter(|id| !open_ids.contains(id))
            .map(|id| with_retry(&self.retry, "get_order", move || self.venue.get_order(id)));

        Ok(try_join_all(lookups).await?.into_iter().flatten().collect())
    }

    async fn carry_out(&self, report: &mut ReconciliationReport) {
        let actions = report.actions.clone();
        for action in &actions {
            match action {
                CorrectiveAction::UpdateTrade(correction) => {
                    match self.ledger.apply_correction(correction).await {
                        Ok(true) => report.corrections_applied += 1,
                        Ok(false) => {
                            info!(
                                "Trade {} changed since the snapshot, correction skipped",
                                correction.trade_id
                            );
                            report.corrections_skipped += 1;
                        }
                        Err(e) => {
                            error!(
                                "Failed to correct trade {} [{}]: {}",
                                correction.trade_id,
                                e.error_code(),
                                e
                            );
                            report.write_failures += 1;
                        }
                    }
                }
                CorrectiveAction::ReviewVenueOrder { .. }
                | CorrectiveAction::ReviewVenuePosition { .. } => {
                    warn!("{}: {}", self.venue.name(), action.describe());
                }
                CorrectiveAction::CancelVenueOrder { order, .. } => {
                    if !self.cancel_if_still_orphaned(order).await {
                        report.write_failures += 1;
                    }
                }
            }
        }
    }

    /// Re-reads the order and cancels it only while it is open and unfilled.
    /// Returns false when the venue call failed.
    async fn cancel_if_still_orphaned(&self, order: &VenueOrder) -> bool {
        let fresh = match self.venue.get_order(&order.order_id).await {
            Ok(fresh) => fresh,
            Err(e) => {
                error!("Failed to re-read orphan order {}: {}", order.order_id, e);
                return false;
            }
        };

        match fresh {
            Some(fresh) if fresh.status.is_open() && fresh.filled_size.is_zero() => {
                match self.venue.cancel_order(&order.order_id).await {
                    Ok(()) => {
                        info!("Cancelled orphan order {} ({})", order.order_id, order.symbol);
                        true
                    }
                    Err(e) => {
                        error!("Failed to cancel orphan order {}: {}", order.order_id, e);
                        false
                    }
                }
            }
            Some(fresh) => {
                info!(
                    "Orphan order {} is now {} with {} filled, not cancelling",
                    fresh.order_id, fresh.status, fresh.filled_size
                );
                true
            }
            None => {
                info!("Orphan order {} is gone from the venue", order.order_id);
                true
            }
        }
    }

    /// Update actor statistics
    fn update_stats(&mut self, result: &Result<ReconciliationReport, ReconciliationError>) {
        self.stats.total_reconciliations += 1;
        self.stats.last_reconciliation = Some(Utc::now());

        match result {
            Ok(report) => {
                self.stats.successful_reconciliations += 1;
                self.stats.corrections_applied += report.corrections_applied as u64;
                self.stats.last_status = Some(report.status);
                self.last_report = Some(report.clone());
            }
            Err(_) => {
                self.stats.failed_reconciliations += 1;
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Retries recoverable venue errors with exponential backoff
async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, ReconciliationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VenueResult<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_recoverable() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{} failed (attempt {}): {}, retrying in {:?}",
                    operation,
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if attempt > 0 => {
                return Err(ReconciliationError::RetryExhausted {
                    attempts: attempt + 1,
                    last_error: e.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }
    }
}
