//! Signal pipeline: text in, execution plan out.
//!
//! Ties the parser, cooldown gate, market price cache and price resolver
//! together. Execution itself belongs to the caller; this service only
//! decides what should be sent and why.

use crate::application::services::market_price::MarketPriceCache;
use crate::config::EngineConfig;
use crate::domain::entities::action::{ExchangeAction, PositionAction};
use crate::domain::entities::intent::{ActiveTrade, OrderType, TradeIntent};
use crate::domain::entities::order::OrderRequest;
use crate::domain::errors::{ParseError, ValidationError};
use crate::domain::repositories::completion_client::CompletionClient;
use crate::domain::repositories::venue_client::{VenueClient, VenueError};
use crate::domain::services::cooldown::CooldownGate;
use crate::domain::services::intent_parser::IntentParser;
use crate::domain::services::price_resolver::{
    PriceResolution, PriceResolver, PriceVeto, SlippageCheck,
};
use crate::domain::value_objects::price::Price;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Quantity precision handed to the venue
const QUANTITY_DECIMALS: u32 = 8;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Veto(#[from] PriceVeto),

    #[error("Cooldown active for {key}: {remaining_secs}s remaining")]
    Cooldown { key: String, remaining_secs: u64 },

    #[error("Market price unavailable: {0}")]
    MarketPrice(#[from] VenueError),
}

impl SignalError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SignalError::Parse(e) => e.error_code(),
            SignalError::Validation(_) => "ERR_VALIDATION",
            SignalError::Veto(v) => v.error_code(),
            SignalError::Cooldown { .. } => "ERR_COOLDOWN",
            SignalError::MarketPrice(_) => "ERR_MARKET_PRICE",
        }
    }

    /// Rejections that say nothing is wrong with the signal itself
    pub fn is_transient(&self) -> bool {
        match self {
            SignalError::Cooldown { .. } => true,
            SignalError::MarketPrice(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

/// Everything the execution collaborator needs for a new trade
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub intent: TradeIntent,
    pub order: OrderRequest,
    pub current_price: Decimal,
    pub resolution: PriceResolution,
    #[serde(skip)]
    pub slippage: Option<SlippageCheck>,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatePlan {
    pub action: PositionAction,
    pub requires_execution: bool,
    pub rationale: String,
}

pub struct SignalService {
    parser: IntentParser,
    resolver: PriceResolver,
    cooldown: CooldownGate,
    prices: MarketPriceCache,
    default_notional: Decimal,
    sequence: AtomicU64,
}

impl SignalService {
    pub fn new(config: &EngineConfig, venue: Arc<dyn VenueClient>) -> Self {
        Self {
            parser: IntentParser::new(config.parser.clone()),
            resolver: PriceResolver::new(config.pricing.clone()),
            cooldown: CooldownGate::new(config.cooldown.cooldown()),
            prices: MarketPriceCache::new(venue, &config.pricing),
            default_notional: config.pricing.default_order_notional,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_completion(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.parser = self.parser.with_completion(client);
        self
    }

    pub fn cooldown(&self) -> &CooldownGate {
        &self.cooldown
    }

    pub async fn parse_new_trade_signal(&self, text: &str) -> Result<TradeIntent, SignalError> {
        Ok(self.parser.parse_new_trade(text).await?)
    }

    pub async fn parse_trade_update_signal(
        &self,
        text: &str,
        active_trade: &ActiveTrade,
    ) -> Result<PositionAction, SignalError> {
        Ok(self.parser.parse_update(text, active_trade).await?)
    }

    pub fn resolve_execution_price(
        &self,
        intent: &TradeIntent,
        current_price: Decimal,
    ) -> PriceResolution {
        self.resolver.resolve(
            &intent.entry_prices,
            Some(intent.order_type),
            Some(intent.position_type),
            current_price,
        )
    }

    /// Parse, gate and size a new-trade signal.
    ///
    /// The cooldown mark is kept only when a plan is produced; a veto or a
    /// price lookup failure releases it again.
    pub async fn plan_new_trade(&self, text: &str) -> Result<ExecutionPlan, SignalError> {
        let intent = self.parse_new_trade_signal(text).await?;
        let symbol = intent.venue_symbol();
        let key = CooldownGate::key(self.prices.venue_name(), &symbol);

        if let Err(remaining) = self.cooldown.try_acquire(&key) {
            warn!("Signal for {} rejected: cooldown {:?} remaining", key, remaining);
            return Err(SignalError::Cooldown {
                key,
                remaining_secs: remaining.as_secs().max(1),
            });
        }

        match self.build_plan(intent, &symbol).await {
            Ok(plan) => {
                info!(
                    "Planned {} {} {} qty {} at {} ({})",
                    plan.order.order_type,
                    plan.order.side,
                    plan.order.symbol,
                    plan.order.quantity,
                    plan.resolution.price,
                    plan.rationale
                );
                Ok(plan)
            }
            Err(e) => {
                self.cooldown.release(&key);
                warn!("Signal for {} not planned [{}]: {}", key, e.error_code(), e);
                Err(e)
            }
        }
    }

    async fn build_plan(&self, intent: TradeIntent, symbol: &str) -> Result<ExecutionPlan, SignalError> {
        let current_price = self.prices.current_price(symbol).await?;
        let resolution = self.resolve_execution_price(&intent, current_price);

        let slippage = match intent.order_type {
            OrderType::Market if !intent.entry_prices.is_empty() => Some(
                self.resolver
                    .check_slippage(&intent.coin_symbol, &intent.entry_prices, current_price)?,
            ),
            _ => None,
        };

        let quantity = (self.default_notional / resolution.price).round_dp(QUANTITY_DECIMALS);
        let limit_price = match intent.order_type {
            OrderType::Market => None,
            OrderType::Limit | OrderType::Spot => Some(resolution.price),
        };
        let stop_loss = intent
            .stop_loss
            .as_ref()
            .and_then(|sl| sl.price())
            .map(|p| Price::new("stop_loss", p))
            .transpose()?;

        let order = OrderRequest::new(
            self.next_client_order_id(symbol),
            symbol.to_string(),
            intent.position_type,
            intent.order_type,
            limit_price,
            quantity,
        )?
        .with_stop_loss(stop_loss);

        let rationale = match &slippage {
            Some(check) => format!(
                "{}; slippage {}% within {}% ({})",
                resolution.rationale, check.diff_pct, check.threshold_pct, check.class
            ),
            None => resolution.rationale.clone(),
        };

        Ok(ExecutionPlan {
            intent,
            order,
            current_price,
            resolution,
            slippage,
            rationale,
        })
    }

    /// Classify a follow-up. `active_trade` is whatever JSON the transport
    /// attached to the message.
    pub async fn plan_update(
        &self,
        text: &str,
        active_trade: &serde_json::Value,
    ) -> Result<UpdatePlan, SignalError> {
        let context = ActiveTrade::from_json(active_trade);
        let action = self.parse_trade_update_signal(text, &context).await?;
        let requires_execution = action.exchange_action != ExchangeAction::NoAction;

        let rationale = format!(
            "{} -> {} ({})",
            action.action_type.code(),
            action.exchange_action,
            action.reason
        );
        if action.is_unknown() {
            warn!("Unrecognized follow-up for {:?}: {}", action.coin_symbol, text);
        } else {
            info!("Follow-up for {:?}: {}", action.coin_symbol, rationale);
        }

        Ok(UpdatePlan {
            action,
            requires_execution,
            rationale,
        })
    }

    fn next_client_order_id(&self, symbol: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "sig-{}-{}-{}",
            symbol.to_lowercase(),
            Utc::now().timestamp_millis(),
            sequence
        )
    }
}
