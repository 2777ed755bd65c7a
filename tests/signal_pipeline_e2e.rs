//! End-to-end tests for the signal pipeline: free text in, execution plan
//! or follow-up action out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use signal_engine::application::services::{SignalError, SignalService};
use signal_engine::config::EngineConfig;
use signal_engine::domain::entities::action::{ActionType, ExchangeAction};
use signal_engine::domain::entities::intent::{OrderType, PositionType};
use signal_engine::domain::entities::order::OrderRequest;
use signal_engine::domain::entities::venue::{Execution, VenueOrder, VenuePosition};
use signal_engine::domain::errors::CapabilityError;
use signal_engine::domain::repositories::completion_client::{CompletionClient, CompletionRequest};
use signal_engine::domain::repositories::venue_client::{VenueClient, VenueError, VenueResult};
use signal_engine::domain::services::price_resolver::PriceVeto;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct QuoteVenue {
    quotes: HashMap<String, Decimal>,
    lookups: AtomicUsize,
}

impl QuoteVenue {
    fn new(quotes: &[(&str, Decimal)]) -> Arc<Self> {
        Arc::new(Self {
            quotes: quotes.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
            lookups: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl VenueClient for QuoteVenue {
    fn name(&self) -> &str {
        "hyperliquid"
    }

    async fn get_open_orders(&self) -> VenueResult<Vec<VenueOrder>> {
        Ok(Vec::new())
    }

    async fn get_order(&self, _order_id: &str) -> VenueResult<Option<VenueOrder>> {
        Ok(None)
    }

    async fn get_positions(&self) -> VenueResult<Vec<VenuePosition>> {
        Ok(Vec::new())
    }

    async fn get_executions(
        &self,
        _symbol: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> VenueResult<Vec<Execution>> {
        Ok(Vec::new())
    }

    async fn get_market_price(&self, symbol: &str) -> VenueResult<Decimal> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.quotes
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))
    }

    async fn place_order(&self, _order: &OrderRequest) -> VenueResult<String> {
        Err(VenueError::OrderPlacementFailed("not used".to_string()))
    }

    async fn cancel_order(&self, _order_id: &str) -> VenueResult<()> {
        Ok(())
    }
}

struct DownCompletion;

#[async_trait]
impl CompletionClient for DownCompletion {
    fn name(&self) -> &str {
        "down"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CapabilityError> {
        Err(CapabilityError::Transport("connection refused".to_string()))
    }
}

fn ai_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.parser.ai_enabled = true;
    config
}

#[tokio::test]
async fn test_limit_signal_planned_with_rules_when_ai_is_down() {
    let venue = QuoteVenue::new(&[("BTC", dec!(114000))]);
    let service = SignalService::new(&ai_config(), venue).with_completion(Arc::new(DownCompletion));

    let plan = service
        .plan_new_trade("BTC limit short 113811-144680 sl 116189")
        .await
        .unwrap();

    assert_eq!(plan.intent.coin_symbol, "BTC");
    assert_eq!(plan.order.side, PositionType::Short);
    assert_eq!(plan.order.order_type, OrderType::Limit);
    assert_eq!(plan.resolution.price, dec!(144680));
    assert!(plan.order.client_order_id.starts_with("sig-btc-"));
}

#[tokio::test]
async fn test_cooldown_is_per_symbol() {
    let venue = QuoteVenue::new(&[("BTC", dec!(111500)), ("SOL", dec!(150))]);
    let service = SignalService::new(&EngineConfig::default(), venue.clone());

    service
        .plan_new_trade("Shorted BTC 111100 sl 112392")
        .await
        .unwrap();
    service.plan_new_trade("SOL long 150 sl 140").await.unwrap();

    let err = service
        .plan_new_trade("Shorted BTC 111300 sl 112392")
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::Cooldown { ref key, .. } if key == "hyperliquid#BTC"));
    // Rejected before any price lookup
    assert_eq!(venue.lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_veto_and_price_failure_leave_symbol_open() {
    let venue = QuoteVenue::new(&[("BTC", dec!(125000))]);
    let service = SignalService::new(&EngineConfig::default(), venue);

    let veto = service
        .plan_new_trade("Shorted BTC 111100 sl 112392")
        .await
        .unwrap_err();
    assert!(matches!(veto, SignalError::Veto(PriceVeto::SlippageExceeded { .. })));
    assert!(!veto.is_transient());

    let missing = service.plan_new_trade("SOL long 150 sl 140").await.unwrap_err();
    assert!(matches!(missing, SignalError::MarketPrice(VenueError::UnknownSymbol(_))));

    assert!(service.cooldown().allow("hyperliquid#BTC"));
    assert!(service.cooldown().allow("hyperliquid#SOL"));
}

#[tokio::test]
async fn test_follow_ups_map_to_exchange_actions() {
    let service = SignalService::new(&EngineConfig::default(), QuoteVenue::new(&[]));
    let trade = json!({"symbol": "sol", "side": "LONG", "entry_price": "150"});

    let tp = service.plan_update("TP1 hit, move stops to BE", &trade).await.unwrap();
    assert_eq!(tp.action.action_type, ActionType::Tp1AndBreakEven);
    assert_eq!(tp.action.exchange_action, ExchangeAction::PartialSell);
    assert_eq!(tp.action.coin_symbol.as_deref(), Some("SOL"));

    let stopped = service.plan_update("stopped out", &trade).await.unwrap();
    assert_eq!(stopped.action.exchange_action, ExchangeAction::MarketSell);
    assert_eq!(stopped.action.close_percentage, Some(dec!(100)));

    let chatter = service.plan_update("gm everyone", &trade).await.unwrap();
    assert!(chatter.action.is_unknown());
    assert!(!chatter.requires_execution);
}
