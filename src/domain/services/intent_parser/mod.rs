//! Intent parsing: AI capability first, deterministic rule table as fallback.
//!
//! Text is sanitized and the quantity prefix split off before either path
//! sees it. The rule table always runs; an AI answer is preferred only when it
//! satisfies the contract, clears the confidence threshold and passes
//! validation, and its optional gaps are backfilled from the rule result.

pub mod ai_contract;
pub mod rules;

use crate::config::ParserConfig;
use crate::domain::entities::action::UpdateIntent;
use crate::domain::entities::intent::{ActiveTrade, TradeIntent};
use crate::domain::errors::{CapabilityError, ParseError};
use crate::domain::repositories::completion_client::{CompletionClient, CompletionRequest};
use crate::domain::services::signal_validator::SignalValidator;
use crate::domain::services::symbol_extractor::{SymbolExtraction, SymbolExtractor};
use crate::domain::services::update_mapper::UpdateActionMapper;
use ai_contract::{AiTradeResponse, AiUpdateResponse, NEW_TRADE_SYSTEM_PROMPT, UPDATE_SYSTEM_PROMPT};
use rules::RuleBasedParser;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why the AI answer was not used
#[derive(Debug)]
enum AiRejection {
    Unavailable(CapabilityError),
    LowConfidence(f64),
    Invalid(ParseError),
}

pub struct IntentParser {
    config: ParserConfig,
    completion: Option<Arc<dyn CompletionClient>>,
    validator: SignalValidator,
    extractor: SymbolExtractor,
    rules: RuleBasedParser,
    mapper: UpdateActionMapper,
}

impl IntentParser {
    /// Rule-table-only parser; see [`with_completion`](Self::with_completion)
    pub fn new(config: ParserConfig) -> Self {
        let mapper = UpdateActionMapper::new(config.later_tp_close_percentage);
        Self {
            config,
            completion: None,
            validator: SignalValidator::new(),
            extractor: SymbolExtractor::new(),
            rules: RuleBasedParser::new(),
            mapper,
        }
    }

    pub fn with_completion(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(client);
        self
    }

    pub fn ai_available(&self) -> bool {
        self.config.ai_enabled && self.completion.is_some()
    }

    pub fn validator(&self) -> &SignalValidator {
        &self.validator
    }

    pub async fn parse_new_trade(&self, text: &str) -> Result<TradeIntent, ParseError> {
        let sanitized = self.validator.sanitize(text);
        let extraction = self.extractor.extract(&sanitized);

        let from_rules = self
            .rules
            .parse_new_trade(&extraction)
            .and_then(|intent| {
                self.validator.validate(&intent)?;
                Ok(intent)
            });

        let rejection = match self.ask_new_trade(&extraction).await {
            Ok(ai_intent) => {
                let merged = self.merge(ai_intent, from_rules.as_ref().ok(), &extraction);
                match self.validator.validate(&merged) {
                    Ok(()) => {
                        info!(
                            "Parsed {} {} signal via AI capability",
                            merged.coin_symbol, merged.position_type
                        );
                        return Ok(merged);
                    }
                    Err(e) => AiRejection::Invalid(e.into()),
                }
            }
            Err(rejection) => rejection,
        };

        match (&rejection, from_rules) {
            (_, Ok(intent)) => {
                match &rejection {
                    AiRejection::Unavailable(CapabilityError::NotConfigured) => {}
                    other => warn!("AI intent rejected ({:?}), using rule table", other),
                }
                debug!(
                    "Parsed {} {} signal via rule table",
                    intent.coin_symbol, intent.position_type
                );
                Ok(intent)
            }
            (AiRejection::LowConfidence(confidence), Err(rule_error)) => {
                debug!("Rule table also failed: {}", rule_error);
                Err(ParseError::LowConfidence {
                    confidence: *confidence,
                    threshold: self.config.ai_min_confidence,
                })
            }
            (_, Err(rule_error)) => Err(rule_error),
        }
    }

    /// Classifies a follow-up for an existing trade. Unmatched text yields an
    /// `UNKNOWN` action rather than an error.
    pub async fn parse_update(
        &self,
        text: &str,
        active_trade: &ActiveTrade,
    ) -> Result<UpdateIntent, ParseError> {
        let sanitized = self.validator.sanitize(text);
        let mut context = active_trade.clone();
        context.coin_symbol = context
            .coin_symbol
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .or_else(|| self.extractor.find_ticker(&sanitized));

        let action = match self.ask_update(&sanitized, &context).await {
            Ok(ai_action) => self.mapper.complete(ai_action, &sanitized, Some(&context)),
            Err(rejection) => {
                if !matches!(rejection, AiRejection::Unavailable(CapabilityError::NotConfigured)) {
                    warn!("AI update rejected ({:?}), using rule table", rejection);
                }
                self.mapper.classify(&sanitized, Some(&context))
            }
        };

        match self.validator.validate_action(&action) {
            Ok(()) => Ok(action),
            Err(e) => {
                warn!("Update action failed validation: {}, reclassifying", e);
                let fallback = self.mapper.classify(&sanitized, Some(&context));
                self.validator.validate_action(&fallback)?;
                Ok(fallback)
            }
        }
    }

    /// Ticker only, for routing follow-ups; no AI call
    pub fn extract_symbol_only(&self, text: &str) -> Option<String> {
        let sanitized = self.validator.sanitize(text);
        self.extractor.find_ticker(&sanitized)
    }

    fn merge(
        &self,
        mut ai: TradeIntent,
        from_rules: Option<&TradeIntent>,
        extraction: &SymbolExtraction,
    ) -> TradeIntent {
        if let Some(symbol) = &extraction.symbol {
            ai.coin_symbol = symbol.clone();
        }
        ai.quantity_multiplier = extraction.quantity.or(ai.quantity_multiplier);

        let lower = extraction.cleaned_text.to_ascii_lowercase();
        if let Some(direction) = rules::explicit_direction(&lower) {
            if direction != ai.position_type {
                warn!(
                    "AI returned {} but the text says {}, keeping the text's direction",
                    ai.position_type, direction
                );
                ai.position_type = direction;
            }
        }
        if let Some(order_type) = rules::explicit_order_type(&lower) {
            if order_type != ai.order_type {
                warn!(
                    "AI returned {} but the text says {}, keeping the text's order type",
                    ai.order_type, order_type
                );
                ai.order_type = order_type;
            }
        }

        if let Some(fallback) = from_rules {
            if ai.stop_loss.is_none() {
                ai.stop_loss = fallback.stop_loss.clone();
            }
            if ai.take_profits.is_empty() {
                ai.take_profits = fallback.take_profits.clone();
            }
            if ai.risk_level.is_none() {
                ai.risk_level = fallback.risk_level.clone();
            }
        }
        ai
    }

    async fn ask(&self, system_prompt: &str, user_prompt: String) -> Result<String, CapabilityError> {
        let client = match &self.completion {
            Some(client) if self.config.ai_enabled => client,
            _ => return Err(CapabilityError::NotConfigured),
        };
        let request = CompletionRequest::json(system_prompt, user_prompt, self.config.ai_temperature);

        match tokio::time::timeout(self.config.ai_timeout(), client.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout(self.config.ai_timeout_ms)),
        }
    }

    fn confident(&self, confidence: Option<f64>) -> Result<(), AiRejection> {
        match confidence {
            Some(c) if c < self.config.ai_min_confidence => Err(AiRejection::LowConfidence(c)),
            _ => Ok(()),
        }
    }

    async fn ask_new_trade(&self, extraction: &SymbolExtraction) -> Result<TradeIntent, AiRejection> {
        let raw = self
            .ask(NEW_TRADE_SYSTEM_PROMPT, extraction.cleaned_text.clone())
            .await
            .map_err(AiRejection::Unavailable)?;
        let response: AiTradeResponse = ai_contract::decode(&raw).map_err(AiRejection::Unavailable)?;
        self.confident(response.confidence)?;

        let intent = response.into_intent().map_err(AiRejection::Invalid)?;
        self.validator
            .validate(&intent)
            .map_err(|e| AiRejection::Invalid(e.into()))?;
        Ok(intent)
    }

    async fn ask_update(
        &self,
        text: &str,
        context: &ActiveTrade,
    ) -> Result<UpdateIntent, AiRejection> {
        let context_json = serde_json::to_string(context).unwrap_or_else(|_| "{}".to_string());
        let user_prompt = format!("Active trade: {}\nMessage: {}", context_json, text);

        let raw = self
            .ask(UPDATE_SYSTEM_PROMPT, user_prompt)
            .await
            .map_err(AiRejection::Unavailable)?;
        let response: AiUpdateResponse = ai_contract::decode(&raw).map_err(AiRejection::Unavailable)?;
        self.confident(response.confidence)?;
        response.into_action(text).map_err(AiRejection::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::action::{ActionType, ActionValue};
    use crate::domain::entities::intent::{OrderType, PositionType, StopLoss};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedCompletion {
        reply: Result<String, CapabilityError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedCompletion {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(error: CapabilityError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(error),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletion {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone()
        }
    }

    fn ai_config() -> ParserConfig {
        ParserConfig {
            ai_enabled: true,
            ..ParserConfig::default()
        }
    }

    #[tokio::test]
    async fn test_rules_only_parser() {
        let parser = IntentParser::new(ParserConfig::default());
        let intent = parser.parse_new_trade("Shorted BTC 111100 sl 112392").await.unwrap();
        assert_eq!(intent.coin_symbol, "BTC");
        assert_eq!(intent.position_type, PositionType::Short);
        assert_eq!(intent.entry_prices, vec![dec!(111100)]);
        assert_eq!(intent.stop_loss, Some(StopLoss::Price(dec!(112392))));
        assert_eq!(intent.order_type, OrderType::Market);
    }

    #[tokio::test]
    async fn test_ai_answer_preferred_and_backfilled() {
        let client = ScriptedCompletion::replying(
            r#"{"coin_symbol":"ETH","position_type":"LONG","entry_prices":[3050],"order_type":"LIMIT","confidence":0.95}"#,
        );
        let parser = IntentParser::new(ai_config()).with_completion(client.clone());

        let intent = parser
            .parse_new_trade("ETH limit long 3050 sl 2900 tp 3300")
            .await
            .unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(intent.order_type, OrderType::Limit);
        assert_eq!(intent.stop_loss, Some(StopLoss::Price(dec!(2900))));
        assert_eq!(intent.take_profits, vec![dec!(3300)]);
    }

    #[tokio::test]
    async fn test_directional_words_override_ai() {
        let client = ScriptedCompletion::replying(
            r#"{"coin_symbol":"BTC","position_type":"LONG","entry_prices":[111100],"confidence":0.9}"#,
        );
        let parser = IntentParser::new(ai_config()).with_completion(client);
        let intent = parser.parse_new_trade("Shorted BTC 111100 sl 112392").await.unwrap();
        assert_eq!(intent.position_type, PositionType::Short);
    }

    #[tokio::test]
    async fn test_order_type_keyword_kept_when_ai_omits_it() {
        let client = ScriptedCompletion::replying(
            r#"{"coin_symbol":"BTC","position_type":"SHORT","entry_prices":[113811,144680],"confidence":0.95}"#,
        );
        let parser = IntentParser::new(ai_config()).with_completion(client.clone());

        let intent = parser
            .parse_new_trade("BTC limit short 113811-144680 sl 116189")
            .await
            .unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(intent.order_type, OrderType::Limit);
        assert_eq!(intent.entry_prices, vec![dec!(113811), dec!(144680)]);
        assert_eq!(intent.stop_loss, Some(StopLoss::Price(dec!(116189))));
    }

    #[tokio::test]
    async fn test_spot_keyword_overrides_ai_order_type() {
        let client = ScriptedCompletion::replying(
            r#"{"coin_symbol":"SOL","position_type":"LONG","entry_prices":[150],"order_type":"MARKET","confidence":0.9}"#,
        );
        let parser = IntentParser::new(ai_config()).with_completion(client);
        let intent = parser.parse_new_trade("SOL spot buy 150").await.unwrap();
        assert_eq!(intent.order_type, OrderType::Spot);
    }

    #[tokio::test]
    async fn test_schema_violation_falls_back_to_rules() {
        let client = ScriptedCompletion::replying(r#"{"coin_symbol":"BTC","entry_prices":"soon"}"#);
        let parser = IntentParser::new(ai_config()).with_completion(client);
        let intent = parser.parse_new_trade("BTC limit short 113811-144680 sl 116189").await.unwrap();
        assert_eq!(intent.entry_prices, vec![dec!(113811), dec!(144680)]);
    }

    #[tokio::test]
    async fn test_capability_failure_falls_back_to_rules() {
        let client = ScriptedCompletion::failing(CapabilityError::Transport("connection refused".to_string()));
        let parser = IntentParser::new(ai_config()).with_completion(client);
        let intent = parser.parse_new_trade("1000TOSHI|Entry:|0.7172|SL:|0.692").await.unwrap();
        assert_eq!(intent.coin_symbol, "TOSHI");
        assert_eq!(intent.quantity_multiplier, Some(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_capability_times_out() {
        let client = Arc::new(ScriptedCompletion {
            reply: Ok("{}".to_string()),
            delay: Duration::from_secs(60),
            calls: AtomicUsize::new(0),
        });
        let parser = IntentParser::new(ai_config()).with_completion(client);
        let intent = parser.parse_new_trade("SOL long 150 sl 140").await.unwrap();
        assert_eq!(intent.coin_symbol, "SOL");
    }

    #[tokio::test]
    async fn test_low_confidence_without_rule_result() {
        let client = ScriptedCompletion::replying(
            r#"{"coin_symbol":"BTC","position_type":"LONG","entry_prices":[100],"confidence":0.2}"#,
        );
        let parser = IntentParser::new(ai_config()).with_completion(client);
        let err = parser.parse_new_trade("thinking about btc soon").await.unwrap_err();
        assert!(matches!(err, ParseError::LowConfidence { confidence, .. } if confidence == 0.2));
    }

    #[tokio::test]
    async fn test_low_confidence_with_rule_result_uses_rules() {
        let client = ScriptedCompletion::replying(
            r#"{"coin_symbol":"DOGE","position_type":"SHORT","entry_prices":[1],"confidence":0.1}"#,
        );
        let parser = IntentParser::new(ai_config()).with_completion(client);
        let intent = parser.parse_new_trade("XRP long 0.52 sl 0.49").await.unwrap();
        assert_eq!(intent.coin_symbol, "XRP");
        assert_eq!(intent.position_type, PositionType::Long);
    }

    #[tokio::test]
    async fn test_parse_update_rules_only() {
        let parser = IntentParser::new(ParserConfig::default());
        let context = ActiveTrade::for_symbol("eth");
        let action = parser
            .parse_update("TP1 hit \u{2705} move stops to BE", &context)
            .await
            .unwrap();
        assert_eq!(action.action_type, ActionType::Tp1AndBreakEven);
        assert_eq!(action.coin_symbol.as_deref(), Some("ETH"));
    }

    #[tokio::test]
    async fn test_parse_update_ai_unknown_reclassified() {
        let client = ScriptedCompletion::replying(r#"{"action_type":"UNKNOWN","confidence":0.9}"#);
        let parser = IntentParser::new(ai_config()).with_completion(client);
        let action = parser
            .parse_update("updated stoploss", &ActiveTrade::for_symbol("BTC"))
            .await
            .unwrap();
        assert_eq!(action.action_type, ActionType::UpdateSl);
        assert_eq!(action.value, Some(ActionValue::BreakEven));
    }

    #[tokio::test]
    async fn test_parse_update_invalid_ai_value_reclassified() {
        let client =
            ScriptedCompletion::replying(r#"{"action_type":"UPDATE_SL","value":-5,"confidence":0.9}"#);
        let parser = IntentParser::new(ai_config()).with_completion(client);
        let action = parser
            .parse_update("SL moved to 2450", &ActiveTrade::for_symbol("ETH"))
            .await
            .unwrap();
        assert_eq!(action.action_type, ActionType::UpdateSl);
        assert_eq!(action.value, Some(ActionValue::Price(dec!(2450))));
    }

    #[test]
    fn test_extract_symbol_only() {
        let parser = IntentParser::new(ParserConfig::default());
        assert_eq!(parser.extract_symbol_only("\u{200B}1000PEPE tp2").as_deref(), Some("PEPE"));
        assert_eq!(parser.extract_symbol_only("SOL tp1 done").as_deref(), Some("SOL"));
        assert_eq!(parser.extract_symbol_only("gm"), None);
    }
}
