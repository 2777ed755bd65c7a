use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

/// Intent parsing and the AI capability
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub ai_enabled: bool,
    pub ai_api_url: String,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub ai_timeout_ms: u64,
    pub ai_temperature: f32,
    /// AI answers below this confidence fall back to the rule table
    pub ai_min_confidence: f64,
    /// Close percentage for TP3 and later when the signal gives none
    pub later_tp_close_percentage: Decimal,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            ai_enabled: false,
            ai_api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            ai_api_key: None,
            ai_model: "gpt-4o-mini".to_string(),
            ai_timeout_ms: 5000,
            ai_temperature: 0.0,
            ai_min_confidence: 0.6,
            later_tp_close_percentage: dec!(25),
        }
    }
}

impl ParserConfig {
    pub fn ai_timeout(&self) -> Duration {
        Duration::from_millis(self.ai_timeout_ms)
    }
}

/// Price resolution, slippage gate and order sizing
#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// Max slippage in percent per symbol class
    pub slippage_major_pct: Decimal,
    pub slippage_memecoin_pct: Decimal,
    pub slippage_low_liquidity_pct: Decimal,
    pub major_symbols: Vec<String>,
    pub memecoin_symbols: Vec<String>,
    /// Quote notional used for simple position sizing
    pub default_order_notional: Decimal,
    pub price_cache_ttl_seconds: u64,
    pub price_cache_capacity: usize,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let to_strings = |symbols: &[&str]| symbols.iter().map(|s| s.to_string()).collect();
        Self {
            slippage_major_pct: dec!(1),
            slippage_memecoin_pct: dec!(5),
            slippage_low_liquidity_pct: dec!(3),
            major_symbols: to_strings(&[
                "BTC", "ETH", "SOL", "BNB", "XRP", "ADA", "AVAX", "DOT", "LINK", "LTC", "TRX",
                "TON", "BCH", "NEAR", "SUI",
            ]),
            memecoin_symbols: to_strings(&[
                "DOGE", "PEPE", "SHIB", "BONK", "FLOKI", "WIF", "TOSHI", "MOG", "SATS", "RATS",
                "BRETT", "TURBO", "POPCAT", "NEIRO", "MEW", "CAT", "LADYS", "BABYDOGE", "COQ",
                "CHEEMS", "MUBARAK",
            ]),
            default_order_notional: dec!(100),
            price_cache_ttl_seconds: 5,
            price_cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CooldownConfig {
    pub signal_cooldown_seconds: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            signal_cooldown_seconds: 60,
        }
    }
}

impl CooldownConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.signal_cooldown_seconds)
    }
}

/// Ledger/venue reconciliation
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// Slack around a trade's lifetime when attributing executions by time
    pub timestamp_buffer_seconds: i64,
    pub timeout_milliseconds: u64,
    pub max_retries: u32,
    /// Relative size difference (percent) tolerated between ledger and venue
    pub size_tolerance_pct: Decimal,
    /// Cancel venue orders that have no ledger row (after a fresh re-read)
    pub cancel_orphans: bool,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,     // Every 5 minutes
            timestamp_buffer_seconds: 3600,
            timeout_milliseconds: 10000,
            max_retries: 3,
            size_tolerance_pct: dec!(1),
            cancel_orphans: false,
        }
    }
}

impl ReconciliationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }

    pub fn timestamp_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timestamp_buffer_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://signal_engine.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Whole engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub parser: ParserConfig,
    pub pricing: PricingConfig,
    pub cooldown: CooldownConfig,
    pub reconciliation: ReconciliationConfig,
    pub database: DatabaseConfig,
}

impl EngineConfig {
    /// Reads `.env` (if any) then the process environment
    pub fn load() -> EngineConfig {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }
        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> EngineConfig {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Invalid or out-of-range values are logged and the default is kept.
    pub fn from_lookup<F>(lookup: F) -> EngineConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();
        let env = EnvReader { lookup: &lookup };

        // Parser
        let parser = &mut config.parser;
        parser.ai_enabled = env.flag("AI_ENABLED", parser.ai_enabled);
        if let Some(url) = env.text("AI_API_URL") {
            parser.ai_api_url = url;
        }
        if let Some(key) = env.text("AI_API_KEY") {
            parser.ai_api_key = Some(key);
        }
        if let Some(model) = env.text("AI_MODEL") {
            parser.ai_model = model;
        }
        parser.ai_timeout_ms = env.ranged("AI_TIMEOUT_MS", 100..=30_000, parser.ai_timeout_ms);
        parser.ai_temperature = env.ranged("AI_TEMPERATURE", 0.0..=1.0, parser.ai_temperature);
        parser.ai_min_confidence =
            env.ranged("AI_MIN_CONFIDENCE", 0.0..=1.0, parser.ai_min_confidence);
        parser.later_tp_close_percentage = env.ranged(
            "LATER_TP_CLOSE_PERCENTAGE",
            dec!(1)..=dec!(100),
            parser.later_tp_close_percentage,
        );

        // Pricing
        let pricing = &mut config.pricing;
        let slippage = dec!(0.01)..=dec!(50);
        pricing.slippage_major_pct =
            env.ranged("SLIPPAGE_MAJOR_PCT", slippage.clone(), pricing.slippage_major_pct);
        pricing.slippage_memecoin_pct =
            env.ranged("SLIPPAGE_MEMECOIN_PCT", slippage.clone(), pricing.slippage_memecoin_pct);
        pricing.slippage_low_liquidity_pct = env.ranged(
            "SLIPPAGE_LOW_LIQUIDITY_PCT",
            slippage,
            pricing.slippage_low_liquidity_pct,
        );
        pricing.default_order_notional = env.ranged(
            "DEFAULT_ORDER_NOTIONAL",
            dec!(1)..=dec!(1000000),
            pricing.default_order_notional,
        );
        pricing.price_cache_ttl_seconds = env.ranged(
            "MARKET_PRICE_CACHE_TTL_SECONDS",
            0..=3600,
            pricing.price_cache_ttl_seconds,
        );
        pricing.price_cache_capacity = env.ranged(
            "MARKET_PRICE_CACHE_CAPACITY",
            1..=100_000,
            pricing.price_cache_capacity,
        );

        // Cooldown
        config.cooldown.signal_cooldown_seconds = env.ranged(
            "SIGNAL_COOLDOWN_SECONDS",
            0..=86_400,
            config.cooldown.signal_cooldown_seconds,
        );

        // Reconciliation
        let recon = &mut config.reconciliation;
        recon.enabled = env.flag("RECONCILIATION_ENABLED", recon.enabled);
        recon.interval_seconds =
            env.ranged("RECONCILIATION_INTERVAL_SECONDS", 10..=3600, recon.interval_seconds);
        recon.timestamp_buffer_seconds = env.ranged(
            "RECONCILIATION_TIMESTAMP_BUFFER_SECONDS",
            0..=86_400,
            recon.timestamp_buffer_seconds,
        );
        recon.timeout_milliseconds = env.ranged(
            "RECONCILIATION_TIMEOUT_MILLISECONDS",
            1000..=120_000,
            recon.timeout_milliseconds,
        );
        recon.max_retries = env.ranged("RECONCILIATION_MAX_RETRIES", 0..=10, recon.max_retries);
        recon.size_tolerance_pct = env.ranged(
            "RECONCILIATION_SIZE_TOLERANCE_PCT",
            dec!(0)..=dec!(50),
            recon.size_tolerance_pct,
        );
        recon.cancel_orphans = env.flag("RECONCILIATION_CANCEL_ORPHANS", recon.cancel_orphans);

        // Database
        if let Some(url) = env.text("DATABASE_URL") {
            config.database.url = url;
        }
        config.database.max_connections = env.ranged(
            "DATABASE_MAX_CONNECTIONS",
            1..=100,
            config.database.max_connections,
        );

        config
    }
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<'a, F: Fn(&str) -> Option<String>> EnvReader<'a, F> {
    fn text(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.text(key) {
            Some(value) => value.to_lowercase() == "true" || value == "1",
            None => default,
        }
    }

    fn ranged<T>(&self, key: &str, range: RangeInclusive<T>, default: T) -> T
    where
        T: FromStr + PartialOrd + Display + Copy,
        T::Err: Display,
    {
        let Some(raw) = self.text(key) else {
            return default;
        };
        match raw.parse::<T>() {
            Ok(value) if range.contains(&value) => value,
            Ok(value) => {
                tracing::warn!(
                    "Invalid {} value: {} (must be between {} and {}), using default: {}",
                    key,
                    value,
                    range.start(),
                    range.end(),
                    default
                );
                default
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to parse {} '{}': {}, using default: {}",
                    key,
                    raw,
                    e,
                    default
                );
                default
            }
        }
    }
}
