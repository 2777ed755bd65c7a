pub mod market_price;
pub mod signal_service;

pub use market_price::MarketPriceCache;
pub use signal_service::{ExecutionPlan, SignalError, SignalService, UpdatePlan};
