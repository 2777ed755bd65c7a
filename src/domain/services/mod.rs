pub mod cooldown;
pub mod intent_parser;
pub mod price_resolver;
pub mod reconciliation;
pub mod signal_validator;
pub mod symbol_extractor;
pub mod update_mapper;

pub use cooldown::CooldownGate;
pub use intent_parser::IntentParser;
pub use price_resolver::PriceResolver;
pub use reconciliation::ReconciliationEngine;
pub use signal_validator::SignalValidator;
pub use symbol_extractor::SymbolExtractor;
pub use update_mapper::UpdateActionMapper;
