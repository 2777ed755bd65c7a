use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural or numeric invariant violated by a parsed intent
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid value '{value}' for {field}")]
    InvalidEnum { field: String, value: String },

    #[error("{field} must be strictly positive, got {value}")]
    NonPositiveNumber { field: String, value: Decimal },

    #[error("{field} must contain at least one value")]
    EmptyRequiredList { field: String },

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Missing field: {0}")]
    MissingField(String),
}

impl From<ValidationError> for String {
    fn from(error: ValidationError) -> Self {
        error.to_string()
    }
}

/// Why a signal could not be turned into an intent
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Ambiguous symbol: candidates {candidates:?}")]
    AmbiguousSymbol { candidates: Vec<String> },

    #[error("Missing required field: {field}")]
    MissingRequiredField { field: String },

    #[error("Intent capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Confidence {confidence:.2} below threshold {threshold:.2}")]
    LowConfidence { confidence: f64, threshold: f64 },

    #[error("Invalid intent: {0}")]
    Invalid(#[from] ValidationError),
}

impl ParseError {
    pub fn missing(field: &str) -> Self {
        ParseError::MissingRequiredField {
            field: field.to_string(),
        }
    }

    /// Get a short error code for logging/monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            ParseError::AmbiguousSymbol { .. } => "ERR_AMBIGUOUS_SYMBOL",
            ParseError::MissingRequiredField { .. } => "ERR_MISSING_FIELD",
            ParseError::CapabilityUnavailable(_) => "ERR_CAPABILITY_UNAVAILABLE",
            ParseError::LowConfidence { .. } => "ERR_LOW_CONFIDENCE",
            ParseError::Invalid(_) => "ERR_INVALID_INTENT",
        }
    }
}

/// Failure of the AI completion capability.
///
/// Never fatal: the parser treats every variant as a reason to use the
/// deterministic rule table instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("Capability not configured")]
    NotConfigured,

    #[error("Capability timed out after {0}ms")]
    Timeout(u64),

    #[error("Capability transport error: {0}")]
    Transport(String),

    #[error("Capability returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Capability response violates contract: {0}")]
    Schema(String),
}

impl From<CapabilityError> for ParseError {
    fn from(error: CapabilityError) -> Self {
        ParseError::CapabilityUnavailable(error.to_string())
    }
}

/// Discrepancy between ledger and venue that reconciliation cannot resolve
/// on its own. The display text is what ends up in a trade's `sync_issues`.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReconciliationConflict {
    #[error("Orphan on venue: {kind} {reference} ({symbol}) has no ledger row")]
    OrphanOnVenue {
        kind: String,
        reference: String,
        symbol: String,
    },

    #[error("Orphan in ledger: {detail}")]
    OrphanInLedger { trade_id: String, detail: String },

    #[error("Ambiguous attribution: {detail}")]
    AmbiguousAttribution { trade_id: String, detail: String },
}

impl ReconciliationConflict {
    pub fn error_code(&self) -> &'static str {
        match self {
            ReconciliationConflict::OrphanOnVenue { .. } => "ERR_ORPHAN_ON_VENUE",
            ReconciliationConflict::OrphanInLedger { .. } => "ERR_ORPHAN_IN_LEDGER",
            ReconciliationConflict::AmbiguousAttribution { .. } => "ERR_AMBIGUOUS_ATTRIBUTION",
        }
    }
}
