//! Venue Client Trait
//!
//! This module defines the `VenueClient` trait, the interface the engine
//! expects from an exchange connector. Concrete REST/WS clients live outside
//! this crate; reconciliation and price resolution only use the read
//! operations, while `place_order`/`cancel_order` are driven by the
//! execution collaborator (and by reconciliation for orphan cleanup when
//! explicitly enabled).

use crate::domain::entities::order::OrderRequest;
use crate::domain::entities::venue::{Execution, VenueOrder, VenuePosition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Common result type for venue operations
pub type VenueResult<T> = Result<T, VenueError>;

/// Errors that can occur during venue operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VenueError {
    #[error("Order placement failed: {0}")]
    OrderPlacementFailed(String),

    #[error("Order cancellation failed: {0}")]
    OrderCancellationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Rate limited")]
    RateLimited,
}

impl VenueError {
    /// Check if this error is recoverable (retrying might help)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VenueError::NetworkError(_) | VenueError::RateLimited | VenueError::QueryFailed(_)
        )
    }
}

/// Venue client trait providing the operations the engine consumes
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Get the name of this venue
    fn name(&self) -> &str;

    /// Orders currently resting on the venue
    async fn get_open_orders(&self) -> VenueResult<Vec<VenueOrder>>;

    /// Look up a single order by venue ID, including closed ones
    async fn get_order(&self, order_id: &str) -> VenueResult<Option<VenueOrder>>;

    /// Open positions
    async fn get_positions(&self) -> VenueResult<Vec<VenuePosition>>;

    /// Fills for `symbol` between `start` and `end` (inclusive)
    async fn get_executions(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> VenueResult<Vec<Execution>>;

    /// Last traded price
    async fn get_market_price(&self, symbol: &str) -> VenueResult<Decimal>;

    /// Place an order, returning the venue-assigned order ID
    async fn place_order(&self, order: &OrderRequest) -> VenueResult<String>;

    /// Cancel an order on the venue
    async fn cancel_order(&self, order_id: &str) -> VenueResult<()>;

    /// Check if the venue client is healthy and connected
    async fn is_healthy(&self) -> bool {
        // Default implementation - can be overridden
        true
    }
}
