//! Instance-owned cache of venue market prices.

use crate::config::PricingConfig;
use crate::domain::repositories::venue_client::{VenueClient, VenueError, VenueResult};
use lru::LruCache;
use rust_decimal::Decimal;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct MarketPriceCache {
    venue: Arc<dyn VenueClient>,
    ttl: Duration,
    entries: Mutex<LruCache<String, (Decimal, Instant)>>, // bounded, least recently used evicted first
}

impl MarketPriceCache {
    pub fn new(venue: Arc<dyn VenueClient>, config: &PricingConfig) -> Self {
        let capacity = NonZeroUsize::new(config.price_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            venue,
            ttl: Duration::from_secs(config.price_cache_ttl_seconds),
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn venue_name(&self) -> &str {
        self.venue.name()
    }

    /// Cached price when younger than the TTL, otherwise a fresh venue read
    pub async fn current_price(&self, symbol: &str) -> VenueResult<Decimal> {
        let key = symbol.to_uppercase();
        {
            let mut entries = self.entries.lock().await;
            if let Some((price, fetched_at)) = entries.get(&key) {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(*price);
                }
            }
        }

        let price = self.venue.get_market_price(&key).await?;
        if price <= Decimal::ZERO {
            return Err(VenueError::QueryFailed(format!(
                "non-positive market price {} for {}",
                price, key
            )));
        }

        debug!("Fetched market price {} for {} from {}", price, key, self.venue.name());
        self.entries.lock().await.put(key, (price, Instant::now()));
        Ok(price)
    }

    pub async fn invalidate(&self, symbol: &str) {
        self.entries.lock().await.pop(&symbol.to_uppercase());
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
