//! Trade ledger repository
//!
//! SQLite implementation of [`LedgerStore`]. Corrections are written with a
//! compare-and-set on `(status, updated_at)` so a stale or repeated
//! correction never overwrites a row that changed in the meantime.

use super::models::TradeRow;
use super::DbPool;
use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::domain::repositories::ledger_store::{
    LedgerError, LedgerResult, LedgerStore, TradeCorrection,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

fn storage_error(context: &str, e: sqlx::Error) -> LedgerError {
    error!("{}: {}", context, e);
    LedgerError::Storage(format!("{}: {}", context, e))
}

pub struct SqliteLedgerStore {
    pool: DbPool,
}

impl SqliteLedgerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn into_trades(rows: Vec<TradeRow>) -> LedgerResult<Vec<Trade>> {
        rows.into_iter().map(Trade::try_from).collect()
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn insert(&self, trade: &Trade) -> LedgerResult<()> {
        let row = TradeRow::from_trade(trade)?;
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, exchange_order_id, client_order_id, coin_symbol, position_type,
                status, entry_price, exit_price, position_size, created_at,
                updated_at, sync_issues, manual_verification_needed
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&row.id)
        .bind(&row.exchange_order_id)
        .bind(&row.client_order_id)
        .bind(&row.coin_symbol)
        .bind(&row.position_type)
        .bind(&row.status)
        .bind(&row.entry_price)
        .bind(&row.exit_price)
        .bind(&row.position_size)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(&row.sync_issues)
        .bind(row.manual_verification_needed)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to insert trade", e))?;

        debug!("Inserted trade {} ({} {})", row.id, row.status, row.coin_symbol);
        Ok(())
    }

    async fn get(&self, id: &str) -> LedgerResult<Option<Trade>> {
        let row = sqlx::query_as::<_, TradeRow>("SELECT * FROM trades WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to get trade", e))?;

        row.map(Trade::try_from).transpose()
    }

    async fn list_by_status(&self, statuses: &[TradeStatus]) -> LedgerResult<Vec<Trade>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT * FROM trades WHERE status IN ({}) ORDER BY created_at ASC, id ASC",
            placeholders
        );

        let mut query = sqlx::query_as::<_, TradeRow>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to list trades by status", e))?;

        Self::into_trades(rows)
    }

    async fn list_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> LedgerResult<Vec<Trade>> {
        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT * FROM trades
            WHERE created_at >= ?1 AND created_at <= ?2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to list trades by time range", e))?;

        Self::into_trades(rows)
    }

    async fn apply_correction(&self, correction: &TradeCorrection) -> LedgerResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin transaction", e))?;

        let row = sqlx::query_as::<_, TradeRow>("SELECT * FROM trades WHERE id = ?1")
            .bind(&correction.trade_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| storage_error("Failed to read trade for correction", e))?
            .ok_or_else(|| LedgerError::NotFound(correction.trade_id.clone()))?;
        let mut trade = Trade::try_from(row)?;

        if trade.status != correction.expected_status
            || trade.updated_at != correction.expected_updated_at
        {
            debug!(
                "Trade {} changed since correction was computed ({} / {}), skipping",
                trade.id, trade.status, trade.updated_at
            );
            return Ok(false);
        }

        correction.apply_to(&mut trade, Utc::now());
        let updated = TradeRow::from_trade(&trade)?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE trades
            SET status = ?1, exchange_order_id = ?2, entry_price = ?3, exit_price = ?4,
                position_size = ?5, sync_issues = ?6, manual_verification_needed = ?7,
                updated_at = ?8
            WHERE id = ?9 AND status = ?10 AND updated_at = ?11
            "#,
        )
        .bind(&updated.status)
        .bind(&updated.exchange_order_id)
        .bind(&updated.entry_price)
        .bind(&updated.exit_price)
        .bind(&updated.position_size)
        .bind(&updated.sync_issues)
        .bind(updated.manual_verification_needed)
        .bind(updated.updated_at)
        .bind(&updated.id)
        .bind(correction.expected_status.as_str())
        .bind(correction.expected_updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error("Failed to apply correction", e))?
        .rows_affected();

        if rows_affected == 0 {
            return Ok(false);
        }

        tx.commit()
            .await
            .map_err(|e| storage_error("Failed to commit correction", e))?;

        info!(
            "Corrected trade {}: {} -> {} ({})",
            trade.id, correction.expected_status, trade.status, correction.reason
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::intent::PositionType;
    use crate::persistence::init_database;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    async fn store() -> SqliteLedgerStore {
        let pool = init_database("sqlite::memory:").await.unwrap();
        SqliteLedgerStore::new(pool)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = store().await;
        let trade = Trade::pending("t-1", "BTC", PositionType::Long, dec!(0.25))
            .with_exchange_order_id("o-1");
        store.insert(&trade).await.unwrap();

        let loaded = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(loaded, trade);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_status_and_time_range() {
        let store = store().await;
        let mut old = Trade::pending("t-old", "ETH", PositionType::Long, dec!(1))
            .with_status(TradeStatus::Closed);
        old.created_at = old.created_at - Duration::days(3);
        let open = Trade::pending("t-open", "SOL", PositionType::Short, dec!(5))
            .with_status(TradeStatus::Open);
        let pending = Trade::pending("t-pending", "BTC", PositionType::Long, dec!(1));
        for trade in [&old, &open, &pending] {
            store.insert(trade).await.unwrap();
        }

        let active = store.list_by_status(&TradeStatus::active()).await.unwrap();
        let ids: Vec<&str> = active.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(active.len(), 2);
        assert!(ids.contains(&"t-open") && ids.contains(&"t-pending"));
        assert!(store.list_by_status(&[]).await.unwrap().is_empty());

        let recent = store
            .list_created_between(Utc::now() - Duration::days(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn test_apply_correction_is_guarded() {
        let store = store().await;
        let trade = Trade::pending("t-1", "BTC", PositionType::Long, dec!(1));
        store.insert(&trade).await.unwrap();

        let stored = store.get("t-1").await.unwrap().unwrap();
        let correction = TradeCorrection::for_trade(&stored, "venue order FILLED")
            .status(TradeStatus::Open)
            .fill(dec!(50000), dec!(1))
            .flag("entry price from venue");

        assert!(store.apply_correction(&correction).await.unwrap());
        // Same correction again: the row moved on, nothing is written
        assert!(!store.apply_correction(&correction).await.unwrap());

        let updated = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(updated.status, TradeStatus::Open);
        assert_eq!(updated.entry_price, Some(dec!(50000)));
        assert!(updated.manual_verification_needed);
        assert_eq!(updated.sync_issues.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_correction_unknown_trade() {
        let store = store().await;
        let ghost = Trade::pending("ghost", "BTC", PositionType::Long, dec!(1));
        let correction = TradeCorrection::for_trade(&ghost, "x").status(TradeStatus::Open);

        assert!(matches!(
            store.apply_correction(&correction).await,
            Err(LedgerError::NotFound(id)) if id == "ghost"
        ));
    }
}
