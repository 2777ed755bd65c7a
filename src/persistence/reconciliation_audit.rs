//! Reconciliation Audit Repository
//!
//! This repository handles persistence of reconciliation audit trails to the database.

use super::models::ReconciliationAuditRow;
use super::DbPool;
use crate::domain::services::reconciliation::{
    ReconciliationError, ReconciliationReport, RowClassification,
};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error};

/// Reconciliation repository trait
#[async_trait]
pub trait ReconciliationRepository: Send + Sync {
    async fn save_reconciliation(
        &self,
        report: &ReconciliationReport,
    ) -> Result<(), ReconciliationError>;

    async fn get_last_reconciliation(
        &self,
        venue: &str,
    ) -> Result<Option<ReconciliationReport>, ReconciliationError>;

    async fn get_reconciliation_history(
        &self,
        venue: &str,
        days: u32,
    ) -> Result<Vec<ReconciliationReport>, ReconciliationError>;
}

/// SQLite implementation of reconciliation repository
pub struct SqliteReconciliationRepository {
    pool: DbPool,
}

impl SqliteReconciliationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn decode(row: ReconciliationAuditRow) -> Result<ReconciliationReport, ReconciliationError> {
        serde_json::from_str(&row.report_json).map_err(|e| {
            ReconciliationError::Audit(format!("Corrupt audit row {}: {}", row.id, e))
        })
    }
}

#[async_trait]
impl ReconciliationRepository for SqliteReconciliationRepository {
    async fn save_reconciliation(
        &self,
        report: &ReconciliationReport,
    ) -> Result<(), ReconciliationError> {
        let report_json = serde_json::to_string(report)
            .map_err(|e| ReconciliationError::Audit(e.to_string()))?;
        let count = |c: RowClassification| report.count(c) as i64;

        sqlx::query(
            r#"
            INSERT INTO reconciliation_audit (
                venue, reconciliation_timestamp, status,
                consistent_count, drifted_count, orphan_in_ledger_count, orphan_on_venue_count,
                corrections_applied, corrections_skipped, write_failures,
                report_json, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&report.venue)
        .bind(report.timestamp)
        .bind(report.status.to_string())
        .bind(count(RowClassification::Consistent))
        .bind(count(RowClassification::Drifted))
        .bind(count(RowClassification::OrphanInLedger))
        .bind(count(RowClassification::OrphanOnVenue))
        .bind(report.corrections_applied as i64)
        .bind(report.corrections_skipped as i64)
        .bind(report.write_failures as i64)
        .bind(&report_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save reconciliation audit: {}", e);
            ReconciliationError::Audit(format!("Database error: {}", e))
        })?;

        debug!("Saved reconciliation audit for {}", report.venue);
        Ok(())
    }

    async fn get_last_reconciliation(
        &self,
        venue: &str,
    ) -> Result<Option<ReconciliationReport>, ReconciliationError> {
        let row = sqlx::query_as::<_, ReconciliationAuditRow>(
            r#"
            SELECT * FROM reconciliation_audit
            WHERE venue = ?1
            ORDER BY reconciliation_timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(venue)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get last reconciliation for {}: {}", venue, e);
            ReconciliationError::Audit(format!("Database error: {}", e))
        })?;

        row.map(Self::decode).transpose()
    }

    async fn get_reconciliation_history(
        &self,
        venue: &str,
        days: u32,
    ) -> Result<Vec<ReconciliationReport>, ReconciliationError> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);

        let rows = sqlx::query_as::<_, ReconciliationAuditRow>(
            r#"
            SELECT * FROM reconciliation_audit
            WHERE venue = ?1 AND reconciliation_timestamp >= ?2
            ORDER BY reconciliation_timestamp DESC, id DESC
            "#,
        )
        .bind(venue)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get reconciliation history for {}: {}", venue, e);
            ReconciliationError::Audit(format!("Database error: {}", e))
        })?;

        rows.into_iter().map(Self::decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::reconciliation::{ReconciliationStatus, RowOutcome};
    use crate::persistence::init_database;

    fn report(venue: &str, classification: RowClassification) -> ReconciliationReport {
        let mut report = ReconciliationReport::new(venue, Utc::now());
        report.add_outcome(RowOutcome {
            trade_id: Some("t-1".to_string()),
            venue_reference: None,
            symbol: "BTC".to_string(),
            classification,
            explanation: "test".to_string(),
        });
        report.corrections_applied = 1;
        report
    }

    #[tokio::test]
    async fn test_save_and_load_last() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = SqliteReconciliationRepository::new(pool);

        repo.save_reconciliation(&report("hyperliquid", RowClassification::Consistent))
            .await
            .unwrap();
        repo.save_reconciliation(&report("hyperliquid", RowClassification::OrphanInLedger))
            .await
            .unwrap();
        repo.save_reconciliation(&report("binance", RowClassification::Drifted))
            .await
            .unwrap();

        let last = repo.get_last_reconciliation("hyperliquid").await.unwrap().unwrap();
        assert_eq!(last.status, ReconciliationStatus::Critical);
        assert_eq!(last.corrections_applied, 1);

        let history = repo.get_reconciliation_history("hyperliquid", 1).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(repo.get_last_reconciliation("kraken").await.unwrap().is_none());
    }
}
