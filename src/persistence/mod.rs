//! Persistence Layer
//!
//! SQLite-backed reference adapters for the trade ledger and the
//! reconciliation audit trail, using async operations via sqlx.
//!
//! # Database Schema
//!
//! ## Trades Table
//! - id: Ledger ID
//! - exchange_order_id / client_order_id: Venue identity, when known
//! - coin_symbol: Base symbol (e.g., "BTC")
//! - position_type: "LONG" or "SHORT"
//! - status: PENDING, OPEN, PARTIALLY_CLOSED, CLOSED, FAILED, CANCELLED
//! - entry_price / exit_price / position_size: Decimal as TEXT
//! - sync_issues: JSON array of strings
//! - manual_verification_needed: Boolean
//! - created_at / updated_at: Timestamps; `(status, updated_at)` guards writes
//!
//! ## Reconciliation Audit Table
//! - id: Serial
//! - venue, reconciliation_timestamp, status
//! - counts per classification and per write outcome
//! - report_json: Full report

pub mod models;
pub mod reconciliation_audit;
pub mod repository;

use crate::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub use reconciliation_audit::{ReconciliationRepository, SqliteReconciliationRepository};
pub use repository::SqliteLedgerStore;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

/// Initialize the database connection pool with default pool settings
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    init_database_with(&DatabaseConfig {
        url: database_url.to_string(),
        ..Default::default()
    })
    .await
}

/// Initialize the database connection pool
///
/// In-memory URLs get a single connection: every SQLite connection to
/// `:memory:` opens its own, empty database.
///
/// # Errors
/// Returns error if database connection fails or migrations fail
pub async fn init_database_with(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    let database_url = config.url.as_str();
    info!("Initializing database: {}", database_url);

    let in_memory = database_url.contains(":memory:");

    // Ensure data directory exists
    if !in_memory {
        if let Some(db_path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let max_connections = if in_memory { 1 } else { config.max_connections.max(1) };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized ({} connection(s))", max_connections);
    Ok(pool)
}

/// Run database migrations; safe to run repeatedly
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id TEXT PRIMARY KEY,
            exchange_order_id TEXT,
            client_order_id TEXT,
            coin_symbol TEXT NOT NULL,
            position_type TEXT NOT NULL CHECK(position_type IN ('LONG', 'SHORT')),
            status TEXT NOT NULL CHECK(status IN (
                'PENDING', 'OPEN', 'PARTIALLY_CLOSED', 'CLOSED', 'FAILED', 'CANCELLED'
            )),
            entry_price TEXT,
            exit_price TEXT,
            position_size TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            sync_issues TEXT NOT NULL DEFAULT '[]',
            manual_verification_needed BOOLEAN NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create trades table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconciliation_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            venue TEXT NOT NULL,
            reconciliation_timestamp DATETIME NOT NULL,
            status TEXT NOT NULL,
            consistent_count INTEGER NOT NULL,
            drifted_count INTEGER NOT NULL,
            orphan_in_ledger_count INTEGER NOT NULL,
            orphan_on_venue_count INTEGER NOT NULL,
            corrections_applied INTEGER NOT NULL,
            corrections_skipped INTEGER NOT NULL,
            write_failures INTEGER NOT NULL,
            report_json TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!(
            "Failed to create reconciliation_audit table: {}",
            e
        ))
    })?;

    // Create indexes for better query performance
    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status)",
        "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(coin_symbol)",
        "CREATE INDEX IF NOT EXISTS idx_trades_created_at ON trades(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_audit_venue_time ON reconciliation_audit(venue, reconciliation_timestamp)",
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    info!("Database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database("sqlite::memory:").await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations() {
        let pool = init_database("sqlite::memory:").await.unwrap();

        // Verify tables exist
        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('trades', 'reconciliation_audit')"
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(result.0, 2);

        // Idempotent
        run_migrations(&pool).await.unwrap();
    }
}
