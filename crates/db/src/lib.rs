//! Database layer for the notes service.
//!
//! Entities, migrations and repositories over `PostgreSQL` via sea-orm.

pub mod entities;
pub mod migrations;
pub mod repositories;
pub mod test_utils;

use notes_common::{AppError, AppResult, config::DatabaseConfig};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, SqlErr};
use std::time::Duration;
use tracing::log::LevelFilter;

/// Classify a sea-orm error into the application taxonomy.
#[must_use]
pub fn map_db_err(err: DbErr) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(msg)) => return AppError::DuplicateRecord(msg),
        Some(SqlErr::ForeignKeyConstraintViolation(msg)) => {
            return AppError::ForeignKeyConstraint(msg);
        }
        _ => {}
    }

    match err {
        DbErr::RecordNotFound(msg) => AppError::NotFound(msg),
        DbErr::RecordNotUpdated => AppError::NotFound("No rows were updated".to_string()),
        other => AppError::Database(other.to_string()),
    }
}

/// Delay before reconnect attempt `attempt` (1-based), doubling each time.
#[must_use]
pub fn connect_backoff(initial: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    initial.saturating_mul(factor)
}

/// Initialize the shared connection pool.
///
/// Failed connects are retried with exponential backoff, up to
/// `connect_attempts` tries in total.
pub async fn init(config: &DatabaseConfig) -> AppResult<DatabaseConnection> {
    let mut opt = ConnectOptions::new(&config.url);

    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Debug);

    let max_attempts = config.connect_attempts.max(1);
    let initial = Duration::from_millis(config.connect_backoff_ms);
    let mut attempt = 1;

    loop {
        match Database::connect(opt.clone()).await {
            Ok(db) => {
                tracing::info!(attempt, "Connected to database");
                return Ok(db);
            }
            Err(e) if attempt < max_attempts => {
                let delay = connect_backoff(initial, attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(AppError::Database(format!(
                    "Failed to connect after {max_attempts} attempts: {e}"
                )));
            }
        }
    }
}

/// Run pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> AppResult<()> {
    use sea_orm_migration::MigratorTrait;
    migrations::Migrator::up(db, None)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}
