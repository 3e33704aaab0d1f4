//! Database pool management for the onboarding store.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

const CONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Connects to the configured database, retrying transient failures with
/// exponential backoff.
///
/// ```no_run
/// use onboarding::{config::ConfigLoader, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ConfigLoader::new().load()?;
///     let db = init_pool(&config).await?;
///     onboarding::db::health_check(&db).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.trim().is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let mut retry_delay = Duration::from_millis(100);
    let mut attempt = 1;
    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("Connected to onboarding database (attempt {attempt})");
                return Ok(conn);
            }
            Err(e) if attempt >= CONNECT_ATTEMPTS => {
                log::error!("Failed to connect to database after {attempt} attempts: {e}");
                return Err(DatabaseError::ConnectionFailed { source: e }.into());
            }
            Err(e) => {
                log::warn!(
                    "Database connection attempt {attempt} failed: {e}, retrying in {retry_delay:?}"
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Runs `SELECT 1` against the pool.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt)
        .await
        .context("Database health check failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blank_database_url_is_rejected() {
        let config = AppConfig {
            database_url: "  ".to_string(),
            ..Default::default()
        };

        let err = init_pool(&config).await.unwrap_err();
        assert!(matches!(
            err.downcast::<DatabaseError>(),
            Ok(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn health_check_passes_on_sqlite() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            ..Default::default()
        };

        let db = init_pool(&config).await.unwrap();
        health_check(&db).await.unwrap();
    }
}
