//! # Tenant Onboarding Service Entry Point

use std::sync::Arc;

use anyhow::Context;
use migration::{Migrator, MigratorTrait};
use onboarding::{
    config::ConfigLoader,
    db, seeds,
    server::{AppState, run_server},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    Migrator::up(&db, None)
        .await
        .context("running database migrations")?;
    seeds::seed_cidr_blocks(&db)
        .await
        .context("seeding CIDR blocks")?;

    let state = AppState::from_config(config, Arc::new(db))?;
    run_server(state).await
}
