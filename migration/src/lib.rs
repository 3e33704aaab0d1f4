//! Database migrations for the onboarding service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_onboardings;
mod m2025_01_10_000002_create_cidr_blocks;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_onboardings::Migration),
            Box::new(m2025_01_10_000002_create_cidr_blocks::Migration),
        ]
    }
}
