//! CIDR block seeding
//!
//! Fills an empty pool with the 256 `10.x.0.0` blocks tenant VPCs draw from.

use anyhow::Result;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::repositories::CidrBlockRepository;

/// Number of /16 blocks in the `10.0.0.0/8` range.
pub const CIDR_BLOCK_COUNT: u16 = 256;

/// Seeds the cidr_blocks table when it is empty.
///
/// Returns the number of blocks inserted, which is zero when the pool already
/// holds data.
pub async fn seed_cidr_blocks(db: &DatabaseConnection) -> Result<u64> {
    let repo = CidrBlockRepository::new(Arc::new(db.clone()));

    let existing = repo.count().await?;
    if existing > 0 {
        log::info!("CIDR pool already holds {} blocks, skipping seed", existing);
        return Ok(0);
    }

    repo.insert_free((0..CIDR_BLOCK_COUNT).map(|octet| format!("10.{octet}.0.0")))
        .await?;
    log::info!("Seeded {} CIDR blocks", CIDR_BLOCK_COUNT);

    Ok(u64::from(CIDR_BLOCK_COUNT))
}
