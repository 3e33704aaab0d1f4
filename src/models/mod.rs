//! # Data Models
//!
//! SeaORM entities persisted by the onboarding service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod cidr_block;
pub mod onboarding;

pub use cidr_block::Entity as CidrBlock;
pub use onboarding::Entity as Onboarding;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "tenant-onboarding".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
