//! Onboarding entity model
//!
//! One row per tenant onboarding request, tracking the request attributes,
//! the provisioning stack and the lifecycle status.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};

use crate::status::OnboardingStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "onboardings")]
pub struct Model {
    /// Store-generated identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub status: OnboardingStatus,

    /// Set once the tenant record exists in the registry
    pub tenant_id: Option<Uuid>,

    pub tenant_name: Option<String>,
    pub tier: Option<String>,
    pub subdomain: Option<String>,

    /// Provisioning engine stack identifier; written at most once
    pub stack_id: Option<String>,

    /// Pre-signed upload URL for the optional configuration bundle
    pub zip_file_url: Option<String>,

    pub created: DateTimeWithTimeZone,
    pub modified: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
