//! Onboarding repository for database operations
//!
//! Owns identity and timestamp semantics for onboarding records: ids are
//! generated here on insert, `created` is written once, and every write
//! refreshes `modified`. `stack_id` is set through a conditional write so it
//! can never be reassigned.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::models::onboarding::{self, ActiveModel, Column, Entity as Onboarding, Model};
use crate::status::OnboardingStatus;

/// Attributes of a new onboarding request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewOnboarding {
    pub tenant_name: String,
    pub tier: Option<String>,
    pub subdomain: Option<String>,
}

/// Repository for onboarding records
#[derive(Debug, Clone)]
pub struct OnboardingRepository {
    db: Arc<DatabaseConnection>,
}

impl OnboardingRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts a new record in `created` with a fresh id.
    pub async fn insert(&self, new: NewOnboarding) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let record = ActiveModel {
            id: Set(Uuid::new_v4()),
            status: Set(OnboardingStatus::Created),
            tenant_id: Set(None),
            tenant_name: Set(Some(new.tenant_name)),
            tier: Set(new.tier),
            subdomain: Set(new.subdomain),
            stack_id: Set(None),
            zip_file_url: Set(None),
            created: Set(now),
            modified: Set(now),
        };

        let inserted = record.insert(&*self.db).await?;
        tracing::info!(onboarding_id = %inserted.id, "Onboarding record created");
        Ok(inserted)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Onboarding::find_by_id(id).one(&*self.db).await
    }

    /// All records, oldest first.
    pub async fn list(&self) -> Result<Vec<Model>, DbErr> {
        Onboarding::find()
            .order_by_asc(Column::Created)
            .all(&*self.db)
            .await
    }

    /// Most recent record for a tenant.
    pub async fn find_by_tenant_id(&self, tenant_id: Uuid) -> Result<Option<Model>, DbErr> {
        Onboarding::find()
            .filter(Column::TenantId.eq(tenant_id))
            .order_by_desc(Column::Created)
            .one(&*self.db)
            .await
    }

    /// Records whose tenant id starts with `prefix` (case-insensitive).
    pub async fn find_by_tenant_prefix(&self, prefix: &str) -> Result<Vec<Model>, DbErr> {
        let prefix = prefix.to_ascii_lowercase();
        let records = Onboarding::find()
            .filter(Column::TenantId.is_not_null())
            .order_by_asc(Column::Created)
            .all(&*self.db)
            .await?;

        Ok(records
            .into_iter()
            .filter(|record| {
                record
                    .tenant_id
                    .is_some_and(|tenant_id| tenant_id.to_string().starts_with(&prefix))
            })
            .collect())
    }

    /// Writes `status` unconditionally. Returns `None` when the record is gone.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: OnboardingStatus,
    ) -> Result<Option<Model>, DbErr> {
        let Some(record) = self.get(id).await? else {
            return Ok(None);
        };

        let mut active: ActiveModel = record.into();
        active.status = Set(status);
        active.modified = Set(Utc::now().fixed_offset());
        let updated = active.update(&*self.db).await?;

        tracing::debug!(onboarding_id = %id, status = %status, "Onboarding status written");
        Ok(Some(updated))
    }

    /// Moves `id` from `current` to `next` only if no other writer changed the
    /// status in between. Returns whether the write happened.
    pub async fn compare_and_set_status(
        &self,
        id: Uuid,
        current: OnboardingStatus,
        next: OnboardingStatus,
    ) -> Result<bool, DbErr> {
        let result = Onboarding::update_many()
            .col_expr(Column::Status, Expr::value(next))
            .col_expr(Column::Modified, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(current))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Moves `id` to `failed` unless the record has already been deleted.
    /// Returns whether the write happened.
    pub async fn mark_failed(&self, id: Uuid) -> Result<bool, DbErr> {
        let result = Onboarding::update_many()
            .col_expr(Column::Status, Expr::value(OnboardingStatus::Failed))
            .col_expr(Column::Modified, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.ne(OnboardingStatus::Deleted))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Records the stack id if none is set yet. Returns whether it was written.
    pub async fn set_stack_id(&self, id: Uuid, stack_id: &str) -> Result<bool, DbErr> {
        let result = Onboarding::update_many()
            .col_expr(Column::StackId, Expr::value(stack_id))
            .col_expr(Column::Modified, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::StackId.is_null())
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            tracing::warn!(onboarding_id = %id, stack_id, "Stack id already recorded; keeping original");
        }
        Ok(result.rows_affected == 1)
    }

    pub async fn set_tenant(
        &self,
        id: Uuid,
        tenant_id: Uuid,
        tenant_name: Option<String>,
    ) -> Result<Option<Model>, DbErr> {
        let Some(record) = self.get(id).await? else {
            return Ok(None);
        };

        let mut active: ActiveModel = record.into();
        active.tenant_id = Set(Some(tenant_id));
        if tenant_name.is_some() {
            active.tenant_name = Set(tenant_name);
        }
        active.modified = Set(Utc::now().fixed_offset());
        Ok(Some(active.update(&*self.db).await?))
    }

    pub async fn set_zip_file_url(&self, id: Uuid, url: &str) -> Result<Option<Model>, DbErr> {
        let Some(record) = self.get(id).await? else {
            return Ok(None);
        };

        let mut active: ActiveModel = record.into();
        active.zip_file_url = Set(Some(url.to_string()));
        active.modified = Set(Utc::now().fixed_offset());
        Ok(Some(active.update(&*self.db).await?))
    }

    /// Existing subdomains claimed by live records, for collision checks.
    pub async fn subdomain_in_use(&self, subdomain: &str) -> Result<bool, DbErr> {
        let records = Onboarding::find()
            .filter(Column::Subdomain.is_not_null())
            .filter(
                Column::Status
                    .is_not_in([OnboardingStatus::Deleted, OnboardingStatus::Failed]),
            )
            .all(&*self.db)
            .await?;

        Ok(records.iter().any(|record: &onboarding::Model| {
            record
                .subdomain
                .as_deref()
                .is_some_and(|existing| existing.eq_ignore_ascii_case(subdomain))
        }))
    }
}
