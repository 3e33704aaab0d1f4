//! CIDR block repository for database operations

use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set,
};
use uuid::Uuid;

use crate::models::cidr_block::{ActiveModel, Column, Entity as CidrBlock, Model};

/// Repository for the CIDR block pool
#[derive(Debug, Clone)]
pub struct CidrBlockRepository {
    db: Arc<DatabaseConnection>,
}

impl CidrBlockRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Every block in the pool, ordered by address text.
    pub async fn all(&self) -> Result<Vec<Model>, DbErr> {
        CidrBlock::find()
            .order_by_asc(Column::CidrBlock)
            .all(&*self.db)
            .await
    }

    pub async fn count(&self) -> Result<u64, DbErr> {
        CidrBlock::find().count(&*self.db).await
    }

    pub async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Option<Model>, DbErr> {
        CidrBlock::find()
            .filter(Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await
    }

    /// Assigns `block` to `tenant_id` only while the block is still free.
    /// Returns whether this call won the block.
    pub async fn claim(&self, block: &str, tenant_id: Uuid) -> Result<bool, DbErr> {
        let result = CidrBlock::update_many()
            .col_expr(Column::TenantId, Expr::value(tenant_id))
            .filter(Column::CidrBlock.eq(block))
            .filter(Column::TenantId.is_null())
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Inserts free blocks.
    pub async fn insert_free<I>(&self, blocks: I) -> Result<(), DbErr>
    where
        I: IntoIterator<Item = String>,
    {
        let models: Vec<ActiveModel> = blocks
            .into_iter()
            .map(|block| ActiveModel {
                cidr_block: Set(block),
                tenant_id: Set(None),
            })
            .collect();
        if models.is_empty() {
            return Ok(());
        }

        CidrBlock::insert_many(models).exec(&*self.db).await?;
        Ok(())
    }
}
