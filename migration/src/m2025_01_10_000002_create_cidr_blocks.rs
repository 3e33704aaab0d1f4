//! Migration to create the cidr_blocks table.
//!
//! Each row is one /16 block available to tenant VPCs. A unique index on
//! `tenant_id` keeps a tenant from holding more than one block.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CidrBlocks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CidrBlocks::CidrBlock)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CidrBlocks::TenantId).uuid().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cidr_blocks_tenant_id_unique")
                    .table(CidrBlocks::Table)
                    .col(CidrBlocks::TenantId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_cidr_blocks_tenant_id_unique")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(CidrBlocks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CidrBlocks {
    Table,
    CidrBlock,
    TenantId,
}
