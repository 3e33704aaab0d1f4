//! Migration to create the onboardings table.
//!
//! One row per onboarding request. The status column holds the lowercase
//! lifecycle state; `stack_id` is written at most once by the service.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Onboardings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Onboardings::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Onboardings::Status)
                            .text()
                            .not_null()
                            .default("created"),
                    )
                    .col(ColumnDef::new(Onboardings::TenantId).uuid().null())
                    .col(ColumnDef::new(Onboardings::TenantName).text().null())
                    .col(ColumnDef::new(Onboardings::Tier).text().null())
                    .col(ColumnDef::new(Onboardings::Subdomain).text().null())
                    .col(ColumnDef::new(Onboardings::StackId).text().null())
                    .col(ColumnDef::new(Onboardings::ZipFileUrl).text().null())
                    .col(
                        ColumnDef::new(Onboardings::Created)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Onboardings::Modified)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_onboardings_tenant_id")
                    .table(Onboardings::Table)
                    .col(Onboardings::TenantId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_onboardings_tenant_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Onboardings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Onboardings {
    Table,
    Id,
    Status,
    TenantId,
    TenantName,
    Tier,
    Subdomain,
    StackId,
    ZipFileUrl,
    Created,
    Modified,
}
