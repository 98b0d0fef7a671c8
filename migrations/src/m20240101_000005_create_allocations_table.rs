use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Allocations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Allocations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Allocations::InvoiceItemId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Allocations::ConsignmentId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Allocations::Units).integer().not_null())
                    .col(
                        ColumnDef::new(Allocations::CreatedAt)
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
                    .name("idx_allocations_invoice_item")
                    .table(Allocations::Table)
                    .col(Allocations::InvoiceItemId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_allocations_consignment")
                    .table(Allocations::Table)
                    .col(Allocations::ConsignmentId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Allocations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Allocations {
    Table,
    Id,
    InvoiceItemId,
    ConsignmentId,
    Units,
    CreatedAt,
}
