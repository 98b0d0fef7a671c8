use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Consignments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Consignments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Consignments::ConsignmentNumber)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Consignments::ArrivalDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Consignments::ProductId).uuid().not_null())
                    .col(ColumnDef::new(Consignments::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(Consignments::CurrentQuantity)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Consignments::Depreciated)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Consignments::TotalPrice)
                            // numeric(19,4) spelled as a custom type: sea-query's
                            // SQLite backend rejects decimal precision above 16.
                            .custom(Alias::new("numeric(19,4)"))
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Consignments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Consignments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Covers the age-then-number scan order used when drawing down stock.
        manager
            .create_index(
                Index::create()
                    .name("idx_consignments_product_fifo")
                    .table(Consignments::Table)
                    .col(Consignments::ProductId)
                    .col(Consignments::ArrivalDate)
                    .col(Consignments::ConsignmentNumber)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_consignments_product_number")
                    .table(Consignments::Table)
                    .col(Consignments::ProductId)
                    .col(Consignments::ConsignmentNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Consignments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Consignments {
    Table,
    Id,
    ConsignmentNumber,
    ArrivalDate,
    ProductId,
    Quantity,
    CurrentQuantity,
    Depreciated,
    TotalPrice,
    CreatedAt,
    UpdatedAt,
}
