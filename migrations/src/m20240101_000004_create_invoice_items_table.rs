use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(InvoiceItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InvoiceItems::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(InvoiceItems::InvoiceId).uuid().not_null())
                    .col(
                        ColumnDef::new(InvoiceItems::LineNumber)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(InvoiceItems::ProductId).uuid().not_null())
                    .col(ColumnDef::new(InvoiceItems::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(InvoiceItems::TotalPrice)
                            // numeric(19,4) spelled as a custom type: sea-query's
                            // SQLite backend rejects decimal precision above 16.
                            .custom(Alias::new("numeric(19,4)"))
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InvoiceItems::ArrivalDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(InvoiceItems::ConsignmentId).uuid().null())
                    .col(
                        ColumnDef::new(InvoiceItems::CreatedAt)
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
                    .name("idx_invoice_items_invoice")
                    .table(InvoiceItems::Table)
                    .col(InvoiceItems::InvoiceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_invoice_items_product")
                    .table(InvoiceItems::Table)
                    .col(InvoiceItems::ProductId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(InvoiceItems::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum InvoiceItems {
    Table,
    Id,
    InvoiceId,
    LineNumber,
    ProductId,
    Quantity,
    TotalPrice,
    ArrivalDate,
    ConsignmentId,
    CreatedAt,
}
