use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Invoices::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Invoices::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Invoices::Kind).string_len(16).not_null())
                    .col(ColumnDef::new(Invoices::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Invoices::Date)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Invoices::TotalPrice)
                            // numeric(19,4) spelled as a custom type: sea-query's
                            // SQLite backend rejects decimal precision above 16.
                            .custom(Alias::new("numeric(19,4)"))
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Invoices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Invoices::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Invoices::VoidedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_invoices_kind_date")
                    .table(Invoices::Table)
                    .col(Invoices::Kind)
                    .col(Invoices::Date)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_invoices_status")
                    .table(Invoices::Table)
                    .col(Invoices::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Invoices::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Invoices {
    Table,
    Id,
    Kind,
    Status,
    Date,
    TotalPrice,
    CreatedAt,
    UpdatedAt,
    VoidedAt,
}
