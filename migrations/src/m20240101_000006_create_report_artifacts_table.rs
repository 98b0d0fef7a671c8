use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReportArtifacts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReportArtifacts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReportArtifacts::ReportType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReportArtifacts::Sequence)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReportArtifacts::FileName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReportArtifacts::PeriodStart)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReportArtifacts::PeriodEnd)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReportArtifacts::AsOf)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReportArtifacts::InvoiceCount)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReportArtifacts::TotalPrice)
                            // numeric(19,4) spelled as a custom type: sea-query's
                            // SQLite backend rejects decimal precision above 16.
                            .custom(Alias::new("numeric(19,4)"))
                            .null(),
                    )
                    .col(ColumnDef::new(ReportArtifacts::LineCount).integer().null())
                    .col(
                        ColumnDef::new(ReportArtifacts::GeneratedAt)
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
                    .name("idx_report_artifacts_type_sequence")
                    .table(ReportArtifacts::Table)
                    .col(ReportArtifacts::ReportType)
                    .col(ReportArtifacts::Sequence)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReportArtifacts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum ReportArtifacts {
    Table,
    Id,
    ReportType,
    Sequence,
    FileName,
    PeriodStart,
    PeriodEnd,
    AsOf,
    InvoiceCount,
    TotalPrice,
    LineCount,
    GeneratedAt,
}
