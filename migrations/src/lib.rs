pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_products_table;
mod m20240101_000002_create_consignments_table;
mod m20240101_000003_create_invoices_table;
mod m20240101_000004_create_invoice_items_table;
mod m20240101_000005_create_allocations_table;
mod m20240101_000006_create_report_artifacts_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_products_table::Migration),
            Box::new(m20240101_000002_create_consignments_table::Migration),
            Box::new(m20240101_000003_create_invoices_table::Migration),
            Box::new(m20240101_000004_create_invoice_items_table::Migration),
            Box::new(m20240101_000005_create_allocations_table::Migration),
            Box::new(m20240101_000006_create_report_artifacts_table::Migration),
        ]
    }
}
