// Stock engine
pub mod allocation;
pub mod catalog;
pub mod income;

// Invoice lifecycle over the engine
pub mod invoices;

// Read-side reporting
pub mod reports;

pub use allocation::AllocationService;
pub use catalog::CatalogService;
pub use income::IncomeService;
pub use invoices::InvoiceService;
pub use reports::ReportService;
