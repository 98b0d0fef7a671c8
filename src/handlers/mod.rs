pub mod common;
pub mod invoices;
pub mod products;
pub mod reports;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::product_lock::{ProductLockRegistry, ProductSerializer};
use crate::services::{
    AllocationService, CatalogService, IncomeService, InvoiceService, ReportService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub allocation: Arc<AllocationService>,
    pub income: Arc<IncomeService>,
    pub invoices: Arc<InvoiceService>,
    pub reports: Arc<ReportService>,
    /// Shared per-product permit registry; every mutating service above
    /// goes through it.
    pub locks: Arc<dyn ProductSerializer>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        let locks: Arc<dyn ProductSerializer> = Arc::new(ProductLockRegistry::new());

        let catalog = Arc::new(CatalogService::new(db_pool.clone(), event_sender.clone()));
        let allocation = Arc::new(AllocationService::new(
            db_pool.clone(),
            event_sender.clone(),
            locks.clone(),
        ));
        let income = Arc::new(IncomeService::new(
            db_pool.clone(),
            event_sender.clone(),
            locks.clone(),
        ));
        let invoices = Arc::new(InvoiceService::new(
            db_pool.clone(),
            event_sender.clone(),
            allocation.clone(),
            income.clone(),
            locks.clone(),
        ));
        let reports = Arc::new(ReportService::new(db_pool, event_sender));

        Self {
            catalog,
            allocation,
            income,
            invoices,
            reports,
            locks,
        }
    }
}
