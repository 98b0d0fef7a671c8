use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Exclusive right to mutate one product's ledger rows. Dropping the
/// permit releases the product.
pub struct ProductPermit {
    product_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl ProductPermit {
    pub fn product_id(&self) -> Uuid {
        self.product_id
    }
}

/// Strategy seam for serializing ledger mutations per product.
///
/// Every mutation of a product's consignments must run under a permit
/// for that product. Callers that need several products at once must
/// acquire permits in ascending product id order or risk deadlock.
#[async_trait]
pub trait ProductSerializer: Send + Sync {
    /// Waits for exclusive access to the product. Fails without waiting
    /// when the product is quarantined.
    async fn acquire(&self, product_id: Uuid) -> Result<ProductPermit, ServiceError>;

    /// Marks the product as quarantined. Subsequent `acquire` calls fail
    /// until the process restarts; there is deliberately no unquarantine,
    /// a drifted ledger needs an operator, not a retry loop.
    fn quarantine(&self, product_id: Uuid, reason: &str);

    fn is_quarantined(&self, product_id: Uuid) -> bool;
}

/// In-process lock table, one fair mutex per product id.
#[derive(Debug, Default)]
pub struct ProductLockRegistry {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    quarantined: DashMap<Uuid, String>,
}

impl ProductLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductSerializer for ProductLockRegistry {
    async fn acquire(&self, product_id: Uuid) -> Result<ProductPermit, ServiceError> {
        if let Some(entry) = self.quarantined.get(&product_id) {
            return Err(quarantined_error(product_id, entry.value()));
        }

        let lock = self.locks.entry(product_id).or_default().clone();
        let guard = lock.lock_owned().await;

        // The fault may have been raised while we were parked on the lock.
        if let Some(entry) = self.quarantined.get(&product_id) {
            return Err(quarantined_error(product_id, entry.value()));
        }

        Ok(ProductPermit {
            product_id,
            _guard: guard,
        })
    }

    fn quarantine(&self, product_id: Uuid, reason: &str) {
        self.quarantined.insert(product_id, reason.to_string());
    }

    fn is_quarantined(&self, product_id: Uuid) -> bool {
        self.quarantined.contains_key(&product_id)
    }
}

fn quarantined_error(product_id: Uuid, reason: &str) -> ServiceError {
    ServiceError::IntegrityFault(format!(
        "product {} is quarantined: {}",
        product_id, reason
    ))
}
