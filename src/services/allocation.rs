use crate::{
    db::DbPool,
    entities::consignment::{self, Entity as Consignment},
    errors::ServiceError,
    events::{Event, EventSender},
    product_lock::ProductSerializer,
    services::catalog::{fifo_consignments, find_product, recompute_product_quantity},
};
use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

lazy_static! {
    static ref STOCK_ALLOCATIONS: IntCounter = register_int_counter!(
        "stock_allocations_total",
        "Total number of stock allocations"
    )
    .expect("metric can be created");
    static ref STOCK_ALLOCATION_FAILURES: IntCounterVec = register_int_counter_vec!(
        "stock_allocation_failures_total",
        "Total number of failed stock allocations",
        &["error_type"]
    )
    .expect("metric can be created");
    static ref ALLOCATION_REVERSALS: IntCounter = register_int_counter!(
        "allocation_reversals_total",
        "Total number of allocation reversals"
    )
    .expect("metric can be created");
}

/// How many units one consignment contributed to an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentDraw {
    pub consignment_id: Uuid,
    pub units: i32,
}

/// Everything needed to undo one allocation exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub product_id: Uuid,
    pub requested: i32,
    pub draws: Vec<ConsignmentDraw>,
}

impl AllocationRecord {
    /// Units drawn across all consignments; equals `requested` for any
    /// record this engine produced.
    pub fn total_units(&self) -> i32 {
        self.draws.iter().map(|d| d.units).sum()
    }
}

/// Result of a successful allocation.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationOutcome {
    pub record: AllocationRecord,
    pub product_quantity: i32,
}

/// Plans which consignments a sale draws from, oldest arrival first,
/// receipt number breaking ties. Depleted batches are skipped. Returns
/// `None` when the product cannot cover the request, in which case
/// nothing may be drawn at all.
///
/// Consignments may be passed in any order; planning sorts internally.
pub fn fifo_plan(
    consignments: &[consignment::Model],
    requested: i32,
) -> Option<Vec<ConsignmentDraw>> {
    if requested <= 0 {
        return Some(Vec::new());
    }

    let mut ordered: Vec<&consignment::Model> = consignments.iter().collect();
    ordered.sort_by(|a, b| {
        a.arrival_date
            .cmp(&b.arrival_date)
            .then(a.consignment_number.cmp(&b.consignment_number))
    });

    let mut remaining = requested;
    let mut draws = Vec::new();
    for batch in ordered {
        if remaining <= 0 {
            break;
        }
        if batch.depreciated || batch.current_quantity <= 0 {
            continue;
        }
        let units = remaining.min(batch.current_quantity);
        draws.push(ConsignmentDraw {
            consignment_id: batch.id,
            units,
        });
        remaining -= units;
    }

    if remaining > 0 {
        None
    } else {
        Some(draws)
    }
}

/// Applies an allocation inside the caller's transaction. The caller
/// must hold the product's permit.
pub(crate) async fn apply_allocation<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<AllocationOutcome, ServiceError> {
    find_product(conn, product_id).await?;

    let consignments = fifo_consignments(conn, product_id).await?;
    let available: i32 = consignments.iter().map(|c| c.current_quantity).sum();

    let draws = fifo_plan(&consignments, quantity).ok_or_else(|| {
        ServiceError::InsufficientStock(format!(
            "product {} has {} units available, requested {}",
            product_id, available, quantity
        ))
    })?;

    for draw in &draws {
        let batch = consignments
            .iter()
            .find(|c| c.id == draw.consignment_id)
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "planned consignment {} vanished from the working set",
                    draw.consignment_id
                ))
            })?;

        let new_current = batch.current_quantity - draw.units;
        let mut active: consignment::ActiveModel = batch.clone().into();
        active.current_quantity = Set(new_current);
        active.depreciated = Set(new_current == 0);
        active.updated_at = Set(Utc::now());
        active.update(conn).await.map_err(ServiceError::db_error)?;
    }

    let product_quantity = recompute_product_quantity(conn, product_id).await?;

    Ok(AllocationOutcome {
        record: AllocationRecord {
            product_id,
            requested: quantity,
            draws,
        },
        product_quantity,
    })
}

/// Puts an allocation's units back inside the caller's transaction. The
/// caller must hold the product's permit.
///
/// A reversal that would push any consignment above its original size
/// means the record was already reversed or the ledger drifted; either
/// way the books cannot be trusted, so the fault is surfaced instead of
/// clamped away.
pub(crate) async fn apply_reverse<C: ConnectionTrait>(
    conn: &C,
    record: &AllocationRecord,
) -> Result<i32, ServiceError> {
    for draw in &record.draws {
        let batch = Consignment::find_by_id(draw.consignment_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::IntegrityFault(format!(
                    "product {}: consignment {} named by the allocation record is missing",
                    record.product_id, draw.consignment_id
                ))
            })?;

        let restored = batch.current_quantity + draw.units;
        if restored > batch.quantity {
            return Err(ServiceError::IntegrityFault(format!(
                "product {}: reversing {} units would put consignment {} at {} of {} originally received",
                record.product_id, draw.units, draw.consignment_id, restored, batch.quantity
            )));
        }

        let mut active: consignment::ActiveModel = batch.into();
        active.current_quantity = Set(restored);
        active.depreciated = Set(restored == 0);
        active.updated_at = Set(Utc::now());
        active.update(conn).await.map_err(ServiceError::db_error)?;
    }

    recompute_product_quantity(conn, record.product_id).await
}

/// FIFO draw-down engine for sale items.
pub struct AllocationService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    locks: Arc<dyn ProductSerializer>,
}

impl AllocationService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        locks: Arc<dyn ProductSerializer>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            locks,
        }
    }

    /// Draws `quantity` units of the product from its oldest
    /// consignments. All-or-nothing: on any failure no consignment is
    /// touched.
    #[instrument(skip(self))]
    pub async fn allocate(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<AllocationOutcome, ServiceError> {
        if quantity <= 0 {
            let err = ServiceError::validation("allocation quantity must be positive");
            STOCK_ALLOCATION_FAILURES
                .with_label_values(&[err.label()])
                .inc();
            return Err(err);
        }

        let _permit = match self.locks.acquire(product_id).await {
            Ok(permit) => permit,
            Err(e) => {
                STOCK_ALLOCATION_FAILURES
                    .with_label_values(&[e.label()])
                    .inc();
                return Err(e);
            }
        };

        let db = self.db_pool.as_ref();
        let result = db
            .transaction::<_, AllocationOutcome, ServiceError>(move |txn| {
                Box::pin(async move { apply_allocation(txn, product_id, quantity).await })
            })
            .await
            .map_err(ServiceError::from);

        match result {
            Ok(outcome) => {
                STOCK_ALLOCATIONS.inc();
                info!(
                    product_id = %product_id,
                    quantity,
                    consignments_drawn = outcome.record.draws.len(),
                    product_quantity = outcome.product_quantity,
                    "Allocated stock"
                );

                if let Err(e) = self
                    .event_sender
                    .send(Event::StockAllocated {
                        product_id,
                        quantity,
                        consignments_drawn: outcome.record.draws.len(),
                        product_quantity: outcome.product_quantity,
                    })
                    .await
                {
                    warn!("Failed to send stock allocated event: {}", e);
                }

                Ok(outcome)
            }
            Err(e) => {
                STOCK_ALLOCATION_FAILURES
                    .with_label_values(&[e.label()])
                    .inc();
                Err(e)
            }
        }
    }

    /// Returns the units of a previous allocation to their
    /// consignments. Each record is reversible at most once; a second
    /// attempt trips the overshoot check and quarantines the product.
    #[instrument(skip(self, record), fields(product_id = %record.product_id))]
    pub async fn reverse(&self, record: &AllocationRecord) -> Result<i32, ServiceError> {
        let product_id = record.product_id;
        let _permit = self.locks.acquire(product_id).await?;

        let db = self.db_pool.as_ref();
        let record_for_txn = record.clone();
        let result = db
            .transaction::<_, i32, ServiceError>(move |txn| {
                Box::pin(async move { apply_reverse(txn, &record_for_txn).await })
            })
            .await
            .map_err(ServiceError::from);

        match result {
            Ok(product_quantity) => {
                ALLOCATION_REVERSALS.inc();
                info!(
                    product_id = %product_id,
                    restored = record.total_units(),
                    product_quantity,
                    "Reversed allocation"
                );

                if let Err(e) = self
                    .event_sender
                    .send(Event::AllocationReversed {
                        product_id,
                        quantity: record.total_units(),
                        product_quantity,
                    })
                    .await
                {
                    warn!("Failed to send allocation reversed event: {}", e);
                }

                Ok(product_quantity)
            }
            Err(e) => {
                if e.is_fatal() {
                    self.flag_quarantine(product_id, &e).await;
                }
                Err(e)
            }
        }
    }

    async fn flag_quarantine(&self, product_id: Uuid, err: &ServiceError) {
        let reason = err.to_string();
        self.locks.quarantine(product_id, &reason);
        error!(
            product_id = %product_id,
            "Ledger integrity fault, quarantining product: {}", reason
        );

        if let Err(e) = self
            .event_sender
            .send(Event::ProductQuarantined { product_id, reason })
            .await
        {
            warn!("Failed to send product quarantined event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn batch(number: i32, days_ago: i64, quantity: i32, current: i32) -> consignment::Model {
        let now = Utc::now();
        consignment::Model {
            id: Uuid::new_v4(),
            consignment_number: number,
            arrival_date: now - chrono::Duration::days(days_ago),
            product_id: Uuid::nil(),
            quantity,
            current_quantity: current,
            depreciated: current == 0,
            total_price: dec!(10.00),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn draws_oldest_batches_first() {
        let older = batch(1, 10, 10, 10);
        let newer = batch(2, 1, 5, 5);

        let draws = fifo_plan(&[newer.clone(), older.clone()], 12).unwrap();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].consignment_id, older.id);
        assert_eq!(draws[0].units, 10);
        assert_eq!(draws[1].consignment_id, newer.id);
        assert_eq!(draws[1].units, 2);
    }

    #[test]
    fn equal_arrival_dates_fall_back_to_receipt_order() {
        let now = Utc::now();
        let mut first = batch(1, 0, 5, 5);
        let mut second = batch(2, 0, 5, 5);
        first.arrival_date = now;
        second.arrival_date = now;

        let draws = fifo_plan(&[second.clone(), first.clone()], 6).unwrap();
        assert_eq!(draws[0].consignment_id, first.id);
        assert_eq!(draws[0].units, 5);
        assert_eq!(draws[1].consignment_id, second.id);
        assert_eq!(draws[1].units, 1);
    }

    #[test]
    fn depleted_batches_are_skipped() {
        let depleted = batch(1, 10, 10, 0);
        let live = batch(2, 1, 5, 3);

        let draws = fifo_plan(&[depleted, live.clone()], 2).unwrap();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].consignment_id, live.id);
        assert_eq!(draws[0].units, 2);
    }

    #[test]
    fn exact_fit_consumes_everything() {
        let a = batch(1, 5, 10, 10);
        let b = batch(2, 1, 5, 5);

        let draws = fifo_plan(&[a, b], 15).unwrap();
        let total: i32 = draws.iter().map(|d| d.units).sum();
        assert_eq!(total, 15);
    }

    #[test]
    fn insufficient_stock_plans_nothing() {
        let a = batch(1, 5, 10, 10);
        let b = batch(2, 1, 5, 5);

        assert!(fifo_plan(&[a, b], 16).is_none());
        assert!(fifo_plan(&[], 1).is_none());
    }

    #[test]
    fn non_positive_requests_draw_nothing() {
        let a = batch(1, 5, 10, 10);
        assert_eq!(fifo_plan(&[a.clone()], 0), Some(Vec::new()));
        assert_eq!(fifo_plan(&[a], -3), Some(Vec::new()));
    }

    #[test]
    fn partially_drawn_batch_contributes_its_remainder() {
        let partial = batch(1, 10, 10, 4);
        let fresh = batch(2, 1, 10, 10);

        let draws = fifo_plan(&[fresh.clone(), partial.clone()], 6).unwrap();
        assert_eq!(draws[0].consignment_id, partial.id);
        assert_eq!(draws[0].units, 4);
        assert_eq!(draws[1].consignment_id, fresh.id);
        assert_eq!(draws[1].units, 2);
    }
}
