use crate::{
    db::DbPool,
    entities::consignment::{self, Entity as Consignment},
    errors::ServiceError,
    events::{Event, EventSender},
    product_lock::ProductSerializer,
    services::catalog::{find_product, recompute_product_quantity},
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

lazy_static! {
    static ref CONSIGNMENTS_RECEIVED: IntCounter = register_int_counter!(
        "consignments_received_total",
        "Total number of consignments received"
    )
    .expect("metric can be created");
    static ref CONSIGNMENTS_REMOVED: IntCounter = register_int_counter!(
        "consignments_removed_total",
        "Total number of consignments removed"
    )
    .expect("metric can be created");
    static ref INCOME_FAILURES: IntCounterVec = register_int_counter_vec!(
        "income_failures_total",
        "Total number of failed income operations",
        &["error_type"]
    )
    .expect("metric can be created");
}

/// A freshly booked consignment together with the product total it
/// produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptOutcome {
    pub consignment: consignment::Model,
    pub product_quantity: i32,
}

/// A removed consignment together with the product total left behind.
#[derive(Debug, Clone, Serialize)]
pub struct RemovalOutcome {
    pub consignment: consignment::Model,
    pub product_quantity: i32,
}

/// Next receipt number for the product, one past the highest among the
/// surviving consignments. Numbers restart at 1 once a product's ledger
/// empties out; new receipts still sort after older same-day survivors
/// because those always carry smaller numbers.
pub(crate) async fn next_consignment_number<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<i32, ServiceError> {
    let latest = Consignment::find()
        .filter(consignment::Column::ProductId.eq(product_id))
        .order_by_desc(consignment::Column::ConsignmentNumber)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(latest.map(|c| c.consignment_number + 1).unwrap_or(1))
}

/// Books a consignment inside the caller's transaction. The caller must
/// hold the product's permit.
pub(crate) async fn apply_receive<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
    arrival_date: DateTime<Utc>,
    total_price: Decimal,
) -> Result<(consignment::Model, i32), ServiceError> {
    find_product(conn, product_id).await?;

    let number = next_consignment_number(conn, product_id).await?;
    let now = Utc::now();
    let consignment = consignment::ActiveModel {
        id: Set(Uuid::new_v4()),
        consignment_number: Set(number),
        arrival_date: Set(arrival_date),
        product_id: Set(product_id),
        quantity: Set(quantity),
        current_quantity: Set(quantity),
        depreciated: Set(false),
        total_price: Set(total_price),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)?;

    let product_quantity = recompute_product_quantity(conn, product_id).await?;
    Ok((consignment, product_quantity))
}

/// Removes a consignment inside the caller's transaction. The caller
/// must hold the product's permit. Refused unless the batch is exactly
/// as received; a partially or fully drawn batch stays on the books
/// untouched.
pub(crate) async fn apply_unreceive<C: ConnectionTrait>(
    conn: &C,
    consignment_id: Uuid,
) -> Result<(consignment::Model, i32), ServiceError> {
    let batch = Consignment::find_by_id(consignment_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::validation(format!("unknown consignment {consignment_id}")))?;

    if !batch.is_untouched() {
        return Err(ServiceError::ConsignmentInUse(format!(
            "consignment {} has {} of {} units left; drawn stock must be returned before removal",
            batch.id, batch.current_quantity, batch.quantity
        )));
    }

    Consignment::delete_by_id(batch.id)
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let product_quantity = recompute_product_quantity(conn, batch.product_id).await?;
    Ok((batch, product_quantity))
}

/// Booking and unbooking of received stock.
pub struct IncomeService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    locks: Arc<dyn ProductSerializer>,
}

impl IncomeService {
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

    /// Books a new consignment of `quantity` units arriving at
    /// `arrival_date`.
    #[instrument(skip(self))]
    pub async fn receive(
        &self,
        product_id: Uuid,
        quantity: i32,
        arrival_date: DateTime<Utc>,
        total_price: Decimal,
    ) -> Result<ReceiptOutcome, ServiceError> {
        if quantity <= 0 {
            let err = ServiceError::validation("consignment quantity must be positive");
            INCOME_FAILURES.with_label_values(&[err.label()]).inc();
            return Err(err);
        }
        if total_price.is_sign_negative() {
            let err = ServiceError::validation("consignment total price cannot be negative");
            INCOME_FAILURES.with_label_values(&[err.label()]).inc();
            return Err(err);
        }

        let _permit = match self.locks.acquire(product_id).await {
            Ok(permit) => permit,
            Err(e) => {
                INCOME_FAILURES.with_label_values(&[e.label()]).inc();
                return Err(e);
            }
        };

        let db = self.db_pool.as_ref();
        let result = db
            .transaction::<_, (consignment::Model, i32), ServiceError>(move |txn| {
                Box::pin(async move {
                    apply_receive(txn, product_id, quantity, arrival_date, total_price).await
                })
            })
            .await
            .map_err(ServiceError::from);

        match result {
            Ok((consignment, product_quantity)) => {
                CONSIGNMENTS_RECEIVED.inc();
                info!(
                    product_id = %product_id,
                    consignment_id = %consignment.id,
                    consignment_number = consignment.consignment_number,
                    quantity,
                    product_quantity,
                    "Received consignment"
                );

                if let Err(e) = self
                    .event_sender
                    .send(Event::ConsignmentReceived {
                        product_id,
                        consignment_id: consignment.id,
                        consignment_number: consignment.consignment_number,
                        quantity,
                    })
                    .await
                {
                    warn!("Failed to send consignment received event: {}", e);
                }

                Ok(ReceiptOutcome {
                    consignment,
                    product_quantity,
                })
            }
            Err(e) => {
                INCOME_FAILURES.with_label_values(&[e.label()]).inc();
                Err(e)
            }
        }
    }

    /// Removes a consignment that has not been drawn from. A batch with
    /// any units allocated is left untouched and the call fails.
    #[instrument(skip(self))]
    pub async fn unreceive(&self, consignment_id: Uuid) -> Result<RemovalOutcome, ServiceError> {
        // Resolve the owning product without a permit first; the
        // authoritative re-read happens under the lock inside the
        // transaction.
        let peeked = Consignment::find_by_id(consignment_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::validation(format!("unknown consignment {consignment_id}"))
            })?;
        let product_id = peeked.product_id;

        let _permit = match self.locks.acquire(product_id).await {
            Ok(permit) => permit,
            Err(e) => {
                INCOME_FAILURES.with_label_values(&[e.label()]).inc();
                return Err(e);
            }
        };

        let db = self.db_pool.as_ref();
        let result = db
            .transaction::<_, (consignment::Model, i32), ServiceError>(move |txn| {
                Box::pin(async move { apply_unreceive(txn, consignment_id).await })
            })
            .await
            .map_err(ServiceError::from);

        match result {
            Ok((consignment, product_quantity)) => {
                CONSIGNMENTS_REMOVED.inc();
                info!(
                    product_id = %product_id,
                    consignment_id = %consignment.id,
                    quantity = consignment.quantity,
                    product_quantity,
                    "Removed consignment"
                );

                if let Err(e) = self
                    .event_sender
                    .send(Event::ConsignmentRemoved {
                        product_id,
                        consignment_id: consignment.id,
                        quantity: consignment.quantity,
                    })
                    .await
                {
                    warn!("Failed to send consignment removed event: {}", e);
                }

                Ok(RemovalOutcome {
                    consignment,
                    product_quantity,
                })
            }
            Err(e) => {
                INCOME_FAILURES.with_label_values(&[e.label()]).inc();
                Err(e)
            }
        }
    }
}
