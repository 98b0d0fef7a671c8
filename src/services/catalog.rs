use crate::{
    db::DbPool,
    entities::{
        consignment::{self, Entity as Consignment},
        product::{self, Entity as Product},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

lazy_static! {
    static ref PRODUCTS_CREATED: IntCounter = register_int_counter!(
        "products_created_total",
        "Total number of products created"
    )
    .expect("metric can be created");
}

/// Catalog access and the shared ledger plumbing the engines build on.
pub struct CatalogService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_product(
        &self,
        name: &str,
        cost_price: Decimal,
    ) -> Result<product::Model, ServiceError> {
        validate_new_product(name, cost_price)?;

        let db = self.db_pool.as_ref();
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.trim().to_string()),
            quantity: Set(0),
            cost_price: Set(cost_price),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        PRODUCTS_CREATED.inc();
        info!(product_id = %model.id, name = %model.name, "Created product");

        if let Err(e) = self
            .event_sender
            .send(Event::ProductCreated(model.id))
            .await
        {
            warn!("Failed to send product created event: {}", e);
        }

        Ok(model)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        find_product(self.db_pool.as_ref(), product_id).await
    }

    /// Lists products ordered by name. `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let db = self.db_pool.as_ref();
        let paginator = Product::find()
            .order_by_asc(product::Column::Name)
            .paginate(db, limit.max(1));

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let products = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((products, total))
    }

    /// Lists a product's consignments in draw-down order (oldest arrival
    /// first, receipt number breaking ties).
    #[instrument(skip(self))]
    pub async fn list_consignments(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<consignment::Model>, ServiceError> {
        let db = self.db_pool.as_ref();
        // Resolve the product first so an unknown id reads as a caller
        // mistake rather than an empty ledger.
        find_product(db, product_id).await?;
        fifo_consignments(db, product_id).await
    }

    /// Seeds the demo catalog into an empty database. No-op when any
    /// product already exists.
    pub async fn seed_demo_products(&self) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let existing = Product::find()
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        if existing > 0 {
            return Ok(());
        }

        info!("Seeding demo catalog");
        self.create_product("Wheel", dec!(50.00)).await?;
        self.create_product("Engine", dec!(100.00)).await?;
        Ok(())
    }
}

fn validate_new_product(name: &str, cost_price: Decimal) -> Result<(), ServiceError> {
    if name.trim().is_empty() {
        return Err(ServiceError::validation("product name must not be empty"));
    }
    if name.trim().len() > 255 {
        return Err(ServiceError::validation(
            "product name must not exceed 255 characters",
        ));
    }
    if cost_price < Decimal::ZERO {
        return Err(ServiceError::validation(
            "product cost price must not be negative",
        ));
    }
    Ok(())
}

/// Loads a product or reports the unknown id as a validation error.
pub(crate) async fn find_product<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<product::Model, ServiceError> {
    Product::find_by_id(product_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::validation(format!("unknown product {}", product_id)))
}

/// A product's consignments in the order stock is drawn down: oldest
/// arrival date first, lower receipt number first among equal dates.
pub(crate) async fn fifo_consignments<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<Vec<consignment::Model>, ServiceError> {
    Consignment::find()
        .filter(consignment::Column::ProductId.eq(product_id))
        .order_by_asc(consignment::Column::ArrivalDate)
        .order_by_asc(consignment::Column::ConsignmentNumber)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Rederives the product's quantity from its consignments and stores
/// it. Must run in the same transaction as the consignment mutation it
/// follows, under the product's permit.
pub(crate) async fn recompute_product_quantity<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<i32, ServiceError> {
    let product = find_product(conn, product_id).await?;

    let consignments = Consignment::find()
        .filter(consignment::Column::ProductId.eq(product_id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    let total: i64 = consignments
        .iter()
        .map(|c| c.current_quantity as i64)
        .sum();
    let total = i32::try_from(total).map_err(|_| {
        ServiceError::IntegrityFault(format!(
            "product {} consignment total {} overflows the quantity column",
            product_id, total
        ))
    })?;

    let mut active: product::ActiveModel = product.into();
    active.quantity = Set(total);
    active.updated_at = Set(Utc::now());
    active.update(conn).await.map_err(ServiceError::db_error)?;

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_are_rejected() {
        assert!(validate_new_product("  ", dec!(1.00)).is_err());
        assert!(validate_new_product("", dec!(1.00)).is_err());
    }

    #[test]
    fn negative_cost_price_is_rejected() {
        let err = validate_new_product("Wheel", dec!(-0.01)).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn reasonable_products_pass_validation() {
        assert!(validate_new_product("Wheel", dec!(50.00)).is_ok());
        assert!(validate_new_product("Engine", Decimal::ZERO).is_ok());
    }
}
