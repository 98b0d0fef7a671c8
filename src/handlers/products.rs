use super::common::{
    created_response, success_response, validate_input, PaginatedResponse, PaginationParams,
};
use crate::{errors::ServiceError, handlers::AppState};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub cost_price: Decimal,
}

async fn create_product(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let product = state
        .services
        .catalog
        .create_product(&payload.name, payload.cost_price)
        .await?;

    Ok(created_response(product))
}

async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let product = state.services.catalog.get_product(product_id).await?;
    Ok(success_response(product))
}

async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let (products, total) = state
        .services
        .catalog
        .list_products(params.page, params.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        products,
        params.page,
        params.per_page,
        total,
    )))
}

/// The product's consignments in allocation order, oldest arrival
/// first.
async fn list_consignments(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let consignments = state.services.catalog.list_consignments(product_id).await?;
    Ok(success_response(consignments))
}

pub fn product_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/:id", get(get_product))
        .route("/:id/consignments", get(list_consignments))
}
