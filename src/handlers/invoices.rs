use super::common::{
    created_response, no_content_response, success_response, PaginatedResponse, PaginationParams,
};
use crate::{
    errors::ServiceError,
    handlers::AppState,
    services::invoices::NewInvoice,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Commits the invoice against the stock ledger in one call. Sales
/// draw down consignments, income books new ones; a failing item
/// leaves nothing applied.
async fn create_invoice(
    State(state): State<Arc<AppState>>,
    Json(new_invoice): Json<NewInvoice>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let invoice = state.services.invoices.create_invoice(new_invoice).await?;
    Ok(created_response(invoice))
}

async fn get_invoice(
    State(state): State<Arc<AppState>>,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let invoice = state.services.invoices.get_invoice(invoice_id).await?;
    Ok(success_response(invoice))
}

async fn list_invoices(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let (invoices, total) = state
        .services
        .invoices
        .list_invoices(params.page, params.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        invoices,
        params.page,
        params.per_page,
        total,
    )))
}

/// Voids the invoice and undoes its stock effects.
async fn delete_invoice(
    State(state): State<Arc<AppState>>,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    state.services.invoices.delete_invoice(invoice_id).await?;
    Ok(no_content_response())
}

pub fn invoice_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_invoices).post(create_invoice))
        .route("/:id", get(get_invoice).delete(delete_invoice))
}
