use super::common::{
    created_response, success_response, PaginatedResponse, PaginationParams,
};
use crate::{
    entities::report_artifact::ReportType,
    errors::ServiceError,
    handlers::AppState,
    services::reports::ReportPayload,
};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct GenerateReportRequest {
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotParams {
    pub as_of: Option<DateTime<Utc>>,
}

async fn generate_report(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerateReportRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let report = state
        .services
        .reports
        .generate(
            payload.report_type,
            payload.start,
            payload.end,
            payload.as_of,
        )
        .await?;

    Ok(created_response(report))
}

async fn list_reports(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let (artifacts, total) = state
        .services
        .reports
        .list_reports(params.page, params.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        artifacts,
        params.page,
        params.per_page,
        total,
    )))
}

/// Stock per product at a point in time, replayed from committed
/// invoices without recording an artifact.
async fn stock_snapshot(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SnapshotParams>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let as_of = params.as_of.unwrap_or_else(Utc::now);
    let rows = state.services.reports.product_snapshot(as_of).await?;
    Ok(success_response(ReportPayload::Product { as_of, rows }))
}

pub fn report_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_reports).post(generate_report))
        .route("/stock", get(stock_snapshot))
}
