//! Per-product serialization of competing ledger mutations.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn concurrent_sales_for_the_same_product_never_oversell() {
    let app = TestApp::new().await;
    let product = app.seed_product("Clutch", "75.00").await;
    app.income_invoice(product, 10, "2024-01-01T00:00:00Z", "750.00")
        .await;

    let sale = |total: &'static str| {
        app.post_json(
            "/api/v1/invoices",
            json!({
                "kind": "sale",
                "items": [{ "product_id": product, "quantity": 8, "total_price": total }],
            }),
        )
    };

    let ((first_status, first_body), (second_status, second_body)) =
        tokio::join!(sale("600.00"), sale("640.00"));

    let statuses = [first_status, second_status];
    assert!(
        statuses.contains(&StatusCode::CREATED),
        "one sale should succeed: {first_body} / {second_body}"
    );
    assert!(
        statuses.contains(&StatusCode::UNPROCESSABLE_ENTITY),
        "the other sale should be refused: {first_body} / {second_body}"
    );

    assert_eq!(app.product_quantity(product).await, 2);

    let consignments = app.consignments(product).await;
    assert_eq!(consignments[0]["current_quantity"], 2);
}

#[tokio::test]
async fn different_products_do_not_block_each_other() {
    let app = TestApp::new().await;
    let left = app.seed_product("Left Mirror", "20.00").await;
    let right = app.seed_product("Right Mirror", "20.00").await;

    let (first, second) = tokio::join!(
        app.post_json(
            "/api/v1/invoices",
            json!({
                "kind": "income",
                "items": [{
                    "product_id": left,
                    "quantity": 6,
                    "total_price": "120.00",
                    "arrival_date": "2024-01-01T00:00:00Z",
                }],
            }),
        ),
        app.post_json(
            "/api/v1/invoices",
            json!({
                "kind": "income",
                "items": [{
                    "product_id": right,
                    "quantity": 4,
                    "total_price": "80.00",
                    "arrival_date": "2024-01-01T00:00:00Z",
                }],
            }),
        ),
    );

    assert_eq!(first.0, StatusCode::CREATED, "{}", first.1);
    assert_eq!(second.0, StatusCode::CREATED, "{}", second.1);
    assert_eq!(app.product_quantity(left).await, 6);
    assert_eq!(app.product_quantity(right).await, 4);
}
