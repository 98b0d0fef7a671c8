//! Draw-down behavior of sale invoices against the consignment ledger.

mod common;

use axum::http::StatusCode;
use common::{parse_uuid, TestApp};

#[tokio::test]
async fn sale_draws_oldest_consignment_first_and_spills_into_the_next() {
    let app = TestApp::new().await;
    let product = app.seed_product("Wheel", "50.00").await;
    app.income_invoice(product, 10, "2024-01-01T00:00:00Z", "500.00")
        .await;
    app.income_invoice(product, 5, "2024-02-01T00:00:00Z", "250.00")
        .await;

    let consignments = app.consignments(product).await;
    assert_eq!(consignments.len(), 2);
    assert_eq!(consignments[0]["consignment_number"], 1);
    let oldest = parse_uuid(&consignments[0]["id"]);
    let newest = parse_uuid(&consignments[1]["id"]);

    let (status, body) = app.sale_invoice(product, 12, "600.00").await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "committed");

    let allocations = body["items"][0]["allocations"]
        .as_array()
        .expect("sale item allocations");
    assert_eq!(allocations.len(), 2);
    assert_eq!(parse_uuid(&allocations[0]["consignment_id"]), oldest);
    assert_eq!(allocations[0]["units"], 10);
    assert_eq!(parse_uuid(&allocations[1]["consignment_id"]), newest);
    assert_eq!(allocations[1]["units"], 2);

    let after = app.consignments(product).await;
    assert_eq!(after[0]["current_quantity"], 0);
    assert_eq!(after[0]["depreciated"], true);
    assert_eq!(after[1]["current_quantity"], 3);
    assert_eq!(after[1]["depreciated"], false);
    assert_eq!(app.product_quantity(product).await, 3);
}

#[tokio::test]
async fn insufficient_stock_rejects_the_sale_and_touches_nothing() {
    let app = TestApp::new().await;
    let product = app.seed_product("Engine", "100.00").await;
    app.income_invoice(product, 15, "2024-01-01T00:00:00Z", "1500.00")
        .await;

    let (status, body) = app.sale_invoice(product, 16, "1600.00").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    let message = body["message"].as_str().expect("error message");
    assert!(message.contains("15"), "unexpected message: {message}");
    assert!(message.contains("16"), "unexpected message: {message}");

    let consignments = app.consignments(product).await;
    assert_eq!(consignments[0]["current_quantity"], 15);
    assert_eq!(consignments[0]["depreciated"], false);
    assert_eq!(app.product_quantity(product).await, 15);
}

#[tokio::test]
async fn equal_arrival_dates_draw_in_receipt_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Gasket", "5.00").await;
    let arrival = "2024-03-01T00:00:00Z";
    app.income_invoice(product, 4, arrival, "20.00").await;
    app.income_invoice(product, 6, arrival, "30.00").await;

    let consignments = app.consignments(product).await;
    assert_eq!(consignments[0]["consignment_number"], 1);
    assert_eq!(consignments[1]["consignment_number"], 2);
    let first = parse_uuid(&consignments[0]["id"]);
    let second = parse_uuid(&consignments[1]["id"]);

    let (status, body) = app.sale_invoice(product, 5, "50.00").await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let allocations = body["items"][0]["allocations"]
        .as_array()
        .expect("sale item allocations");
    assert_eq!(parse_uuid(&allocations[0]["consignment_id"]), first);
    assert_eq!(allocations[0]["units"], 4);
    assert_eq!(parse_uuid(&allocations[1]["consignment_id"]), second);
    assert_eq!(allocations[1]["units"], 1);
}

#[tokio::test]
async fn voiding_a_sale_restores_the_drawn_consignments() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bearing", "12.50").await;
    app.income_invoice(product, 10, "2024-01-01T00:00:00Z", "125.00")
        .await;

    let (status, body) = app.sale_invoice(product, 6, "120.00").await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let invoice_id = parse_uuid(&body["id"]);
    assert_eq!(app.product_quantity(product).await, 4);

    let (status, _) = app.delete(&format!("/api/v1/invoices/{invoice_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, voided) = app.get(&format!("/api/v1/invoices/{invoice_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(voided["status"], "voided");
    assert!(!voided["voided_at"].is_null());

    let consignments = app.consignments(product).await;
    assert_eq!(consignments[0]["current_quantity"], 10);
    assert_eq!(consignments[0]["depreciated"], false);
    assert_eq!(app.product_quantity(product).await, 10);
}
