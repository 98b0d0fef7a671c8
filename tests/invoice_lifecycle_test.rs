//! Invoice commit and void against the stock ledger.

mod common;

use axum::http::StatusCode;
use common::{parse_uuid, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn income_invoice_books_stock_and_voiding_removes_it() {
    let app = TestApp::new().await;
    let product = app.seed_product("Piston", "30.00").await;

    let body = app
        .income_invoice(product, 20, "2024-01-05T00:00:00Z", "600.00")
        .await;
    let invoice_id = parse_uuid(&body["id"]);
    assert_eq!(body["kind"], "income");
    assert_eq!(body["items"][0]["line_number"], 1);
    assert!(!body["items"][0]["consignment_id"].is_null());
    assert_eq!(app.product_quantity(product).await, 20);

    let (status, _) = app.delete(&format!("/api/v1/invoices/{invoice_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, voided) = app.get(&format!("/api/v1/invoices/{invoice_id}")).await;
    assert_eq!(voided["status"], "voided");
    assert_eq!(app.product_quantity(product).await, 0);
    assert!(app.consignments(product).await.is_empty());
}

#[tokio::test]
async fn income_invoice_with_drawn_consignment_cannot_be_voided() {
    let app = TestApp::new().await;
    let product = app.seed_product("Valve", "8.00").await;

    let income = app
        .income_invoice(product, 20, "2024-01-05T00:00:00Z", "160.00")
        .await;
    let income_id = parse_uuid(&income["id"]);

    let (status, body) = app.sale_invoice(product, 5, "60.00").await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(app.product_quantity(product).await, 15);

    let (status, body) = app.delete(&format!("/api/v1/invoices/{income_id}")).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    let message = body["message"].as_str().expect("error message");
    assert!(message.contains("units left"), "unexpected message: {message}");

    // The refusal must leave everything exactly as it was.
    let (_, invoice) = app.get(&format!("/api/v1/invoices/{income_id}")).await;
    assert_eq!(invoice["status"], "committed");
    assert_eq!(app.product_quantity(product).await, 15);
    let consignments = app.consignments(product).await;
    assert_eq!(consignments.len(), 1);
    assert_eq!(consignments[0]["current_quantity"], 15);
}

#[tokio::test]
async fn voiding_twice_is_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product("Spring", "2.00").await;
    let income = app
        .income_invoice(product, 3, "2024-01-05T00:00:00Z", "6.00")
        .await;
    let income_id = parse_uuid(&income["id"]);

    let (status, _) = app.delete(&format!("/api/v1/invoices/{income_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.delete(&format!("/api/v1/invoices/{income_id}")).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    let message = body["message"].as_str().expect("error message");
    assert!(
        message.contains("already voided"),
        "unexpected message: {message}"
    );
}

#[tokio::test]
async fn failed_item_rolls_back_the_applied_prefix() {
    let app = TestApp::new().await;
    let stocked = app.seed_product("Hub", "25.00").await;
    let empty = app.seed_product("Axle", "40.00").await;
    app.income_invoice(stocked, 10, "2024-01-01T00:00:00Z", "250.00")
        .await;

    let (status, body) = app
        .post_json(
            "/api/v1/invoices",
            json!({
                "kind": "sale",
                "items": [
                    { "product_id": stocked, "quantity": 5, "total_price": "150.00" },
                    { "product_id": empty, "quantity": 1, "total_price": "40.00" },
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    // The first item's allocation was compensated away.
    assert_eq!(app.product_quantity(stocked).await, 10);
    let consignments = app.consignments(stocked).await;
    assert_eq!(consignments[0]["current_quantity"], 10);
    assert_eq!(consignments[0]["depreciated"], false);

    // Only the seeding income invoice exists.
    let (status, list) = app.get("/api/v1/invoices").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"].as_array().expect("invoice list").len(), 1);
}

#[tokio::test]
async fn voiding_in_reverse_chronology_empties_the_ledger() {
    let app = TestApp::new().await;
    let product = app.seed_product("Rotor", "60.00").await;

    let (status, income) = app
        .post_json(
            "/api/v1/invoices",
            json!({
                "kind": "income",
                "items": [
                    {
                        "product_id": product,
                        "quantity": 10,
                        "total_price": "600.00",
                        "arrival_date": "2024-01-01T00:00:00Z",
                    },
                    {
                        "product_id": product,
                        "quantity": 5,
                        "total_price": "300.00",
                        "arrival_date": "2024-02-01T00:00:00Z",
                    },
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{income}");
    let income_id = parse_uuid(&income["id"]);

    let (status, sale) = app.sale_invoice(product, 12, "900.00").await;
    assert_eq!(status, StatusCode::CREATED, "{sale}");
    let sale_id = parse_uuid(&sale["id"]);
    assert_eq!(app.product_quantity(product).await, 3);

    // While the sale holds units the income invoice is stuck.
    let (status, _) = app.delete(&format!("/api/v1/invoices/{income_id}")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.delete(&format!("/api/v1/invoices/{sale_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.product_quantity(product).await, 15);

    let (status, _) = app.delete(&format!("/api/v1/invoices/{income_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.product_quantity(product).await, 0);
    assert!(app.consignments(product).await.is_empty());
}

#[tokio::test]
async fn invalid_invoices_are_rejected_up_front() {
    let app = TestApp::new().await;
    let product = app.seed_product("Cam", "15.00").await;

    let (status, body) = app
        .post_json("/api/v1/invoices", json!({ "kind": "sale", "items": [] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let unknown = Uuid::new_v4();
    let (status, body) = app
        .post_json(
            "/api/v1/invoices",
            json!({
                "kind": "sale",
                "items": [{ "product_id": unknown, "quantity": 1, "total_price": "1.00" }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    let message = body["message"].as_str().expect("error message");
    assert!(
        message.contains("unknown product"),
        "unexpected message: {message}"
    );

    let (status, body) = app
        .post_json(
            "/api/v1/invoices",
            json!({
                "kind": "sale",
                "items": [{
                    "product_id": product,
                    "quantity": 1,
                    "total_price": "1.00",
                    "arrival_date": "2024-01-01T00:00:00Z",
                }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = app
        .delete(&format!("/api/v1/invoices/{}", Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn invoice_detail_reads_back_in_line_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Shaft", "45.00").await;
    app.income_invoice(product, 8, "2024-01-01T00:00:00Z", "360.00")
        .await;

    let (status, sale) = app.sale_invoice(product, 3, "200.00").await;
    assert_eq!(status, StatusCode::CREATED, "{sale}");
    let sale_id = parse_uuid(&sale["id"]);

    let (status, detail) = app.get(&format!("/api/v1/invoices/{sale_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["kind"], "sale");
    assert_eq!(detail["items"][0]["line_number"], 1);
    assert_eq!(detail["items"][0]["quantity"], 3);
    let allocations = detail["items"][0]["allocations"]
        .as_array()
        .expect("allocations on sale item");
    assert_eq!(allocations[0]["units"], 3);
}
