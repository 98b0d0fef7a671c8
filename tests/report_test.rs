//! Replay-based reporting over the committed invoice history.

mod common;

use axum::http::StatusCode;
use common::{decimal_as_f64, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

async fn dated_sale(app: &TestApp, product: Uuid, quantity: i32, date: &str, total: &str) -> Value {
    let (status, body) = app
        .post_json(
            "/api/v1/invoices",
            json!({
                "kind": "sale",
                "date": date,
                "items": [{ "product_id": product, "quantity": quantity, "total_price": total }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "dated sale failed: {body}");
    body
}

#[tokio::test]
async fn stock_snapshot_replays_only_what_was_committed_by_the_cutoff() {
    let app = TestApp::new().await;
    let anchor = app.seed_product("Anchor", "10.00").await;
    let bolt = app.seed_product("Bolt", "1.00").await;

    app.income_invoice(anchor, 10, "2024-01-10T00:00:00Z", "100.00")
        .await;
    app.income_invoice(bolt, 4, "2024-01-20T00:00:00Z", "4.00")
        .await;
    let sale = dated_sale(&app, anchor, 3, "2024-02-01T00:00:00Z", "45.00").await;

    // Before the second income and the sale.
    let (status, early) = app
        .get("/api/v1/reports/stock?as_of=2024-01-15T00:00:00Z")
        .await;
    assert_eq!(status, StatusCode::OK, "{early}");
    let rows = early["rows"].as_array().expect("snapshot rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "Anchor");
    assert_eq!(rows[0]["quantity"], 10);
    assert_eq!(rows[1]["name"], "Bolt");
    assert_eq!(rows[1]["quantity"], 0);

    // After everything.
    let (_, late) = app
        .get("/api/v1/reports/stock?as_of=2024-03-01T00:00:00Z")
        .await;
    let rows = late["rows"].as_array().expect("snapshot rows");
    assert_eq!(rows[0]["quantity"], 7);
    assert_eq!(rows[1]["quantity"], 4);

    // Voided invoices drop out of the history entirely.
    let sale_id = sale["id"].as_str().expect("sale id");
    let (status, _) = app.delete(&format!("/api/v1/invoices/{sale_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, replayed) = app
        .get("/api/v1/reports/stock?as_of=2024-03-01T00:00:00Z")
        .await;
    let rows = replayed["rows"].as_array().expect("snapshot rows");
    assert_eq!(rows[0]["quantity"], 10);
}

#[tokio::test]
async fn invoice_reports_total_the_period_and_number_their_artifacts() {
    let app = TestApp::new().await;
    let product = app.seed_product("Fender", "50.00").await;
    app.income_invoice(product, 10, "2024-01-10T00:00:00Z", "500.00")
        .await;
    let first_sale = dated_sale(&app, product, 2, "2024-02-05T00:00:00Z", "120.00").await;
    dated_sale(&app, product, 3, "2024-02-20T00:00:00Z", "180.00").await;

    let (status, report) = app
        .post_json(
            "/api/v1/reports",
            json!({
                "type": "sale",
                "start": "2024-02-01T00:00:00Z",
                "end": "2024-02-28T00:00:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{report}");
    assert_eq!(report["payload"]["invoice_count"], 2);
    assert_eq!(decimal_as_f64(&report["payload"]["total_price"]), 300.0);
    assert_eq!(
        report["artifact"]["file_name"],
        "SaleReport1_2024-02-01_2024-02-28.pdf"
    );
    assert_eq!(report["artifact"]["sequence"], 1);

    let (status, income_report) = app
        .post_json(
            "/api/v1/reports",
            json!({
                "type": "income",
                "start": "2024-01-01T00:00:00Z",
                "end": "2024-01-31T00:00:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{income_report}");
    assert_eq!(income_report["payload"]["invoice_count"], 1);
    assert_eq!(decimal_as_f64(&income_report["payload"]["total_price"]), 500.0);
    assert_eq!(
        income_report["artifact"]["file_name"],
        "IncomeReport1_2024-01-01_2024-01-31.pdf"
    );

    // Voided sales disappear from later summaries; sequences keep
    // counting per report type.
    let first_id = first_sale["id"].as_str().expect("sale id");
    let (status, _) = app.delete(&format!("/api/v1/invoices/{first_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, rerun) = app
        .post_json(
            "/api/v1/reports",
            json!({
                "type": "sale",
                "start": "2024-02-01T00:00:00Z",
                "end": "2024-02-28T00:00:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{rerun}");
    assert_eq!(rerun["payload"]["invoice_count"], 1);
    assert_eq!(decimal_as_f64(&rerun["payload"]["total_price"]), 180.0);
    assert_eq!(rerun["artifact"]["sequence"], 2);
    assert_eq!(
        rerun["artifact"]["file_name"],
        "SaleReport2_2024-02-01_2024-02-28.pdf"
    );

    let (status, list) = app.get("/api/v1/reports").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"].as_array().expect("artifact list").len(), 3);
}

#[tokio::test]
async fn report_requests_with_bad_periods_are_rejected() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post_json(
            "/api/v1/reports",
            json!({
                "type": "sale",
                "start": "2024-02-28T00:00:00Z",
                "end": "2024-02-01T00:00:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    let message = body["message"].as_str().expect("error message");
    assert!(
        message.contains("invalid time range"),
        "unexpected message: {message}"
    );

    let (status, body) = app
        .post_json(
            "/api/v1/reports",
            json!({ "type": "sale", "start": "2024-02-01T00:00:00Z" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = app
        .post_json("/api/v1/reports", json!({ "type": "income" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn product_reports_record_a_line_counted_artifact() {
    let app = TestApp::new().await;
    let product = app.seed_product("Grille", "90.00").await;
    app.seed_product("Hood", "120.00").await;
    app.income_invoice(product, 5, "2024-05-01T00:00:00Z", "450.00")
        .await;

    let (status, report) = app
        .post_json(
            "/api/v1/reports",
            json!({ "type": "product", "as_of": "2024-06-15T12:00:00Z" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{report}");
    assert_eq!(
        report["artifact"]["file_name"],
        "ProductReport1_2024-06-15.pdf"
    );
    assert_eq!(report["artifact"]["line_count"], 2);
    assert_eq!(report["payload"]["rows"].as_array().expect("rows").len(), 2);
}
