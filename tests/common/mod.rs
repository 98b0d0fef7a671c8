use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use stockledger_api::{
    config::AppConfig,
    db,
    events::{self, EventSender},
    handlers::AppServices,
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        stockledger_api::config::init_tracing("debug", false);
    }
});

/// Helper harness for spinning up an application backed by a fresh
/// SQLite database per test.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Lazy::force(&TRACING);

        let db_dir = tempfile::tempdir().expect("create temp dir for test database");
        let db_file = db_dir.path().join("stockledger_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db_arc.clone(), Arc::new(event_sender.clone()));

        let state = Arc::new(AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        });

        let router = Router::new()
            .nest("/api/v1", stockledger_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Send a request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        Self::into_json(self.request(Method::GET, uri, None).await).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        Self::into_json(self.request(Method::POST, uri, Some(body)).await).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        Self::into_json(self.request(Method::DELETE, uri, None).await).await
    }

    async fn into_json(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read response body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body should be json")
        };
        (status, json)
    }

    /// Create a product through the API and return its id.
    pub async fn seed_product(&self, name: &str, cost_price: &str) -> Uuid {
        let (status, body) = self
            .post_json(
                "/api/v1/products",
                json!({ "name": name, "cost_price": cost_price }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "seed product failed: {body}");
        parse_uuid(&body["id"])
    }

    /// Commit a single-item income invoice and return the response body.
    pub async fn income_invoice(
        &self,
        product_id: Uuid,
        quantity: i32,
        arrival_date: &str,
        total_price: &str,
    ) -> Value {
        let (status, body) = self
            .post_json(
                "/api/v1/invoices",
                json!({
                    "kind": "income",
                    "date": arrival_date,
                    "items": [{
                        "product_id": product_id,
                        "quantity": quantity,
                        "total_price": total_price,
                        "arrival_date": arrival_date,
                    }],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "income invoice failed: {body}");
        body
    }

    /// Commit a single-item sale invoice and return (status, body).
    pub async fn sale_invoice(
        &self,
        product_id: Uuid,
        quantity: i32,
        total_price: &str,
    ) -> (StatusCode, Value) {
        self.post_json(
            "/api/v1/invoices",
            json!({
                "kind": "sale",
                "items": [{
                    "product_id": product_id,
                    "quantity": quantity,
                    "total_price": total_price,
                }],
            }),
        )
        .await
    }

    /// The product's consignments in draw-down order.
    pub async fn consignments(&self, product_id: Uuid) -> Vec<Value> {
        let (status, body) = self
            .get(&format!("/api/v1/products/{product_id}/consignments"))
            .await;
        assert_eq!(status, StatusCode::OK, "list consignments failed: {body}");
        body.as_array().expect("consignment list").clone()
    }

    /// The product's live quantity.
    pub async fn product_quantity(&self, product_id: Uuid) -> i64 {
        let (status, body) = self.get(&format!("/api/v1/products/{product_id}")).await;
        assert_eq!(status, StatusCode::OK, "get product failed: {body}");
        body["quantity"].as_i64().expect("product quantity")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn parse_uuid(value: &Value) -> Uuid {
    Uuid::parse_str(value.as_str().expect("uuid field")).expect("well-formed uuid")
}

/// Decimal fields serialize as strings; SQLite round trips may widen or
/// narrow the scale, so compare numerically.
pub fn decimal_as_f64(value: &Value) -> f64 {
    value
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| value.as_f64())
        .expect("decimal field")
}
