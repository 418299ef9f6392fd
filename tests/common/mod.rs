//! Test utilities and fixtures for tally integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::json;

pub use tally::credentials::CredentialCache;
pub use tally::crypto::MasterKey;
pub use tally::db::{init_db, queries, AppState, DbPool};
pub use tally::gateways::{GatewayRegistry, MercadoPagoGateway};
pub use tally::models::*;

/// Create a test master key (deterministic - ONLY for testing)
pub fn test_master_key() -> MasterKey {
    MasterKey::from_bytes([0u8; 32])
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Pooled in-memory database for pipeline tests.
///
/// Size 1 because every sqlite `:memory:` connection is its own database;
/// all access has to share the single connection. Tests must drop pool
/// checkouts before invoking the pipeline or the next `get()` blocks.
pub fn setup_test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("Failed to build test pool");
    init_db(&pool.get().expect("Failed to get connection")).expect("Failed to initialize schema");
    pool
}

/// AppState wired to a MercadoPago adapter pointed at `gateway_base`,
/// with a short request timeout so stalled-gateway tests stay fast.
pub fn test_state(pool: DbPool, gateway_base: &str) -> AppState {
    let client = reqwest::Client::new();
    let mut gateways = GatewayRegistry::new();
    gateways.register(Arc::new(
        MercadoPagoGateway::with_api_base(client.clone(), gateway_base)
            .with_timeout(Duration::from_millis(500)),
    ));
    AppState {
        db: pool,
        master_key: test_master_key(),
        http_client: client,
        gateways: Arc::new(gateways),
        credentials: Arc::new(CredentialCache::new()),
        notify_webhook_url: None,
        base_url: "http://localhost:3000".to_string(),
    }
}

// ============ Fixtures ============

pub fn seed_tenant(conn: &Connection) -> Tenant {
    queries::create_tenant(conn, "Coach Ana").expect("Failed to create test tenant")
}

pub fn seed_plan(conn: &Connection, tenant_id: &str, interval: PlanInterval) -> Plan {
    queries::create_plan(conn, tenant_id, "Mentoria Mensal", interval, 10000, "BRL")
        .expect("Failed to create test plan")
}

pub fn seed_course(conn: &Connection, tenant_id: &str) -> Course {
    queries::create_course(conn, tenant_id, "Curso Base", 9900, "BRL")
        .expect("Failed to create test course")
}

/// Encrypt and store a gateway access token for a scope
/// (None = platform default).
pub fn store_credentials(
    conn: &Connection,
    key: &MasterKey,
    tenant_id: Option<&str>,
    gateway: &str,
    token: &str,
) {
    let scope = tenant_id.unwrap_or(PLATFORM_SCOPE);
    let encrypted = key
        .encrypt_secret(scope, token.as_bytes())
        .expect("Failed to encrypt test credentials");
    queries::upsert_gateway_credential(conn, tenant_id, gateway, &encrypted, false)
        .expect("Failed to store test credentials");
}

/// A pending mercadopago transaction, external reference pointing at the
/// purchased item, as checkout creation would leave it.
pub fn pending_transaction(
    conn: &Connection,
    tenant_id: &str,
    student_id: &str,
    item_type: PaymentItemType,
    item_id: &str,
    amount_cents: i64,
) -> Transaction {
    queries::create_transaction(
        conn,
        &CreateTransaction {
            tenant_id: tenant_id.to_string(),
            student_id: student_id.to_string(),
            item_type,
            item_id: item_id.to_string(),
            external_reference: item_id.to_string(),
            gateway: "mercadopago".to_string(),
            amount_cents,
            currency: "BRL".to_string(),
            metadata: None,
        },
    )
    .expect("Failed to create test transaction")
}

// ============ Stubbed gateway ============

pub type StubPayments = Arc<Mutex<HashMap<String, serde_json::Value>>>;

pub fn stub_payments() -> StubPayments {
    Arc::new(Mutex::new(HashMap::new()))
}

/// MercadoPago payment object as `/v1/payments/{id}` returns it.
pub fn mp_payment(
    id: &str,
    status: &str,
    external_reference: &str,
    amount: f64,
) -> serde_json::Value {
    json!({
        "id": id,
        "status": status,
        "external_reference": external_reference,
        "transaction_amount": amount,
        "currency_id": "BRL",
        "payment_method_id": "pix",
    })
}

/// Modern MercadoPago webhook body for a payment event.
pub fn mp_webhook(payment_id: &str) -> Vec<u8> {
    json!({"type": "payment", "data": {"id": payment_id}})
        .to_string()
        .into_bytes()
}

/// Serve canned payment objects and checkout preferences on an ephemeral
/// port, MercadoPago shaped. Returns the base URL.
pub async fn spawn_stub_gateway(payments: StubPayments) -> String {
    let app = Router::new()
        .route(
            "/v1/payments/{id}",
            get({
                let payments = payments.clone();
                move |Path(id): Path<String>| {
                    let payments = payments.clone();
                    async move {
                        let payment = payments.lock().unwrap().get(&id).cloned();
                        match payment {
                            Some(p) => (StatusCode::OK, Json(p)).into_response(),
                            None => (
                                StatusCode::NOT_FOUND,
                                Json(json!({"message": "Payment not found"})),
                            )
                                .into_response(),
                        }
                    }
                }
            }),
        )
        .route(
            "/checkout/preferences",
            post(|| async {
                Json(json!({
                    "id": "pref-test-1",
                    "init_point": "https://mp.example/checkout/pref-test-1",
                    "sandbox_init_point": "https://sandbox.mp.example/checkout/pref-test-1",
                }))
            }),
        );
    serve_on_ephemeral_port(app).await
}

/// A gateway that never answers within the adapter's request timeout.
pub async fn spawn_stalled_gateway() -> String {
    let app = Router::new().route(
        "/v1/payments/{id}",
        get(|Path(_id): Path<String>| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(json!({}))
        }),
    );
    serve_on_ephemeral_port(app).await
}

async fn serve_on_ephemeral_port(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub gateway");
    let addr = listener.local_addr().expect("Failed to read stub address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Stub gateway died");
    });
    format!("http://{}", addr)
}
