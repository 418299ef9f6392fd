//! Checkout-session creation tests, including the full
//! checkout-then-webhook cycle the reconciliation contract depends on.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(state: AppState) -> axum::Router {
    tally::handlers::router().with_state(state)
}

async fn post_json(app: axum::Router, path: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_plan_checkout_creates_pending_transaction_first() {
    let pool = setup_test_pool();
    let payments = stub_payments();
    let base = spawn_stub_gateway(payments).await;
    let state = test_state(pool.clone(), &base);

    let (tenant_id, plan_id) = {
        let conn = pool.get().unwrap();
        let tenant = seed_tenant(&conn);
        let plan = seed_plan(&conn, &tenant.id, PlanInterval::Monthly);
        store_credentials(&conn, &state.master_key, Some(&tenant.id), "mercadopago", "TENANT-token");
        (tenant.id, plan.id)
    };

    let (status, body) = post_json(
        app(state),
        "/checkout",
        json!({
            "tenant_id": tenant_id,
            "student_id": "student-1",
            "item_type": "plan",
            "item_id": plan_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(
        body["checkout_url"],
        "https://mp.example/checkout/pref-test-1"
    );
    assert_eq!(body["preference_id"], "pref-test-1");

    let conn = pool.get().unwrap();
    let tx = queries::get_transaction(&conn, body["transaction_id"].as_str().unwrap())
        .unwrap()
        .expect("pending row persisted");
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.amount_cents, 10000, "price comes from the catalog");
    assert_eq!(tx.external_reference, plan_id);
    assert_eq!(tx.gateway_preference_id.as_deref(), Some("pref-test-1"));
    assert!(tx.gateway_payment_id.is_none());
}

#[tokio::test]
async fn test_checkout_rejects_unknown_plan_and_foreign_items() {
    let pool = setup_test_pool();
    let payments = stub_payments();
    let base = spawn_stub_gateway(payments).await;
    let state = test_state(pool.clone(), &base);

    let (tenant_id, other_course_id) = {
        let conn = pool.get().unwrap();
        let tenant = seed_tenant(&conn);
        let other = queries::create_tenant(&conn, "Coach Bia").unwrap();
        let other_course = seed_course(&conn, &other.id);
        store_credentials(&conn, &state.master_key, None, "mercadopago", "TEST-platform");
        (tenant.id, other_course.id)
    };

    let (status, _) = post_json(
        app(state.clone()),
        "/checkout",
        json!({
            "tenant_id": tenant_id,
            "student_id": "student-1",
            "item_type": "plan",
            "item_id": "pln_missing",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A course from another tenant's catalog cannot be sold here.
    let (status, _) = post_json(
        app(state),
        "/checkout",
        json!({
            "tenant_id": tenant_id,
            "student_id": "student-1",
            "item_type": "course",
            "item_id": other_course_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manual_charge_checkout_links_the_transaction() {
    let pool = setup_test_pool();
    let payments = stub_payments();
    let base = spawn_stub_gateway(payments).await;
    let state = test_state(pool.clone(), &base);

    let (tenant_id, charge_id) = {
        let conn = pool.get().unwrap();
        let tenant = seed_tenant(&conn);
        let charge = queries::create_manual_charge(
            &conn,
            &tenant.id,
            "student-1",
            "Aula particular",
            15000,
            "BRL",
            &[],
        )
        .unwrap();
        store_credentials(&conn, &state.master_key, None, "mercadopago", "TEST-platform");
        (tenant.id, charge.id)
    };

    let (status, body) = post_json(
        app(state),
        "/checkout",
        json!({
            "tenant_id": tenant_id,
            "student_id": "student-1",
            "item_type": "manual_charge",
            "item_id": charge_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);

    let conn = pool.get().unwrap();
    let charge = queries::get_manual_charge(&conn, &charge_id).unwrap().unwrap();
    assert_eq!(
        charge.transaction_id.as_deref(),
        body["transaction_id"].as_str()
    );
}

#[tokio::test]
async fn test_settled_manual_charge_cannot_be_checked_out_again() {
    let pool = setup_test_pool();
    let payments = stub_payments();
    let base = spawn_stub_gateway(payments).await;
    let state = test_state(pool.clone(), &base);

    let (tenant_id, charge_id) = {
        let conn = pool.get().unwrap();
        let tenant = seed_tenant(&conn);
        let charge = queries::create_manual_charge(
            &conn,
            &tenant.id,
            "student-1",
            "Aula particular",
            15000,
            "BRL",
            &[],
        )
        .unwrap();
        queries::try_settle_manual_charge(&conn, &charge.id, 1_700_000_000).unwrap();
        store_credentials(&conn, &state.master_key, None, "mercadopago", "TEST-platform");
        (tenant.id, charge.id)
    };

    let (status, _) = post_json(
        app(state),
        "/checkout",
        json!({
            "tenant_id": tenant_id,
            "student_id": "student-1",
            "item_type": "manual_charge",
            "item_id": charge_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_full_checkout_then_webhook_cycle() {
    let pool = setup_test_pool();
    let payments = stub_payments();
    let base = spawn_stub_gateway(payments.clone()).await;
    let state = test_state(pool.clone(), &base);

    let (tenant_id, course_id) = {
        let conn = pool.get().unwrap();
        let tenant = seed_tenant(&conn);
        let course = seed_course(&conn, &tenant.id);
        store_credentials(&conn, &state.master_key, None, "mercadopago", "TEST-platform");
        (tenant.id, course.id)
    };

    let (status, body) = post_json(
        app(state.clone()),
        "/checkout",
        json!({
            "tenant_id": tenant_id,
            "student_id": "student-1",
            "item_type": "course",
            "item_id": course_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    let tx_id = body["transaction_id"].as_str().unwrap().to_string();

    // The gateway echoes our transaction id back as external_reference.
    payments
        .lock()
        .unwrap()
        .insert("8001".into(), mp_payment("8001", "approved", &tx_id, 99.0));

    let response = app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/mercadopago")
                .header("content-type", "application/json")
                .body(Body::from(mp_webhook("8001")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = pool.get().unwrap();
    let tx = queries::get_transaction(&conn, &tx_id).unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Paid);
    assert!(queries::has_course_unlock(&conn, "student-1", &course_id).unwrap());
}
