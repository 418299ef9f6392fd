//! Transaction ledger and dedup store tests at the query layer.

mod common;

use common::*;
use tally::db::queries::{LedgerNoOp, LedgerOutcome};
use tally::error::AppError;

fn paid_snapshot() -> Option<&'static str> {
    Some(r#"{"gateway":"mercadopago","status":"approved"}"#)
}

fn make_pending(conn: &rusqlite::Connection) -> Transaction {
    let tenant = seed_tenant(conn);
    let plan = seed_plan(conn, &tenant.id, PlanInterval::Monthly);
    pending_transaction(
        conn,
        &tenant.id,
        "student-1",
        PaymentItemType::Plan,
        &plan.id,
        10000,
    )
}

fn apply(
    conn: &rusqlite::Connection,
    tx: &Transaction,
    status: TransactionStatus,
    link: Option<&str>,
) -> LedgerOutcome {
    queries::apply_transaction_status(conn, tx, status, link, Some("pix"), paid_snapshot())
        .expect("apply must not error")
}

// ============ Forward-only lifecycle ============

#[test]
fn test_pending_to_paid_stamps_paid_at_once() {
    let conn = setup_test_conn();
    let tx = make_pending(&conn);

    let outcome = apply(&conn, &tx, TransactionStatus::Paid, Some("mp-1"));
    let paid = match outcome {
        LedgerOutcome::Applied {
            transaction,
            became_paid,
        } => {
            assert!(became_paid);
            transaction
        }
        other => panic!("expected Applied, got {:?}", other),
    };
    assert_eq!(paid.status, TransactionStatus::Paid);
    let paid_at = paid.paid_at.expect("paid_at stamped");

    // Refund later: status moves, paid_at does not.
    let outcome = apply(&conn, &paid, TransactionStatus::Refunded, None);
    match outcome {
        LedgerOutcome::Applied {
            transaction,
            became_paid,
        } => {
            assert!(!became_paid, "refund must not re-trigger orchestration");
            assert_eq!(transaction.status, TransactionStatus::Refunded);
            assert_eq!(transaction.paid_at, Some(paid_at));
        }
        other => panic!("expected Applied, got {:?}", other),
    }
}

#[test]
fn test_paid_cannot_regress() {
    let conn = setup_test_conn();
    let tx = make_pending(&conn);
    let paid = match apply(&conn, &tx, TransactionStatus::Paid, Some("mp-1")) {
        LedgerOutcome::Applied { transaction, .. } => transaction,
        other => panic!("expected Applied, got {:?}", other),
    };

    for backward in [
        TransactionStatus::Pending,
        TransactionStatus::Failed,
        TransactionStatus::Cancelled,
    ] {
        let outcome = apply(&conn, &paid, backward, None);
        assert!(
            matches!(
                outcome,
                LedgerOutcome::NoOp(LedgerNoOp::InvalidTransition)
            ),
            "paid -> {:?} must be rejected",
            backward
        );
    }

    let check = queries::get_transaction(&conn, &paid.id).unwrap().unwrap();
    assert_eq!(check.status, TransactionStatus::Paid);
}

#[test]
fn test_terminal_failures_cannot_be_revived() {
    let conn = setup_test_conn();
    let tx = make_pending(&conn);
    let failed = match apply(&conn, &tx, TransactionStatus::Failed, None) {
        LedgerOutcome::Applied { transaction, .. } => transaction,
        other => panic!("expected Applied, got {:?}", other),
    };

    let outcome = apply(&conn, &failed, TransactionStatus::Paid, Some("mp-1"));
    assert!(matches!(
        outcome,
        LedgerOutcome::NoOp(LedgerNoOp::InvalidTransition)
    ));
}

#[test]
fn test_same_status_redelivery_is_a_noop() {
    let conn = setup_test_conn();
    let tx = make_pending(&conn);
    let outcome = apply(&conn, &tx, TransactionStatus::Pending, None);
    assert!(matches!(
        outcome,
        LedgerOutcome::NoOp(LedgerNoOp::AlreadyApplied)
    ));
}

#[test]
fn test_concurrent_writer_loses_the_cas_race() {
    let conn = setup_test_conn();
    let stale = make_pending(&conn);

    // Another delivery wins first.
    match apply(&conn, &stale, TransactionStatus::Paid, Some("mp-1")) {
        LedgerOutcome::Applied { .. } => {}
        other => panic!("expected Applied, got {:?}", other),
    }

    // This delivery still holds the pending snapshot; its conditional
    // update matches zero rows.
    let outcome = apply(&conn, &stale, TransactionStatus::Failed, None);
    assert!(matches!(outcome, LedgerOutcome::NoOp(LedgerNoOp::LostRace)));

    let check = queries::get_transaction(&conn, &stale.id).unwrap().unwrap();
    assert_eq!(check.status, TransactionStatus::Paid);
}

#[test]
fn test_gateway_payment_id_is_set_at_most_once() {
    let conn = setup_test_conn();
    let tx = make_pending(&conn);
    let paid = match apply(&conn, &tx, TransactionStatus::Paid, Some("mp-first")) {
        LedgerOutcome::Applied { transaction, .. } => transaction,
        other => panic!("expected Applied, got {:?}", other),
    };
    assert_eq!(paid.gateway_payment_id.as_deref(), Some("mp-first"));

    // A later transition passing None keeps the stored id (COALESCE).
    let refunded = match apply(&conn, &paid, TransactionStatus::Refunded, None) {
        LedgerOutcome::Applied { transaction, .. } => transaction,
        other => panic!("expected Applied, got {:?}", other),
    };
    assert_eq!(refunded.gateway_payment_id.as_deref(), Some("mp-first"));
}

#[test]
fn test_one_transaction_per_gateway_payment() {
    let conn = setup_test_conn();
    let tenant = seed_tenant(&conn);
    let plan = seed_plan(&conn, &tenant.id, PlanInterval::Monthly);
    let a = pending_transaction(&conn, &tenant.id, "s1", PaymentItemType::Plan, &plan.id, 10000);
    let b = pending_transaction(&conn, &tenant.id, "s2", PaymentItemType::Plan, &plan.id, 10000);

    match apply(&conn, &a, TransactionStatus::Paid, Some("mp-dup")) {
        LedgerOutcome::Applied { .. } => {}
        other => panic!("expected Applied, got {:?}", other),
    }

    // The storage layer, not just the code path, rejects a second link.
    let result =
        queries::apply_transaction_status(&conn, &b, TransactionStatus::Paid, Some("mp-dup"), None, None);
    assert!(matches!(result, Err(AppError::Database(_))));

    let found = queries::get_transaction_by_gateway_payment(&conn, "mercadopago", "mp-dup")
        .unwrap()
        .unwrap();
    assert_eq!(found.id, a.id);
}

#[test]
fn test_create_transaction_rejects_non_positive_amounts() {
    let conn = setup_test_conn();
    let tenant = seed_tenant(&conn);
    let plan = seed_plan(&conn, &tenant.id, PlanInterval::Monthly);

    for amount in [0, -100] {
        let result = queries::create_transaction(
            &conn,
            &CreateTransaction {
                tenant_id: tenant.id.clone(),
                student_id: "student-1".to_string(),
                item_type: PaymentItemType::Plan,
                item_id: plan.id.clone(),
                external_reference: plan.id.clone(),
                gateway: "mercadopago".to_string(),
                amount_cents: amount,
                currency: "BRL".to_string(),
                metadata: None,
            },
        );
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}

// ============ Dedup store ============

#[test]
fn test_admission_lifecycle() {
    let conn = setup_test_conn();
    let id = "mercadopago:payment:123";

    let first = queries::admit_webhook_event(&conn, id, "mercadopago", "payment", None).unwrap();
    assert_eq!(first, Admission::Admitted { attempts: 1 });
    assert!(!first.is_retry());

    // Admitted but never marked processed: a crashed prior attempt.
    // Re-admission is allowed and counted.
    let second = queries::admit_webhook_event(&conn, id, "mercadopago", "payment", None).unwrap();
    assert_eq!(second, Admission::Admitted { attempts: 2 });
    assert!(second.is_retry());

    queries::mark_webhook_processed(&conn, id).unwrap();

    let third = queries::admit_webhook_event(&conn, id, "mercadopago", "payment", None).unwrap();
    assert_eq!(third, Admission::AlreadyProcessed);

    let event = queries::get_webhook_event(&conn, id).unwrap().unwrap();
    assert!(event.processed);
    assert!(event.processed_at.is_some());
    assert_eq!(event.attempts, 2, "refused admissions are not counted");
}

#[test]
fn test_arrival_counter_is_scoped_per_gateway_and_type() {
    let conn = setup_test_conn();

    assert_eq!(
        queries::next_webhook_sequence(&conn, "mercadopago", "ping").unwrap(),
        1
    );
    assert_eq!(
        queries::next_webhook_sequence(&conn, "mercadopago", "ping").unwrap(),
        2
    );
    assert_eq!(
        queries::next_webhook_sequence(&conn, "stripe", "ping").unwrap(),
        1
    );
    assert_eq!(
        queries::next_webhook_sequence(&conn, "mercadopago", "other").unwrap(),
        1
    );
}

#[test]
fn test_purge_keeps_unprocessed_events() {
    let conn = setup_test_conn();

    queries::admit_webhook_event(&conn, "old:processed", "mercadopago", "payment", None).unwrap();
    queries::mark_webhook_processed(&conn, "old:processed").unwrap();
    queries::admit_webhook_event(&conn, "old:pending", "mercadopago", "payment", None).unwrap();

    // Age both rows past the retention window.
    conn.execute("UPDATE webhook_events SET created_at = created_at - 100 * 86400", [])
        .unwrap();

    let deleted = queries::purge_old_webhook_events(&conn, 90).unwrap();
    assert_eq!(deleted, 1);

    assert!(queries::get_webhook_event(&conn, "old:processed")
        .unwrap()
        .is_none());
    assert!(
        queries::get_webhook_event(&conn, "old:pending")
            .unwrap()
            .is_some(),
        "unprocessed deliveries stay retryable"
    );
}

// ============ Manual charges ============

#[test]
fn test_manual_charge_settles_exactly_once() {
    let conn = setup_test_conn();
    let tenant = seed_tenant(&conn);
    let charge = queries::create_manual_charge(
        &conn,
        &tenant.id,
        "student-1",
        "Private session",
        15000,
        "BRL",
        &[],
    )
    .unwrap();

    assert!(queries::try_settle_manual_charge(&conn, &charge.id, 1_700_000_000).unwrap());
    assert!(
        !queries::try_settle_manual_charge(&conn, &charge.id, 1_700_000_999).unwrap(),
        "replays observe the settled state"
    );

    let settled = queries::get_manual_charge(&conn, &charge.id).unwrap().unwrap();
    assert_eq!(settled.status, ManualChargeStatus::Paid);
    assert_eq!(settled.paid_at, Some(1_700_000_000));
}

#[test]
fn test_manual_charge_found_by_transaction_or_gateway_payment() {
    let conn = setup_test_conn();
    let tenant = seed_tenant(&conn);
    let charge = queries::create_manual_charge(
        &conn,
        &tenant.id,
        "student-1",
        "Private session",
        15000,
        "BRL",
        &[],
    )
    .unwrap();
    queries::link_manual_charge_transaction(&conn, &charge.id, "tx_abc").unwrap();

    let by_tx = queries::find_manual_charge_for_payment(&conn, "tx_abc", None)
        .unwrap()
        .unwrap();
    assert_eq!(by_tx.id, charge.id);
    assert_eq!(by_tx.transaction_id.as_deref(), Some("tx_abc"));

    assert!(queries::find_manual_charge_for_payment(&conn, "tx_other", None)
        .unwrap()
        .is_none());
}
