//! Post-payment side effects.
//!
//! Runs exactly when a transaction transitions into `paid`. Every step is
//! idempotent under its own natural key (transaction id, (student, course)
//! pair, (student, activity, reference) triple), so a crash-recovery rerun
//! or a duplicate delivery that slipped past dedup applies nothing twice.
//! Steps 1-4 own their errors: a failure is logged and the remaining steps
//! still run. Only the ledger write that triggered this module can fail
//! the webhook; nothing here does.

use chrono::{DateTime, Months, Utc};
use rusqlite::Connection;

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::{PaymentItemType, PlanInterval, Transaction};
use crate::notify::{spawn_notification, NotificationEvent};

/// Activity name recorded with purchase loyalty points.
const PURCHASE_ACTIVITY: &str = "purchase_completed";

/// Points granted per completed purchase.
const PURCHASE_POINTS: i64 = 50;

/// Fan out every side effect of a freshly paid transaction.
pub fn run_post_payment(state: &AppState, conn: &Connection, transaction: &Transaction) {
    match transaction.item_type {
        PaymentItemType::Plan => {
            if let Err(e) = activate_subscription(conn, transaction) {
                tracing::error!(
                    "Subscription activation failed for transaction {}: {}",
                    transaction.id,
                    e
                );
            }
        }
        PaymentItemType::Course => {
            if let Err(e) = unlock_course(conn, transaction) {
                tracing::error!(
                    "Course unlock failed for transaction {}: {}",
                    transaction.id,
                    e
                );
            }
        }
        PaymentItemType::ManualCharge => {}
    }

    // Settlement probes by reference, so it also catches charges linked to
    // this payment outside the item_type path.
    if let Err(e) = settle_manual_charge(conn, transaction) {
        tracing::error!(
            "Manual charge settlement failed for transaction {}: {}",
            transaction.id,
            e
        );
    }

    if let Err(e) = award_purchase_points(conn, transaction) {
        tracing::error!(
            "Point award failed for transaction {}: {}",
            transaction.id,
            e
        );
    }

    dispatch_notifications(state, transaction);
}

/// End of a subscription window: calendar months added to the start, so
/// "a month" tracks billing dates instead of a fixed number of seconds.
fn subscription_end(start: i64, interval: PlanInterval) -> i64 {
    let start_dt = DateTime::<Utc>::from_timestamp(start, 0).unwrap_or_else(Utc::now);
    start_dt
        .checked_add_months(Months::new(interval.months()))
        .map(|end| end.timestamp())
        .unwrap_or(start)
}

fn activate_subscription(conn: &Connection, transaction: &Transaction) -> Result<()> {
    let plan = match queries::get_plan(conn, &transaction.item_id)? {
        Some(plan) => plan,
        None => {
            tracing::warn!(
                "Transaction {} references missing plan {}",
                transaction.id,
                transaction.item_id
            );
            return Ok(());
        }
    };

    let start = transaction
        .paid_at
        .unwrap_or_else(|| Utc::now().timestamp());
    let end = subscription_end(start, plan.interval);

    let created = queries::activate_subscription(
        conn,
        &transaction.tenant_id,
        &transaction.student_id,
        &plan.id,
        &transaction.id,
        start,
        end,
    )?;

    if created {
        tracing::info!(
            "Subscription activated: student={}, plan={}, interval={}, end_date={}",
            transaction.student_id,
            plan.id,
            plan.interval,
            end
        );
    } else {
        tracing::debug!(
            "Subscription for transaction {} already active",
            transaction.id
        );
    }
    Ok(())
}

fn unlock_course(conn: &Connection, transaction: &Transaction) -> Result<()> {
    let created = queries::grant_course_unlock(
        conn,
        &transaction.student_id,
        &transaction.item_id,
        Some(&transaction.id),
    )?;

    if created {
        tracing::info!(
            "Course unlocked: student={}, course={}",
            transaction.student_id,
            transaction.item_id
        );
    } else {
        tracing::debug!(
            "Course {} already unlocked for student {}",
            transaction.item_id,
            transaction.student_id
        );
    }
    Ok(())
}

fn settle_manual_charge(conn: &Connection, transaction: &Transaction) -> Result<()> {
    let charge = match queries::find_manual_charge_for_payment(
        conn,
        &transaction.id,
        transaction.gateway_payment_id.as_deref(),
    )? {
        Some(charge) => charge,
        None => return Ok(()),
    };

    let paid_at = transaction
        .paid_at
        .unwrap_or_else(|| Utc::now().timestamp());
    let settled = queries::try_settle_manual_charge(conn, &charge.id, paid_at)?;

    if settled {
        tracing::info!(
            "Manual charge {} settled by transaction {}",
            charge.id,
            transaction.id
        );
    } else {
        tracing::debug!("Manual charge {} already settled", charge.id);
    }

    // Bundle unlocks run on the replay path too; a crash between the
    // settlement write and the unlocks must not leave courses locked.
    for course_id in queries::get_manual_charge_bundle(conn, &charge.id)? {
        let created = queries::grant_course_unlock(
            conn,
            &transaction.student_id,
            &course_id,
            Some(&transaction.id),
        )?;
        if created {
            tracing::info!(
                "Bundle course unlocked: student={}, course={} (charge {})",
                transaction.student_id,
                course_id,
                charge.id
            );
        }
    }
    Ok(())
}

fn award_purchase_points(conn: &Connection, transaction: &Transaction) -> Result<()> {
    let created = queries::award_points(
        conn,
        &transaction.student_id,
        PURCHASE_ACTIVITY,
        &transaction.id,
        PURCHASE_POINTS,
    )?;

    if created {
        tracing::info!(
            "Awarded {} points to student {} for transaction {}",
            PURCHASE_POINTS,
            transaction.student_id,
            transaction.id
        );
    }
    Ok(())
}

fn dispatch_notifications(state: &AppState, transaction: &Transaction) {
    let amount = format_amount(transaction.amount_cents, &transaction.currency);

    spawn_notification(
        state.http_client.clone(),
        state.notify_webhook_url.clone(),
        NotificationEvent {
            recipients: vec![transaction.tenant_id.clone()],
            title: "New sale".to_string(),
            message: format!(
                "Payment of {} received from student {}",
                amount, transaction.student_id
            ),
            metadata: serde_json::json!({
                "kind": "sale",
                "transaction_id": transaction.id,
                "student_id": transaction.student_id,
                "item_type": transaction.item_type.as_str(),
                "item_id": transaction.item_id,
                "amount_cents": transaction.amount_cents,
                "currency": transaction.currency,
            }),
        },
    );

    spawn_notification(
        state.http_client.clone(),
        state.notify_webhook_url.clone(),
        NotificationEvent {
            recipients: vec![transaction.student_id.clone()],
            title: "Payment approved".to_string(),
            message: format!("Your payment of {} was approved", amount),
            metadata: serde_json::json!({
                "kind": "payment_approved",
                "transaction_id": transaction.id,
                "item_type": transaction.item_type.as_str(),
                "item_id": transaction.item_id,
            }),
        },
    );
}

fn format_amount(cents: i64, currency: &str) -> String {
    format!("{} {}.{:02}", currency, cents / 100, cents % 100)
}
