use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, COURSE_COLS, COURSE_UNLOCK_COLS, CREDENTIAL_COLS, MANUAL_CHARGE_COLS,
    PLAN_COLS, POINT_AWARD_COLS, SUBSCRIPTION_COLS, TENANT_COLS, TRANSACTION_COLS,
    WEBHOOK_EVENT_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Tenants ============

pub fn create_tenant(conn: &Connection, name: &str) -> Result<Tenant> {
    let id = EntityType::Tenant.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO tenants (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![&id, name, now],
    )?;

    Ok(Tenant {
        id,
        name: name.to_string(),
        created_at: now,
    })
}

pub fn get_tenant(conn: &Connection, id: &str) -> Result<Option<Tenant>> {
    query_one(
        conn,
        &format!("SELECT {} FROM tenants WHERE id = ?1", TENANT_COLS),
        &[&id],
    )
}

// ============ Gateway Credentials ============

/// Insert or replace the credential set for a (tenant, gateway) pair.
/// `tenant_id = None` targets the platform-default row for the gateway.
/// The access token must already be encrypted for the matching scope.
pub fn upsert_gateway_credential(
    conn: &Connection,
    tenant_id: Option<&str>,
    gateway: &str,
    access_token_enc: &[u8],
    sandbox: bool,
) -> Result<()> {
    let now = now();
    // The upsert target differs because uniqueness is enforced by two
    // partial indexes (platform rows have tenant_id IS NULL).
    match tenant_id {
        Some(tenant) => {
            conn.execute(
                "INSERT INTO gateway_credentials (id, tenant_id, gateway, access_token, sandbox, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(tenant_id, gateway) WHERE tenant_id IS NOT NULL DO UPDATE
                 SET access_token = excluded.access_token, sandbox = excluded.sandbox, updated_at = excluded.updated_at",
                params![
                    EntityType::Credential.gen_id(),
                    tenant,
                    gateway,
                    access_token_enc,
                    sandbox as i32,
                    now
                ],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO gateway_credentials (id, tenant_id, gateway, access_token, sandbox, created_at, updated_at)
                 VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(gateway) WHERE tenant_id IS NULL DO UPDATE
                 SET access_token = excluded.access_token, sandbox = excluded.sandbox, updated_at = excluded.updated_at",
                params![
                    EntityType::Credential.gen_id(),
                    gateway,
                    access_token_enc,
                    sandbox as i32,
                    now
                ],
            )?;
        }
    }
    Ok(())
}

/// Fetch the stored credential row for exactly this scope (no fallback;
/// precedence lives in the resolver).
pub fn get_gateway_credential(
    conn: &Connection,
    tenant_id: Option<&str>,
    gateway: &str,
) -> Result<Option<GatewayCredential>> {
    match tenant_id {
        Some(tenant) => query_one(
            conn,
            &format!(
                "SELECT {} FROM gateway_credentials WHERE tenant_id = ?1 AND gateway = ?2",
                CREDENTIAL_COLS
            ),
            &[&tenant, &gateway],
        ),
        None => query_one(
            conn,
            &format!(
                "SELECT {} FROM gateway_credentials WHERE tenant_id IS NULL AND gateway = ?1",
                CREDENTIAL_COLS
            ),
            &[&gateway],
        ),
    }
}

// ============ Plans ============

pub fn create_plan(
    conn: &Connection,
    tenant_id: &str,
    name: &str,
    interval: PlanInterval,
    price_cents: i64,
    currency: &str,
) -> Result<Plan> {
    let id = EntityType::Plan.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO plans (id, tenant_id, name, interval, price_cents, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, tenant_id, name, interval.as_str(), price_cents, currency, now],
    )?;

    Ok(Plan {
        id,
        tenant_id: tenant_id.to_string(),
        name: name.to_string(),
        interval,
        price_cents,
        currency: currency.to_string(),
        created_at: now,
    })
}

pub fn get_plan(conn: &Connection, id: &str) -> Result<Option<Plan>> {
    query_one(
        conn,
        &format!("SELECT {} FROM plans WHERE id = ?1", PLAN_COLS),
        &[&id],
    )
}

// ============ Courses ============

pub fn create_course(
    conn: &Connection,
    tenant_id: &str,
    name: &str,
    price_cents: i64,
    currency: &str,
) -> Result<Course> {
    let id = EntityType::Course.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO courses (id, tenant_id, name, price_cents, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, tenant_id, name, price_cents, currency, now],
    )?;

    Ok(Course {
        id,
        tenant_id: tenant_id.to_string(),
        name: name.to_string(),
        price_cents,
        currency: currency.to_string(),
        created_at: now,
    })
}

pub fn get_course(conn: &Connection, id: &str) -> Result<Option<Course>> {
    query_one(
        conn,
        &format!("SELECT {} FROM courses WHERE id = ?1", COURSE_COLS),
        &[&id],
    )
}

// ============ Manual Charges ============

pub fn create_manual_charge(
    conn: &Connection,
    tenant_id: &str,
    student_id: &str,
    description: &str,
    amount_cents: i64,
    currency: &str,
    bundle_course_ids: &[&str],
) -> Result<ManualCharge> {
    let id = EntityType::ManualCharge.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO manual_charges (id, tenant_id, student_id, description, amount_cents, currency, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)",
        params![&id, tenant_id, student_id, description, amount_cents, currency, now],
    )?;

    for course_id in bundle_course_ids {
        conn.execute(
            "INSERT OR IGNORE INTO manual_charge_courses (charge_id, course_id) VALUES (?1, ?2)",
            params![&id, course_id],
        )?;
    }

    Ok(ManualCharge {
        id,
        tenant_id: tenant_id.to_string(),
        student_id: student_id.to_string(),
        description: description.to_string(),
        amount_cents,
        currency: currency.to_string(),
        status: ManualChargeStatus::Pending,
        transaction_id: None,
        gateway_payment_id: None,
        paid_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_manual_charge(conn: &Connection, id: &str) -> Result<Option<ManualCharge>> {
    query_one(
        conn,
        &format!("SELECT {} FROM manual_charges WHERE id = ?1", MANUAL_CHARGE_COLS),
        &[&id],
    )
}

/// Link a manual charge to the transaction created for it at checkout time.
pub fn link_manual_charge_transaction(
    conn: &Connection,
    charge_id: &str,
    transaction_id: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE manual_charges SET transaction_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![transaction_id, now(), charge_id],
    )?;
    Ok(())
}

/// Find the manual charge settled by a payment, matching either our
/// transaction id or the gateway's payment id.
pub fn find_manual_charge_for_payment(
    conn: &Connection,
    transaction_id: &str,
    gateway_payment_id: Option<&str>,
) -> Result<Option<ManualCharge>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM manual_charges
             WHERE transaction_id = ?1
                OR (?2 IS NOT NULL AND gateway_payment_id = ?2)",
            MANUAL_CHARGE_COLS
        ),
        &[&transaction_id, &gateway_payment_id],
    )
}

/// Atomically settle a manual charge, returning whether this call did the
/// settling. Replays and concurrent reconciliations see `false`.
pub fn try_settle_manual_charge(conn: &Connection, id: &str, paid_at: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE manual_charges SET status = 'paid', paid_at = ?2, updated_at = ?3
         WHERE id = ?1 AND status = 'pending'",
        params![id, paid_at, now()],
    )?;
    Ok(affected > 0)
}

/// Course ids bundled with a manual charge (unlocked on settlement).
pub fn get_manual_charge_bundle(conn: &Connection, charge_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT course_id FROM manual_charge_courses WHERE charge_id = ?1")?;
    let ids = stmt
        .query_map(params![charge_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

// ============ Transactions ============

pub fn create_transaction(conn: &Connection, input: &CreateTransaction) -> Result<Transaction> {
    if input.amount_cents <= 0 {
        return Err(AppError::BadRequest("amount must be positive".into()));
    }

    let id = EntityType::Transaction.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO transactions (id, tenant_id, student_id, item_type, item_id, external_reference,
                                   gateway, amount_cents, currency, status, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, ?11, ?11)",
        params![
            &id,
            &input.tenant_id,
            &input.student_id,
            input.item_type.as_str(),
            &input.item_id,
            &input.external_reference,
            &input.gateway,
            input.amount_cents,
            &input.currency,
            &input.metadata,
            now
        ],
    )?;

    Ok(Transaction {
        id,
        tenant_id: input.tenant_id.clone(),
        student_id: input.student_id.clone(),
        item_type: input.item_type,
        item_id: input.item_id.clone(),
        external_reference: input.external_reference.clone(),
        gateway: input.gateway.clone(),
        gateway_preference_id: None,
        gateway_payment_id: None,
        amount_cents: input.amount_cents,
        currency: input.currency.clone(),
        status: TransactionStatus::Pending,
        payment_method: None,
        metadata: input.metadata.clone(),
        paid_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_transaction(conn: &Connection, id: &str) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLS),
        &[&id],
    )
}

/// Lookup by the gateway's payment object id (set once a webhook has been
/// reconciled, or never for payments we have not seen yet).
pub fn get_transaction_by_gateway_payment(
    conn: &Connection,
    gateway: &str,
    gateway_payment_id: &str,
) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE gateway = ?1 AND gateway_payment_id = ?2",
            TRANSACTION_COLS
        ),
        &[&gateway, &gateway_payment_id],
    )
}

/// Store the checkout preference/session id assigned by the gateway.
pub fn set_transaction_preference(
    conn: &Connection,
    id: &str,
    gateway_preference_id: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE transactions SET gateway_preference_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![gateway_preference_id, now(), id],
    )?;
    Ok(())
}

/// Outcome of attempting to apply a gateway-reported status.
#[derive(Debug)]
pub enum LedgerOutcome {
    /// The transition was written. `became_paid` tells the caller whether
    /// post-payment side effects are due (true exactly once per
    /// transaction, by CAS construction).
    Applied {
        transaction: Transaction,
        became_paid: bool,
    },
    /// Nothing was written.
    NoOp(LedgerNoOp),
}

/// Why an apply was a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerNoOp {
    /// The row already carries this status (benign redelivery).
    AlreadyApplied,
    /// The edge is not part of the forward-only lifecycle.
    InvalidTransition,
    /// A concurrent writer moved the row first; the winner owns the side
    /// effects.
    LostRace,
}

/// Apply a reconciled status to a previously-read transaction row.
///
/// The update is a compare-and-swap against the status the caller read, so
/// two concurrent reconciliations of the same payment cannot both observe
/// a transition. `paid_at` is stamped only on the edge into `paid`, which
/// the forward-only rules guarantee happens at most once.
///
/// `link_payment_id` is the gateway payment id to persist, or None when it
/// is already set (immutability is the caller's contract; see
/// `reconcile::process_notification`).
pub fn apply_transaction_status(
    conn: &Connection,
    transaction: &Transaction,
    new_status: TransactionStatus,
    link_payment_id: Option<&str>,
    payment_method: Option<&str>,
    snapshot: Option<&str>,
) -> Result<LedgerOutcome> {
    if transaction.status == new_status {
        return Ok(LedgerOutcome::NoOp(LedgerNoOp::AlreadyApplied));
    }
    if !transaction.status.can_transition_to(new_status) {
        return Ok(LedgerOutcome::NoOp(LedgerNoOp::InvalidTransition));
    }

    let ts = now();
    let affected = conn.execute(
        "UPDATE transactions
         SET status = ?2,
             gateway_payment_id = COALESCE(?3, gateway_payment_id),
             payment_method = COALESCE(?4, payment_method),
             metadata = COALESCE(?5, metadata),
             paid_at = CASE WHEN ?2 = 'paid' THEN ?6 ELSE paid_at END,
             updated_at = ?6
         WHERE id = ?1 AND status = ?7",
        params![
            &transaction.id,
            new_status.as_str(),
            link_payment_id,
            payment_method,
            snapshot,
            ts,
            transaction.status.as_str()
        ],
    )?;

    if affected == 0 {
        return Ok(LedgerOutcome::NoOp(LedgerNoOp::LostRace));
    }

    let refreshed = get_transaction(conn, &transaction.id)?.ok_or_else(|| {
        AppError::Internal(format!("transaction {} vanished mid-update", transaction.id))
    })?;

    Ok(LedgerOutcome::Applied {
        became_paid: new_status == TransactionStatus::Paid,
        transaction: refreshed,
    })
}

// ============ Webhook Events (Dedup Store) ============

/// Atomically admit a webhook id for processing.
///
/// A single upsert decides all three cases without a read-then-write gap:
/// a fresh id inserts (attempts = 1), an admitted-but-unprocessed id
/// increments its attempt counter and is admitted again as a retry, and a
/// processed id updates nothing and is refused. Two concurrent deliveries
/// of a processed id can therefore never both proceed.
pub fn admit_webhook_event(
    conn: &Connection,
    id: &str,
    gateway: &str,
    event_type: &str,
    payload: Option<&str>,
) -> Result<Admission> {
    let attempts = conn
        .query_row(
            "INSERT INTO webhook_events (id, gateway, event_type, payload, attempts, processed, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, 0, ?5)
             ON CONFLICT(id) DO UPDATE SET attempts = attempts + 1 WHERE processed = 0
             RETURNING attempts",
            params![id, gateway, event_type, payload, now()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    Ok(match attempts {
        Some(attempts) => Admission::Admitted { attempts },
        None => Admission::AlreadyProcessed,
    })
}

/// Flip the processed flag. Called strictly after the ledger write (or for
/// notifications that will never need one).
pub fn mark_webhook_processed(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE webhook_events SET processed = 1, processed_at = ?2 WHERE id = ?1",
        params![id, now()],
    )?;
    Ok(())
}

pub fn get_webhook_event(conn: &Connection, id: &str) -> Result<Option<WebhookEvent>> {
    query_one(
        conn,
        &format!("SELECT {} FROM webhook_events WHERE id = ?1", WEBHOOK_EVENT_COLS),
        &[&id],
    )
}

/// Next value of the arrival counter for gateways that omit a stable
/// object id. Scoped to (gateway, event_type).
pub fn next_webhook_sequence(conn: &Connection, gateway: &str, event_type: &str) -> Result<i64> {
    let n = conn.query_row(
        "INSERT INTO webhook_counters (gateway, event_type, n) VALUES (?1, ?2, 1)
         ON CONFLICT(gateway, event_type) DO UPDATE SET n = n + 1
         RETURNING n",
        params![gateway, event_type],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(n)
}

/// Purge processed webhook events beyond the retention period. Unprocessed
/// rows are kept: they represent deliveries that never completed and remain
/// retryable. Returns the number of deleted records.
pub fn purge_old_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM webhook_events WHERE processed = 1 AND created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Subscriptions ============

/// Activate the subscription for a paid plan transaction. Keyed UNIQUE on
/// transaction_id, so a replayed activation is a no-op. Returns whether
/// this call created the row.
pub fn activate_subscription(
    conn: &Connection,
    tenant_id: &str,
    student_id: &str,
    plan_id: &str,
    transaction_id: &str,
    start_date: i64,
    end_date: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO subscriptions (id, tenant_id, student_id, plan_id, transaction_id, start_date, end_date, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            EntityType::Subscription.gen_id(),
            tenant_id,
            student_id,
            plan_id,
            transaction_id,
            start_date,
            end_date,
            now()
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_subscription_by_transaction(
    conn: &Connection,
    transaction_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE transaction_id = ?1",
            SUBSCRIPTION_COLS
        ),
        &[&transaction_id],
    )
}

// ============ Course Unlocks ============

/// Grant a student access to a course. Keyed UNIQUE on (student, course);
/// re-grants are no-ops. Returns whether this call created the grant.
pub fn grant_course_unlock(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    transaction_id: Option<&str>,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO course_unlocks (id, student_id, course_id, transaction_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            EntityType::CourseUnlock.gen_id(),
            student_id,
            course_id,
            transaction_id,
            now()
        ],
    )?;
    Ok(affected > 0)
}

pub fn has_course_unlock(conn: &Connection, student_id: &str, course_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM course_unlocks WHERE student_id = ?1 AND course_id = ?2",
            params![student_id, course_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn get_course_unlocks_for_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<CourseUnlock>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM course_unlocks WHERE student_id = ?1 ORDER BY created_at",
            COURSE_UNLOCK_COLS
        ),
        &[&student_id],
    )
}

// ============ Point Awards ============

/// Award loyalty points. Keyed UNIQUE on (student, activity, reference);
/// replays are no-ops. Returns whether this call created the award.
pub fn award_points(
    conn: &Connection,
    student_id: &str,
    activity: &str,
    reference_id: &str,
    points: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO point_awards (id, student_id, activity, reference_id, points, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            EntityType::PointAward.gen_id(),
            student_id,
            activity,
            reference_id,
            points,
            now()
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_point_awards_for_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<PointAward>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM point_awards WHERE student_id = ?1 ORDER BY created_at",
            POINT_AWARD_COLS
        ),
        &[&student_id],
    )
}
