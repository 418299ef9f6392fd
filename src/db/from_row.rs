//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! This module provides a `FromRow` trait that models can implement to
//! define how they are constructed from database rows, plus helper functions
//! for common query patterns.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse failures to
/// rusqlite errors.
///
/// This provides graceful error handling instead of panicking when the
/// database contains invalid enum values (from corruption, migration
/// errors, etc.).
fn parse_enum<T>(
    row: &Row,
    col: usize,
    col_name: &str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let s: String = row.get(col)?;
    parse(&s).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    /// Construct an instance from a database row.
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const TENANT_COLS: &str = "id, name, created_at";

pub const CREDENTIAL_COLS: &str =
    "id, tenant_id, gateway, access_token, sandbox, created_at, updated_at";

pub const PLAN_COLS: &str = "id, tenant_id, name, interval, price_cents, currency, created_at";

pub const COURSE_COLS: &str = "id, tenant_id, name, price_cents, currency, created_at";

pub const MANUAL_CHARGE_COLS: &str = "id, tenant_id, student_id, description, amount_cents, currency, status, transaction_id, gateway_payment_id, paid_at, created_at, updated_at";

pub const TRANSACTION_COLS: &str = "id, tenant_id, student_id, item_type, item_id, external_reference, gateway, gateway_preference_id, gateway_payment_id, amount_cents, currency, status, payment_method, metadata, paid_at, created_at, updated_at";

pub const WEBHOOK_EVENT_COLS: &str =
    "id, gateway, event_type, payload, attempts, processed, created_at, processed_at";

pub const SUBSCRIPTION_COLS: &str =
    "id, tenant_id, student_id, plan_id, transaction_id, start_date, end_date, created_at";

pub const COURSE_UNLOCK_COLS: &str = "id, student_id, course_id, transaction_id, created_at";

pub const POINT_AWARD_COLS: &str = "id, student_id, activity, reference_id, points, created_at";

// ============ FromRow Implementations ============

impl FromRow for Tenant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Tenant {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
        })
    }
}

impl FromRow for GatewayCredential {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(GatewayCredential {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            gateway: row.get(2)?,
            access_token_enc: row.get(3)?,
            sandbox: row.get::<_, i32>(4)? != 0,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

impl FromRow for Plan {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Plan {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            interval: {
                // Rows predating the CHECK constraint may carry arbitrary
                // interval strings; those bill as monthly.
                let raw: String = row.get(3)?;
                PlanInterval::from_str(&raw).unwrap_or_else(|| {
                    tracing::warn!("Unknown plan interval '{}', treating as monthly", raw);
                    PlanInterval::Monthly
                })
            },
            price_cents: row.get(4)?,
            currency: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for Course {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Course {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            price_cents: row.get(3)?,
            currency: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for ManualCharge {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ManualCharge {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            student_id: row.get(2)?,
            description: row.get(3)?,
            amount_cents: row.get(4)?,
            currency: row.get(5)?,
            status: parse_enum(row, 6, "status", ManualChargeStatus::from_str)?,
            transaction_id: row.get(7)?,
            gateway_payment_id: row.get(8)?,
            paid_at: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl FromRow for Transaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Transaction {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            student_id: row.get(2)?,
            item_type: parse_enum(row, 3, "item_type", PaymentItemType::from_str)?,
            item_id: row.get(4)?,
            external_reference: row.get(5)?,
            gateway: row.get(6)?,
            gateway_preference_id: row.get(7)?,
            gateway_payment_id: row.get(8)?,
            amount_cents: row.get(9)?,
            currency: row.get(10)?,
            status: parse_enum(row, 11, "status", TransactionStatus::from_str)?,
            payment_method: row.get(12)?,
            metadata: row.get(13)?,
            paid_at: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

impl FromRow for WebhookEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookEvent {
            id: row.get(0)?,
            gateway: row.get(1)?,
            event_type: row.get(2)?,
            payload: row.get(3)?,
            attempts: row.get(4)?,
            processed: row.get::<_, i32>(5)? != 0,
            created_at: row.get(6)?,
            processed_at: row.get(7)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            student_id: row.get(2)?,
            plan_id: row.get(3)?,
            transaction_id: row.get(4)?,
            start_date: row.get(5)?,
            end_date: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for CourseUnlock {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CourseUnlock {
            id: row.get(0)?,
            student_id: row.get(1)?,
            course_id: row.get(2)?,
            transaction_id: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for PointAward {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PointAward {
            id: row.get(0)?,
            student_id: row.get(1)?,
            activity: row.get(2)?,
            reference_id: row.get(3)?,
            points: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}
