use serde::Serialize;

/// An activated plan subscription.
///
/// Activation is keyed UNIQUE on `transaction_id`: one paid transaction
/// activates at most one subscription, no matter how many times the paid
/// reconciliation replays.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: String,
    pub tenant_id: String,
    pub student_id: String,
    pub plan_id: String,
    pub transaction_id: String,
    pub start_date: i64,
    /// start_date + one plan interval.
    pub end_date: i64,
    pub created_at: i64,
}
