use serde::Serialize;

/// A one-time-purchase course in a tenant's catalog.
#[derive(Debug, Clone, Serialize)]
pub struct Course {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub created_at: i64,
}

/// A student's access grant to a course. At most one row per
/// (student, course); re-grants are no-ops.
#[derive(Debug, Clone, Serialize)]
pub struct CourseUnlock {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    /// Transaction that caused the grant, when known.
    pub transaction_id: Option<String>,
    pub created_at: i64,
}
