use serde::Serialize;

/// A coach on the platform. Owns a catalog (plans, courses, manual
/// charges) and optionally a tenant-scoped gateway credential set.
#[derive(Debug, Clone, Serialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}
