use serde::Serialize;

/// A loyalty point award. Keyed UNIQUE on (student, activity, reference)
/// so replayed reconciliations can never double-award.
#[derive(Debug, Clone, Serialize)]
pub struct PointAward {
    pub id: String,
    pub student_id: String,
    pub activity: String,
    /// Natural key within the activity, e.g. the transaction id for
    /// purchase awards.
    pub reference_id: String,
    pub points: i64,
    pub created_at: i64,
}
