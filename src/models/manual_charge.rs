use serde::Serialize;

/// A one-off charge a tenant raised against a student outside the regular
/// catalog (e.g. a private mentoring session), optionally bundling course
/// unlocks that are granted on settlement.
#[derive(Debug, Clone, Serialize)]
pub struct ManualCharge {
    pub id: String,
    pub tenant_id: String,
    pub student_id: String,
    pub description: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: ManualChargeStatus,
    /// Linked at checkout-creation time.
    pub transaction_id: Option<String>,
    /// Populated when the charge was raised directly against a gateway
    /// payment rather than through our checkout.
    pub gateway_payment_id: Option<String>,
    pub paid_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualChargeStatus {
    Pending,
    Paid,
}

impl ManualChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

impl std::fmt::Display for ManualChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
