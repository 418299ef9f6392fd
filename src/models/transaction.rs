use serde::{Deserialize, Serialize};

/// A single purchase attempt by a student against a tenant's catalog.
///
/// Created `pending` at checkout time and driven forward exclusively by
/// gateway reconciliation. The gateway-side checkout is created with
/// `external_reference` set to `id`, so inbound payment objects can always
/// be correlated back to this row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub tenant_id: String,
    pub student_id: String,

    // What was purchased
    pub item_type: PaymentItemType,
    pub item_id: String,
    /// Id of the record the student initiated checkout against
    /// (plan / course / manual charge id).
    pub external_reference: String,

    // Gateway linkage
    pub gateway: String,
    /// Checkout preference/session id, assigned at creation.
    pub gateway_preference_id: Option<String>,
    /// Gateway payment object id. Set at most once; never overwritten.
    pub gateway_payment_id: Option<String>,

    // Amounts (cents)
    pub amount_cents: i64,
    pub currency: String,

    // State
    pub status: TransactionStatus,
    pub payment_method: Option<String>,
    /// Last authoritative gateway snapshot (JSON).
    pub metadata: Option<String>,

    /// Stamped exactly once, on the transition into `paid`.
    pub paid_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Data required to create a new (pending) transaction
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransaction {
    pub tenant_id: String,
    pub student_id: String,
    pub item_type: PaymentItemType,
    pub item_id: String,
    pub external_reference: String,
    pub gateway: String,
    pub amount_cents: i64,
    pub currency: String,
    pub metadata: Option<String>,
}

/// Lifecycle state of a transaction.
///
/// The state machine is forward-only:
/// `pending -> {paid, failed, cancelled}` and `paid -> refunded`.
/// Every other edge is rejected as a no-op by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is an allowed forward edge.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Paid | Self::Failed | Self::Cancelled
            ) | (Self::Paid, Self::Refunded)
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What kind of catalog record a transaction pays for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentItemType {
    Plan,
    Course,
    ManualCharge,
}

impl PaymentItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Course => "course",
            Self::ManualCharge => "manual_charge",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(Self::Plan),
            "course" => Some(Self::Course),
            "manual_charge" => Some(Self::ManualCharge),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
