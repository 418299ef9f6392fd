use serde::Serialize;

/// An admitted gateway notification, keyed by its derived webhook id.
///
/// `processed` flips exactly once, after the ledger write for the
/// notification has succeeded (or the notification was classified as one
/// that will never need a retry). Everything between admission and that
/// flip is retryable.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Derived identity, e.g. `mercadopago:payment:12345`.
    pub id: String,
    pub gateway: String,
    pub event_type: String,
    /// Raw request body as received, kept for operator forensics.
    pub payload: Option<String>,
    /// Delivery count observed for this id (redeliveries increment it).
    pub attempts: i64,
    pub processed: bool,
    pub created_at: i64,
    pub processed_at: Option<i64>,
}

/// Outcome of admitting a webhook id through the dedup store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The id may be processed now. `attempts > 1` means an earlier
    /// delivery was admitted but never marked processed; downstream steps
    /// are idempotent, which is what makes re-running them safe.
    Admitted { attempts: i64 },
    /// The id was already fully processed; short-circuit.
    AlreadyProcessed,
}

impl Admission {
    pub fn is_retry(&self) -> bool {
        matches!(self, Admission::Admitted { attempts } if *attempts > 1)
    }
}
