//! Payment gateway adapters.
//!
//! Each adapter translates one gateway's webhook and API vocabulary into
//! the canonical payment model. Webhook bodies are treated as thin
//! pointers: adapters only extract identifiers from them and always fetch
//! the authoritative payment state from the gateway's read API before any
//! ledger write.

mod mercadopago;
mod stripe;

pub use mercadopago::MercadoPagoGateway;
pub use stripe::StripeGateway;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::{AppError, Result};
use crate::models::{ResolvedCredentials, TransactionStatus};

/// Gateway used when the webhook URL carries no gateway segment.
pub const DEFAULT_GATEWAY: &str = "mercadopago";

/// Classified webhook body. Only identifiers are taken from the body;
/// payment state never is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A payment-bearing event. `payment_id` keys the gateway read API;
    /// None means the gateway sent no usable object id.
    Payment {
        event_type: String,
        payment_id: Option<String>,
    },
    /// Recognized but carries nothing to reconcile (subscription churn,
    /// test pings, etc.). Still recorded in the dedup store.
    Ignored {
        event_type: String,
        object_id: Option<String>,
    },
}

impl Notification {
    pub fn event_type(&self) -> &str {
        match self {
            Notification::Payment { event_type, .. } => event_type,
            Notification::Ignored { event_type, .. } => event_type,
        }
    }

    pub fn object_id(&self) -> Option<&str> {
        match self {
            Notification::Payment { payment_id, .. } => payment_id.as_deref(),
            Notification::Ignored { object_id, .. } => object_id.as_deref(),
        }
    }
}

/// Authoritative payment state fetched from a gateway read API.
#[derive(Debug, Clone)]
pub struct CanonicalPayment {
    /// The gateway's id for the payment object.
    pub id: String,
    /// Gateway status mapped into the canonical lifecycle.
    pub status: TransactionStatus,
    /// The gateway's own status word, kept for logging.
    pub raw_status: String,
    /// Our transaction id, echoed back from checkout creation.
    pub external_reference: Option<String>,
    pub payment_method: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
}

/// Input for creating a hosted checkout.
#[derive(Debug)]
pub struct CheckoutRequest {
    /// Transaction id; the adapter must pass it through as the gateway's
    /// external reference so webhooks can be correlated later.
    pub transaction_id: String,
    /// Item description shown on the gateway's payment page.
    pub title: String,
    pub amount_cents: i64,
    pub currency: String,
    /// Where the payer lands after completing or abandoning payment.
    pub back_url: String,
    /// Where the gateway should deliver webhooks for this payment.
    pub notification_url: String,
}

/// A created checkout session.
#[derive(Debug)]
pub struct CheckoutSession {
    /// The gateway's id for the checkout (preference/session id).
    pub preference_id: String,
    /// URL the payer is redirected to.
    pub checkout_url: String,
}

/// One payment gateway's protocol, behind a uniform interface.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Name used in URLs, webhook ids, and the credential store.
    fn name(&self) -> &'static str;

    /// Classify a raw webhook body. Unknown event types classify as
    /// `Ignored`; only an unparseable body is an error.
    fn parse_notification(&self, body: &[u8]) -> Result<Notification>;

    /// Fetch the authoritative payment object. Calls are bounded by the
    /// adapter's request timeout; a timeout surfaces as
    /// `GatewayUnreachable` so the delivery stays retryable.
    async fn fetch_payment(
        &self,
        credentials: &ResolvedCredentials,
        payment_id: &str,
    ) -> Result<CanonicalPayment>;

    /// Create a hosted checkout for a pending transaction.
    async fn create_checkout(
        &self,
        credentials: &ResolvedCredentials,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession>;
}

/// Adapters registered at startup, keyed by gateway name.
pub struct GatewayRegistry {
    adapters: HashMap<&'static str, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn GatewayAdapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn GatewayAdapter>> {
        self.adapters.get(name)
    }

    /// Adapter for bare `/webhooks` deliveries.
    pub fn default_adapter(&self) -> Option<&Arc<dyn GatewayAdapter>> {
        self.get(DEFAULT_GATEWAY)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.adapters.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a transport-level failure. Timeouts and connection errors both
/// leave the delivery unprocessed, so the gateway redelivers later.
pub(crate) fn send_error(gateway: &str, e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::GatewayUnreachable(format!("{} request timed out", gateway))
    } else {
        AppError::GatewayUnreachable(format!("{} request failed: {}", gateway, e))
    }
}

/// Classify a non-2xx gateway response. 401/403 means the stored
/// credentials do not work at the gateway; 404 means the referenced object
/// does not exist under these credentials.
pub(crate) async fn require_success(
    gateway: &str,
    what: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(AppError::CredentialsInvalid(format!(
            "{} rejected the access token ({})",
            gateway, status
        )));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(AppError::NotFound(format!("{} {}", gateway, what)));
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::GatewayUnreachable(format!(
        "{} returned {}: {}",
        gateway, status, body
    )))
}
