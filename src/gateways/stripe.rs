//! Stripe gateway adapter.
//!
//! Reconciliation is charge-based: webhook envelopes for `charge.*` events
//! carry the charge id, and the authoritative state comes from
//! `/v1/charges/{id}`. The transaction id travels in charge metadata under
//! `external_reference`, planted there at checkout creation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{ResolvedCredentials, TransactionStatus};

use super::{
    require_success, send_error, CanonicalPayment, CheckoutRequest, CheckoutSession,
    GatewayAdapter, Notification,
};

const API_BASE: &str = "https://api.stripe.com";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(rename = "type")]
    event_type: Option<String>,
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: Option<EnvelopeObject>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeObject {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
    status: String,
    refunded: Option<bool>,
    amount: Option<i64>,
    currency: Option<String>,
    metadata: Option<HashMap<String, String>>,
    payment_method_details: Option<PaymentMethodDetails>,
}

#[derive(Debug, Deserialize)]
struct PaymentMethodDetails {
    #[serde(rename = "type")]
    method_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: String,
}

pub struct StripeGateway {
    client: Client,
    api_base: String,
    timeout: Duration,
}

impl StripeGateway {
    pub fn new(client: Client) -> Self {
        Self::with_api_base(client, API_BASE)
    }

    /// Point the adapter at a different API host (used by tests).
    pub fn with_api_base(client: Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The refunded flag wins over the charge status; otherwise unmapped
/// statuses stay `Pending` and can never reach `Paid`.
fn map_status(raw: &str, refunded: bool) -> TransactionStatus {
    if refunded {
        return TransactionStatus::Refunded;
    }
    match raw {
        "succeeded" => TransactionStatus::Paid,
        "pending" => TransactionStatus::Pending,
        "failed" => TransactionStatus::Failed,
        _ => TransactionStatus::Pending,
    }
}

#[async_trait]
impl GatewayAdapter for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn parse_notification(&self, body: &[u8]) -> Result<Notification> {
        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("invalid Stripe webhook body: {}", e)))?;

        let event_type = envelope
            .event_type
            .unwrap_or_else(|| "unknown".to_string());
        let object_id = envelope
            .data
            .and_then(|d| d.object)
            .and_then(|o| o.id)
            .filter(|id| !id.is_empty());

        Ok(if event_type.starts_with("charge.") {
            Notification::Payment {
                event_type,
                payment_id: object_id,
            }
        } else {
            Notification::Ignored {
                event_type,
                object_id,
            }
        })
    }

    async fn fetch_payment(
        &self,
        credentials: &ResolvedCredentials,
        payment_id: &str,
    ) -> Result<CanonicalPayment> {
        let url = format!("{}/v1/charges/{}", self.api_base, payment_id);
        let response = self
            .client
            .get(&url)
            .basic_auth(&credentials.access_token, None::<&str>)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| send_error("stripe", e))?;

        let response =
            require_success("stripe", &format!("charge {}", payment_id), response).await?;

        let charge: ChargeResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse Stripe charge: {}", e)))?;

        let refunded = charge.refunded.unwrap_or(false);
        let external_reference = charge
            .metadata
            .as_ref()
            .and_then(|m| m.get("external_reference"))
            .cloned();

        Ok(CanonicalPayment {
            id: charge.id,
            status: map_status(&charge.status, refunded),
            raw_status: if refunded {
                format!("{} (refunded)", charge.status)
            } else {
                charge.status
            },
            external_reference,
            payment_method: charge
                .payment_method_details
                .and_then(|d| d.method_type),
            amount_cents: charge.amount,
            currency: charge.currency,
        })
    }

    async fn create_checkout(
        &self,
        credentials: &ResolvedCredentials,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession> {
        let amount = request.amount_cents.to_string();
        let currency = request.currency.to_lowercase();

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&credentials.access_token, None::<&str>)
            .timeout(self.timeout)
            .form(&[
                ("mode", "payment"),
                ("success_url", request.back_url.as_str()),
                ("cancel_url", request.back_url.as_str()),
                ("line_items[0][price_data][currency]", currency.as_str()),
                (
                    "line_items[0][price_data][product_data][name]",
                    request.title.as_str(),
                ),
                ("line_items[0][price_data][unit_amount]", amount.as_str()),
                ("line_items[0][quantity]", "1"),
                (
                    "metadata[external_reference]",
                    request.transaction_id.as_str(),
                ),
                // Propagated to the payment intent so the resulting charge
                // carries the reference too.
                (
                    "payment_intent_data[metadata][external_reference]",
                    request.transaction_id.as_str(),
                ),
            ])
            .send()
            .await
            .map_err(|e| send_error("stripe", e))?;

        let response = require_success("stripe", "checkout session", response).await?;

        let session: CheckoutSessionResponse = response.json().await.map_err(|e| {
            AppError::Internal(format!("Failed to parse Stripe checkout session: {}", e))
        })?;

        Ok(CheckoutSession {
            preference_id: session.id,
            checkout_url: session.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> StripeGateway {
        StripeGateway::new(Client::new())
    }

    #[test]
    fn test_parse_charge_event() {
        let body = br#"{"type":"charge.succeeded","data":{"object":{"id":"ch_3abc"}}}"#;
        let parsed = adapter().parse_notification(body).unwrap();
        assert_eq!(
            parsed,
            Notification::Payment {
                event_type: "charge.succeeded".to_string(),
                payment_id: Some("ch_3abc".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_refund_event_is_payment_bearing() {
        let body = br#"{"type":"charge.refunded","data":{"object":{"id":"ch_3abc"}}}"#;
        let parsed = adapter().parse_notification(body).unwrap();
        assert!(matches!(parsed, Notification::Payment { .. }));
    }

    #[test]
    fn test_parse_non_charge_event_is_ignored() {
        let body = br#"{"type":"customer.subscription.deleted","data":{"object":{"id":"sub_1"}}}"#;
        let parsed = adapter().parse_notification(body).unwrap();
        assert_eq!(
            parsed,
            Notification::Ignored {
                event_type: "customer.subscription.deleted".to_string(),
                object_id: Some("sub_1".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(adapter().parse_notification(b"{oops").is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("succeeded", false), TransactionStatus::Paid);
        assert_eq!(map_status("pending", false), TransactionStatus::Pending);
        assert_eq!(map_status("failed", false), TransactionStatus::Failed);
    }

    #[test]
    fn test_refunded_flag_wins_over_status() {
        assert_eq!(map_status("succeeded", true), TransactionStatus::Refunded);
    }

    #[test]
    fn test_unmapped_status_never_becomes_paid() {
        for raw in ["requires_capture", "", "SUCCEEDED"] {
            assert_eq!(map_status(raw, false), TransactionStatus::Pending);
        }
    }
}
