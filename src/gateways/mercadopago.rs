//! MercadoPago gateway adapter.
//!
//! Webhooks arrive in two shapes: modern deliveries carry `type` plus
//! `data.id`, legacy ones carry `topic` plus a top-level `id`. Both are
//! thin; the payment object is always fetched from `/v1/payments/{id}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{ResolvedCredentials, TransactionStatus};

use super::{
    require_success, send_error, CanonicalPayment, CheckoutRequest, CheckoutSession,
    GatewayAdapter, Notification,
};

const API_BASE: &str = "https://api.mercadopago.com";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(rename = "type")]
    event_type: Option<String>,
    topic: Option<String>,
    data: Option<WebhookData>,
    id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    // Numeric in practice, but nothing downstream depends on that.
    id: serde_json::Value,
    status: String,
    external_reference: Option<String>,
    transaction_amount: Option<f64>,
    currency_id: Option<String>,
    payment_method_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct PreferenceRequest {
    items: Vec<PreferenceItem>,
    external_reference: String,
    back_urls: BackUrls,
    auto_return: String,
    notification_url: String,
}

#[derive(Debug, Serialize)]
struct PreferenceItem {
    title: String,
    quantity: u32,
    unit_price: f64,
    currency_id: String,
}

#[derive(Debug, Serialize)]
struct BackUrls {
    success: String,
    failure: String,
    pending: String,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    id: String,
    init_point: String,
    sandbox_init_point: Option<String>,
}

pub struct MercadoPagoGateway {
    client: Client,
    api_base: String,
    timeout: Duration,
}

impl MercadoPagoGateway {
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

/// Fixed mapping from MercadoPago's status vocabulary. Anything unknown
/// maps to `Pending`; no unmapped word can ever reach `Paid`.
fn map_status(raw: &str) -> TransactionStatus {
    match raw {
        "approved" => TransactionStatus::Paid,
        "pending" | "in_process" | "in_mediation" | "authorized" => TransactionStatus::Pending,
        "rejected" => TransactionStatus::Failed,
        "cancelled" => TransactionStatus::Cancelled,
        "refunded" | "charged_back" => TransactionStatus::Refunded,
        _ => TransactionStatus::Pending,
    }
}

fn id_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl GatewayAdapter for MercadoPagoGateway {
    fn name(&self) -> &'static str {
        "mercadopago"
    }

    fn parse_notification(&self, body: &[u8]) -> Result<Notification> {
        let parsed: WebhookBody = serde_json::from_slice(body).map_err(|e| {
            AppError::BadRequest(format!("invalid MercadoPago webhook body: {}", e))
        })?;

        let event_type = parsed
            .event_type
            .or(parsed.topic)
            .unwrap_or_else(|| "unknown".to_string());

        // data.id on modern bodies, top-level id on legacy ones.
        let object_id = parsed
            .data
            .as_ref()
            .and_then(|d| d.id.as_ref())
            .or(parsed.id.as_ref())
            .and_then(id_to_string);

        Ok(if event_type == "payment" {
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
        let url = format!("{}/v1/payments/{}", self.api_base, payment_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&credentials.access_token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| send_error("mercadopago", e))?;

        let response =
            require_success("mercadopago", &format!("payment {}", payment_id), response).await?;

        let payment: PaymentResponse = response.json().await.map_err(|e| {
            AppError::Internal(format!("Failed to parse MercadoPago payment: {}", e))
        })?;

        Ok(CanonicalPayment {
            id: id_to_string(&payment.id).unwrap_or_else(|| payment_id.to_string()),
            status: map_status(&payment.status),
            raw_status: payment.status,
            external_reference: payment.external_reference,
            payment_method: payment.payment_method_id,
            amount_cents: payment.transaction_amount.map(|a| (a * 100.0).round() as i64),
            currency: payment.currency_id,
        })
    }

    async fn create_checkout(
        &self,
        credentials: &ResolvedCredentials,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession> {
        let body = PreferenceRequest {
            items: vec![PreferenceItem {
                title: request.title.clone(),
                quantity: 1,
                unit_price: request.amount_cents as f64 / 100.0,
                currency_id: request.currency.to_uppercase(),
            }],
            external_reference: request.transaction_id.clone(),
            back_urls: BackUrls {
                success: request.back_url.clone(),
                failure: request.back_url.clone(),
                pending: request.back_url.clone(),
            },
            auto_return: "approved".to_string(),
            notification_url: request.notification_url.clone(),
        };

        let response = self
            .client
            .post(format!("{}/checkout/preferences", self.api_base))
            .bearer_auth(&credentials.access_token)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("mercadopago", e))?;

        let response = require_success("mercadopago", "checkout preference", response).await?;

        let preference: PreferenceResponse = response.json().await.map_err(|e| {
            AppError::Internal(format!("Failed to parse MercadoPago preference: {}", e))
        })?;

        let checkout_url = if credentials.sandbox {
            preference
                .sandbox_init_point
                .unwrap_or(preference.init_point)
        } else {
            preference.init_point
        };

        Ok(CheckoutSession {
            preference_id: preference.id,
            checkout_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> MercadoPagoGateway {
        MercadoPagoGateway::new(Client::new())
    }

    #[test]
    fn test_parse_modern_payment_notification() {
        let body = br#"{"type":"payment","data":{"id":"12345678901"}}"#;
        let parsed = adapter().parse_notification(body).unwrap();
        assert_eq!(
            parsed,
            Notification::Payment {
                event_type: "payment".to_string(),
                payment_id: Some("12345678901".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_numeric_payment_id() {
        let body = br#"{"type":"payment","data":{"id":12345678901}}"#;
        let parsed = adapter().parse_notification(body).unwrap();
        assert_eq!(parsed.object_id(), Some("12345678901"));
    }

    #[test]
    fn test_parse_legacy_topic_notification() {
        let body = br#"{"topic":"payment","id":987654}"#;
        let parsed = adapter().parse_notification(body).unwrap();
        assert_eq!(
            parsed,
            Notification::Payment {
                event_type: "payment".to_string(),
                payment_id: Some("987654".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_non_payment_topic_is_ignored() {
        let body = br#"{"topic":"merchant_order","id":555}"#;
        let parsed = adapter().parse_notification(body).unwrap();
        assert_eq!(
            parsed,
            Notification::Ignored {
                event_type: "merchant_order".to_string(),
                object_id: Some("555".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_payment_without_object_id() {
        let body = br#"{"type":"payment"}"#;
        let parsed = adapter().parse_notification(body).unwrap();
        assert_eq!(
            parsed,
            Notification::Payment {
                event_type: "payment".to_string(),
                payment_id: None,
            }
        );
    }

    #[test]
    fn test_parse_body_without_type_or_topic() {
        let body = br#"{"hello":"world"}"#;
        let parsed = adapter().parse_notification(body).unwrap();
        assert_eq!(parsed.event_type(), "unknown");
        assert!(matches!(parsed, Notification::Ignored { .. }));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(adapter().parse_notification(b"not json").is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("approved"), TransactionStatus::Paid);
        assert_eq!(map_status("pending"), TransactionStatus::Pending);
        assert_eq!(map_status("in_process"), TransactionStatus::Pending);
        assert_eq!(map_status("in_mediation"), TransactionStatus::Pending);
        assert_eq!(map_status("authorized"), TransactionStatus::Pending);
        assert_eq!(map_status("rejected"), TransactionStatus::Failed);
        assert_eq!(map_status("cancelled"), TransactionStatus::Cancelled);
        assert_eq!(map_status("refunded"), TransactionStatus::Refunded);
        assert_eq!(map_status("charged_back"), TransactionStatus::Refunded);
    }

    #[test]
    fn test_unmapped_status_never_becomes_paid() {
        for raw in ["unknown_new_status", "", "APPROVED", "paid"] {
            assert_eq!(map_status(raw), TransactionStatus::Pending);
        }
    }
}
