//! Inbound webhook intake.
//!
//! `POST /webhooks/{gateway}` receives gateway notifications; a bare
//! `POST /webhooks` goes to the default gateway. Both admit-or-skip paths
//! answer 200 so the gateway stops redelivering; any processing failure
//! answers 500 and relies on gateway redelivery as the retry mechanism.
//! `GET` on the same paths is a liveness probe.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;

use crate::db::AppState;
use crate::error::{msg, AppError, Result};
use crate::extractors::{Json, Path};
use crate::gateways::GatewayAdapter;
use crate::reconcile::{self, ReconcileOutcome};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub success: bool,
    /// Why nothing was reconciled, when the 200 is an admit-or-skip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<&'static str>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/webhooks",
            post(handle_default_webhook).get(liveness),
        )
        .route(
            "/webhooks/{gateway}",
            post(handle_webhook).get(liveness),
        )
}

async fn liveness() -> &'static str {
    "tally webhook intake: ok"
}

pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let adapter = state
        .gateways
        .get(&gateway)
        .ok_or_else(|| AppError::NotFound(format!("{} '{}'", msg::GATEWAY, gateway)))?
        .clone();
    process(state, adapter, body).await
}

pub async fn handle_default_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let adapter = state
        .gateways
        .default_adapter()
        .ok_or_else(|| AppError::Internal("no default gateway registered".into()))?
        .clone();
    process(state, adapter, body).await
}

async fn process(
    state: AppState,
    adapter: Arc<dyn GatewayAdapter>,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    match reconcile::process_notification(&state, &adapter, &body).await? {
        ReconcileOutcome::Processed => Ok(Json(WebhookAck {
            success: true,
            skipped: None,
        })),
        ReconcileOutcome::Skipped(reason) => Ok(Json(WebhookAck {
            success: true,
            skipped: Some(reason.as_str()),
        })),
    }
}
