//! Checkout-session creation.
//!
//! The reconciliation engine depends on the contract established here: the
//! pending transaction row is persisted before the gateway checkout is
//! created, and the gateway's `external_reference` is set to the
//! transaction's own id so a later webhook can always be correlated back.

use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::Json;
use crate::gateways::{CheckoutRequest, DEFAULT_GATEWAY};
use crate::models::{CreateTransaction, ManualChargeStatus, PaymentItemType};

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub tenant_id: String,
    pub student_id: String,
    pub item_type: PaymentItemType,
    /// Plan / course / manual charge id, depending on `item_type`.
    pub item_id: String,
    /// Gateway to collect through; the platform default when absent.
    #[serde(default)]
    pub gateway: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub transaction_id: String,
    pub checkout_url: String,
    pub preference_id: String,
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutBody>,
) -> Result<Json<CheckoutResponse>> {
    let gateway = request.gateway.as_deref().unwrap_or(DEFAULT_GATEWAY);
    let adapter = state
        .gateways
        .get(gateway)
        .ok_or_else(|| AppError::BadRequest(format!("unknown gateway '{}'", gateway)))?
        .clone();

    let conn = state.db.get()?;

    queries::get_tenant(&conn, &request.tenant_id)?.or_not_found(msg::TENANT)?;

    // Price and title come from the catalog, never from the request.
    let (title, amount_cents, currency) = match request.item_type {
        PaymentItemType::Plan => {
            let plan = queries::get_plan(&conn, &request.item_id)?.or_not_found(msg::PLAN)?;
            if plan.tenant_id != request.tenant_id {
                return Err(AppError::BadRequest(
                    "plan does not belong to this tenant".into(),
                ));
            }
            (plan.name, plan.price_cents, plan.currency)
        }
        PaymentItemType::Course => {
            let course =
                queries::get_course(&conn, &request.item_id)?.or_not_found(msg::COURSE)?;
            if course.tenant_id != request.tenant_id {
                return Err(AppError::BadRequest(
                    "course does not belong to this tenant".into(),
                ));
            }
            (course.name, course.price_cents, course.currency)
        }
        PaymentItemType::ManualCharge => {
            let charge = queries::get_manual_charge(&conn, &request.item_id)?
                .or_not_found(msg::MANUAL_CHARGE)?;
            if charge.tenant_id != request.tenant_id {
                return Err(AppError::BadRequest(
                    "charge does not belong to this tenant".into(),
                ));
            }
            if charge.student_id != request.student_id {
                return Err(AppError::BadRequest(
                    "charge was raised against a different student".into(),
                ));
            }
            if charge.status == ManualChargeStatus::Paid {
                return Err(AppError::Conflict("charge is already paid".into()));
            }
            (charge.description, charge.amount_cents, charge.currency)
        }
    };

    // Pending row first: the webhook that confirms this payment may arrive
    // before the checkout response reaches the student.
    let transaction = queries::create_transaction(
        &conn,
        &CreateTransaction {
            tenant_id: request.tenant_id.clone(),
            student_id: request.student_id.clone(),
            item_type: request.item_type,
            item_id: request.item_id.clone(),
            external_reference: request.item_id.clone(),
            gateway: gateway.to_string(),
            amount_cents,
            currency: currency.clone(),
            metadata: None,
        },
    )?;

    if request.item_type == PaymentItemType::ManualCharge {
        queries::link_manual_charge_transaction(&conn, &request.item_id, &transaction.id)?;
    }

    let credentials = state.credentials.resolve(
        &conn,
        &state.master_key,
        Some(&request.tenant_id),
        gateway,
    )?;

    // The pooled connection is not held across the gateway round trip.
    drop(conn);
    let session = adapter
        .create_checkout(
            &credentials,
            &CheckoutRequest {
                transaction_id: transaction.id.clone(),
                title,
                amount_cents,
                currency,
                back_url: format!("{}/checkout/return", state.base_url),
                notification_url: format!("{}/webhooks/{}", state.base_url, gateway),
            },
        )
        .await?;

    let conn = state.db.get()?;
    queries::set_transaction_preference(&conn, &transaction.id, &session.preference_id)?;

    tracing::info!(
        "Checkout created: transaction={}, gateway={}, preference={}",
        transaction.id,
        gateway,
        session.preference_id
    );

    Ok(Json(CheckoutResponse {
        transaction_id: transaction.id,
        checkout_url: session.checkout_url,
        preference_id: session.preference_id,
    }))
}
