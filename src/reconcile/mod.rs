//! Webhook reconciliation pipeline.
//!
//! One inbound delivery flows through five stations: dedup admission,
//! gateway classification, credential resolution, an authoritative fetch
//! from the gateway read API, and a compare-and-swap ledger write. The
//! post-payment orchestrator runs exactly when that write transitions a
//! transaction into `paid`. Marking the webhook processed is strictly the
//! last step, so a crash anywhere leaves the delivery retryable and every
//! station is built to be re-run.

pub mod orchestrator;

use std::sync::Arc;

use crate::db::{queries, AppState};
use crate::db::queries::{LedgerNoOp, LedgerOutcome};
use crate::error::{AppError, Result};
use crate::gateways::{GatewayAdapter, Notification};
use crate::models::Admission;

/// Outcome of processing one webhook delivery. Both variants answer the
/// gateway with HTTP 200; `Skipped` carries the reason into the response
/// body and the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The delivery reached the ledger (a transition or a recorded no-op)
    /// and was marked processed.
    Processed,
    /// The delivery had nothing to reconcile; marked processed so
    /// redeliveries short-circuit.
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// This webhook id already completed the pipeline.
    AlreadyProcessed,
    /// The event type carries no payment to reconcile.
    EventIgnored,
    /// The payment matches no transaction this system knows.
    TransactionNotFound,
    /// The gateway has no such payment under any credentials we can
    /// resolve, and no local link names a tenant to try.
    PaymentNotResolvable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyProcessed => "already_processed",
            SkipReason::EventIgnored => "event_ignored",
            SkipReason::TransactionNotFound => "transaction_not_found",
            SkipReason::PaymentNotResolvable => "payment_not_resolvable",
        }
    }
}

/// Process one raw webhook delivery end to end.
///
/// Any error return leaves the webhook event unprocessed (admitted but not
/// marked), which is the retry contract: the gateway redelivers on non-2xx
/// and the next attempt is re-admitted.
pub async fn process_notification(
    state: &AppState,
    adapter: &Arc<dyn GatewayAdapter>,
    body: &[u8],
) -> Result<ReconcileOutcome> {
    let gateway = adapter.name();
    let notification = adapter.parse_notification(body)?;

    let conn = state.db.get()?;

    // The webhook id is a readable composite so operators can eyeball the
    // dedup table. Events without a stable object id fall back to an
    // arrival counter: distinct deliveries of the same logical event then
    // get distinct ids and dedup degrades to at-least-once, which the
    // idempotent orchestrator absorbs.
    let webhook_id = match notification.object_id() {
        Some(object_id) => format!("{}:{}:{}", gateway, notification.event_type(), object_id),
        None => {
            let seq = queries::next_webhook_sequence(&conn, gateway, notification.event_type())?;
            format!("{}:{}:seq:{}", gateway, notification.event_type(), seq)
        }
    };

    let payload = std::str::from_utf8(body).ok();
    match queries::admit_webhook_event(
        &conn,
        &webhook_id,
        gateway,
        notification.event_type(),
        payload,
    )? {
        Admission::AlreadyProcessed => {
            tracing::info!("Webhook {} already processed, skipping", webhook_id);
            return Ok(ReconcileOutcome::Skipped(SkipReason::AlreadyProcessed));
        }
        Admission::Admitted { attempts } if attempts > 1 => {
            tracing::info!("Webhook {} re-admitted (attempt {})", webhook_id, attempts);
        }
        Admission::Admitted { .. } => {}
    }

    let payment_id = match notification {
        Notification::Ignored { event_type, .. } => {
            tracing::debug!("{} event '{}' ignored", gateway, event_type);
            queries::mark_webhook_processed(&conn, &webhook_id)?;
            return Ok(ReconcileOutcome::Skipped(SkipReason::EventIgnored));
        }
        Notification::Payment {
            payment_id: None, ..
        } => {
            tracing::warn!(
                "{} payment event {} carries no object id, nothing to fetch",
                gateway,
                webhook_id
            );
            queries::mark_webhook_processed(&conn, &webhook_id)?;
            return Ok(ReconcileOutcome::Skipped(SkipReason::PaymentNotResolvable));
        }
        Notification::Payment {
            payment_id: Some(id),
            ..
        } => id,
    };

    // Credential attempt order: a previously linked transaction names the
    // tenant; without one, the platform default is the only path.
    let linked = queries::get_transaction_by_gateway_payment(&conn, gateway, &payment_id)?;
    let tenant_id = linked.as_ref().map(|t| t.tenant_id.clone());
    let credentials =
        state
            .credentials
            .resolve(&conn, &state.master_key, tenant_id.as_deref(), gateway)?;

    // The pooled connection is not held across the gateway round trip.
    drop(conn);
    let fetched = adapter.fetch_payment(&credentials, &payment_id).await;
    let conn = state.db.get()?;

    let payment = match fetched {
        Ok(payment) => payment,
        Err(AppError::NotFound(what)) if tenant_id.is_none() => {
            tracing::warn!(
                "{} has no payment {} under platform credentials ({}); no tenant to try",
                gateway,
                payment_id,
                what
            );
            queries::mark_webhook_processed(&conn, &webhook_id)?;
            return Ok(ReconcileOutcome::Skipped(SkipReason::PaymentNotResolvable));
        }
        Err(AppError::NotFound(what)) => {
            // A linked transaction exists, so the payment was fetchable
            // once. Surface as an error and let the gateway redeliver.
            return Err(AppError::Internal(format!(
                "{} reported missing payment {} for linked transaction ({})",
                gateway, payment_id, what
            )));
        }
        Err(e) => return Err(e),
    };

    let transaction = match linked {
        Some(transaction) => Some(transaction),
        None => match payment.external_reference.as_deref() {
            Some(reference) => queries::get_transaction(&conn, reference)?,
            None => None,
        },
    };

    let transaction = match transaction {
        Some(transaction) if transaction.gateway != gateway => {
            tracing::warn!(
                "{} payment {} references transaction {} created for gateway {}",
                gateway,
                payment.id,
                transaction.id,
                transaction.gateway
            );
            queries::mark_webhook_processed(&conn, &webhook_id)?;
            return Ok(ReconcileOutcome::Skipped(SkipReason::TransactionNotFound));
        }
        Some(transaction) => transaction,
        None => {
            tracing::warn!(
                "{} payment {} (status '{}') matches no transaction",
                gateway,
                payment.id,
                payment.raw_status
            );
            queries::mark_webhook_processed(&conn, &webhook_id)?;
            return Ok(ReconcileOutcome::Skipped(SkipReason::TransactionNotFound));
        }
    };

    // The first webhook for a payment links its gateway id permanently; a
    // later webhook naming a different id is logged and never overwrites.
    let link_payment_id = match transaction.gateway_payment_id.as_deref() {
        None => Some(payment.id.as_str()),
        Some(existing) if existing == payment.id => None,
        Some(existing) => {
            tracing::error!(
                "Transaction {} is linked to {} payment {}, webhook carried {}; keeping the stored id",
                transaction.id,
                gateway,
                existing,
                payment.id
            );
            None
        }
    };

    let snapshot = serde_json::json!({
        "gateway": gateway,
        "payment_id": payment.id,
        "status": payment.raw_status,
        "amount_cents": payment.amount_cents,
        "currency": payment.currency,
    })
    .to_string();

    let outcome = queries::apply_transaction_status(
        &conn,
        &transaction,
        payment.status,
        link_payment_id,
        payment.payment_method.as_deref(),
        Some(&snapshot),
    )?;

    match outcome {
        LedgerOutcome::NoOp(reason) => {
            match reason {
                LedgerNoOp::AlreadyApplied => tracing::debug!(
                    "Transaction {} already {}, redelivery absorbed",
                    transaction.id,
                    transaction.status
                ),
                LedgerNoOp::InvalidTransition => tracing::warn!(
                    "Rejected transition {} -> {} for transaction {} (not forward progress)",
                    transaction.status,
                    payment.status,
                    transaction.id
                ),
                LedgerNoOp::LostRace => tracing::info!(
                    "Transaction {} was updated concurrently; this delivery yields",
                    transaction.id
                ),
            }
            queries::mark_webhook_processed(&conn, &webhook_id)?;
            Ok(ReconcileOutcome::Processed)
        }
        LedgerOutcome::Applied {
            transaction,
            became_paid,
        } => {
            tracing::info!(
                "Transaction {} -> {} via {} payment {} (gateway status '{}')",
                transaction.id,
                transaction.status,
                gateway,
                payment.id,
                payment.raw_status
            );

            if became_paid {
                orchestrator::run_post_payment(state, &conn, &transaction);
            }

            queries::mark_webhook_processed(&conn, &webhook_id)?;
            Ok(ReconcileOutcome::Processed)
        }
    }
}
