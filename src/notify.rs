//! Outbound notification dispatch.
//!
//! When configured via `TALLY_NOTIFY_WEBHOOK_URL`, payment events are
//! forwarded to an external notification service that owns the actual
//! delivery channels (push, email, in-app). Dispatch is fire-and-forget:
//! delivery is at-least-once at best and never blocks or rolls back the
//! payment pipeline.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;

/// Retry delays in milliseconds for notification dispatch.
/// Quick retries (100ms, 200ms) so a flaky receiver cannot pile up tasks.
const NOTIFY_RETRY_DELAYS: &[u64] = &[100, 200];

/// A notification handed to the external service.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    /// Recipient ids (tenant or student ids, resolved by the receiver).
    pub recipients: Vec<String>,
    pub title: String,
    pub message: String,
    /// Structured payload for the receiving side.
    pub metadata: serde_json::Value,
}

/// Spawn a fire-and-forget notification dispatch.
///
/// If no webhook URL is configured, this is a no-op. The event is sent in
/// a background task and failures don't affect the caller. Panics in the
/// spawned task are logged rather than silently swallowed.
pub fn spawn_notification(
    client: Client,
    webhook_url: Option<String>,
    event: NotificationEvent,
) {
    if let Some(url) = webhook_url {
        let title = event.title.clone();
        tokio::spawn(
            AssertUnwindSafe(async move {
                send_notification(&client, &url, &event).await;
            })
            .catch_unwind()
            .map(move |result| {
                if let Err(panic) = result {
                    let panic_msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        "Notification task panicked for '{}': {}",
                        title,
                        panic_msg
                    );
                }
            }),
        );
    }
}

/// Send a notification to the configured webhook URL.
///
/// Uses quick retries (100ms, 200ms delays); failures are logged and
/// dropped. Duplicate notifications on the retry path are acceptable.
async fn send_notification(client: &Client, url: &str, event: &NotificationEvent) {
    for (attempt, delay_ms) in std::iter::once(&0u64)
        .chain(NOTIFY_RETRY_DELAYS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }

        match client
            .post(url)
            .json(event)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if attempt > 0 {
                    tracing::debug!("Notification webhook succeeded after {} retries", attempt);
                }
                return;
            }
            Ok(resp) => {
                tracing::debug!("Notification webhook returned {}", resp.status());
            }
            Err(e) => {
                tracing::debug!("Notification webhook failed: {}", e);
            }
        }
    }

    tracing::warn!(
        "Notification webhook failed after {} attempts",
        NOTIFY_RETRY_DELAYS.len() + 1
    );
}
