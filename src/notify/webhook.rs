//! Webhook sink — POSTs each notification to configured endpoints.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::NotifyError;
use crate::notify::{FlowNotification, NotificationBus};

/// Delivery attempts per notification per endpoint.
const MAX_ATTEMPTS: u32 = 3;

/// Webhook sink configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub urls: Vec<String>,
    pub timeout: Duration,
}

impl WebhookConfig {
    /// Read from `SCHEDFORM_WEBHOOK_URLS` (comma-separated). None disables
    /// the sink.
    pub fn from_env() -> Option<Self> {
        let urls: Vec<String> = std::env::var("SCHEDFORM_WEBHOOK_URLS")
            .ok()?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if urls.is_empty() {
            return None;
        }
        let timeout_secs: u64 = std::env::var("SCHEDFORM_WEBHOOK_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        Some(Self {
            urls,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Spawn the webhook delivery loop. Failures are logged, retried a bounded
/// number of times, then dropped — they never block or reverse a transition.
pub fn spawn_webhook_sink(bus: &NotificationBus, config: WebhookConfig) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(config.timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Failed to build webhook client; sink disabled");
                return;
            }
        };

        loop {
            let notification = match rx.recv().await {
                Ok(n) => n,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Webhook sink lagged; notifications dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            for url in &config.urls {
                if let Err(e) = deliver(&client, url, &notification).await {
                    warn!(url = %url, flow_id = %notification.flow_id, error = %e, "Webhook delivery failed");
                }
            }
        }
    })
}

async fn deliver(
    client: &reqwest::Client,
    url: &str,
    notification: &FlowNotification,
) -> Result<(), NotifyError> {
    let mut last_err = String::new();
    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
        }
        match client.post(url).json(notification).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(url = %url, flow_id = %notification.flow_id, "Webhook delivered");
                return Ok(());
            }
            Ok(resp) => last_err = format!("status {}", resp.status()),
            Err(e) => last_err = e.to_string(),
        }
    }
    Err(NotifyError::WebhookFailed {
        url: url.to_string(),
        reason: last_err,
    })
}
