//! Notification layer — fire-and-forget fan-out of flow transitions.
//!
//! Every committed transition publishes a `FlowNotification` on a broadcast
//! bus. Sinks (webhook, recovery email, the `/ws` stream) subscribe and run
//! independently; a sink failure is logged and never reaches the transition
//! that produced the notification.

pub mod email;
pub mod webhook;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::flow::status::FlowStatus;

pub use email::{RecoveryEmailConfig, spawn_recovery_email_sink};
pub use webhook::{WebhookConfig, spawn_webhook_sink};

/// Bus capacity. Slow sinks that lag behind this many messages drop the
/// oldest; transitions are never blocked on a sink.
const BUS_CAPACITY: usize = 256;

/// One transition, as seen by the outside world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNotification {
    pub flow_id: Uuid,
    pub organization_id: Uuid,
    pub previous_status: FlowStatus,
    pub new_status: FlowStatus,
    /// Respondent address, present when known (used by the recovery sink).
    pub respondent_email: Option<String>,
    pub payload: serde_json::Value,
}

/// Broadcast bus for flow notifications.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<FlowNotification>,
}

impl NotificationBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish a notification. Fire-and-forget: having no subscribers is not
    /// an error.
    pub fn publish(&self, notification: FlowNotification) {
        let receivers = self.tx.receiver_count();
        if self.tx.send(notification).is_err() && receivers > 0 {
            tracing::warn!("Notification bus send failed despite live receivers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowNotification> {
        self.tx.subscribe()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(new_status: FlowStatus) -> FlowNotification {
        FlowNotification {
            flow_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            previous_status: FlowStatus::FormStarted,
            new_status,
            respondent_email: None,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        bus.publish(notification(FlowStatus::FormCompleted));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.new_status, FlowStatus::FormCompleted);
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let bus = NotificationBus::new();
        bus.publish(notification(FlowStatus::Abandoned));
    }
}
