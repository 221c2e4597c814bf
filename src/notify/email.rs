//! Recovery-email sink — nudges respondents whose flows were abandoned.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::NotifyError;
use crate::flow::status::FlowStatus;
use crate::notify::{FlowNotification, NotificationBus};

/// SMTP configuration for recovery emails.
#[derive(Debug, Clone)]
pub struct RecoveryEmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    /// Base URL for resume links, e.g. `https://forms.example.com/resume`.
    pub resume_base_url: String,
}

impl RecoveryEmailConfig {
    /// Read from `SCHEDFORM_SMTP_*`. None disables the sink.
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SCHEDFORM_SMTP_HOST").ok()?;
        let smtp_port: u16 = std::env::var("SCHEDFORM_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);
        let username = std::env::var("SCHEDFORM_SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("SCHEDFORM_SMTP_PASSWORD").unwrap_or_default();
        let from_address =
            std::env::var("SCHEDFORM_SMTP_FROM").unwrap_or_else(|_| username.clone());
        let resume_base_url = std::env::var("SCHEDFORM_RESUME_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080/resume".to_string());

        Some(Self {
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            resume_base_url,
        })
    }
}

/// Spawn the recovery-email loop. Sends one nudge per abandoned flow with a
/// known respondent address. Failures are logged and dropped.
pub fn spawn_recovery_email_sink(
    bus: &NotificationBus,
    config: RecoveryEmailConfig,
) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let notification = match rx.recv().await {
                Ok(n) => n,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Recovery email sink lagged; notifications dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if notification.new_status != FlowStatus::Abandoned {
                continue;
            }
            let Some(recipient) = notification.respondent_email.clone() else {
                debug!(flow_id = %notification.flow_id, "Abandoned flow has no respondent address; skipping nudge");
                continue;
            };

            if let Err(e) = send_recovery_email(&config, &recipient, &notification).await {
                warn!(flow_id = %notification.flow_id, error = %e, "Recovery email failed");
            }
        }
    })
}

async fn send_recovery_email(
    config: &RecoveryEmailConfig,
    recipient: &str,
    notification: &FlowNotification,
) -> Result<(), NotifyError> {
    let resume_link = format!("{}/{}", config.resume_base_url, notification.flow_id);
    let body = format!(
        "Hi,\n\nLooks like you didn't finish booking your meeting. \
         Pick up where you left off:\n\n{resume_link}\n"
    );

    let message = Message::builder()
        .from(config.from_address.parse().map_err(|e| NotifyError::EmailFailed {
            recipient: recipient.to_string(),
            reason: format!("bad from address: {e}"),
        })?)
        .to(recipient.parse().map_err(|e| NotifyError::EmailFailed {
            recipient: recipient.to_string(),
            reason: format!("bad recipient address: {e}"),
        })?)
        .subject("Finish booking your meeting")
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .map_err(|e| NotifyError::EmailFailed {
            recipient: recipient.to_string(),
            reason: e.to_string(),
        })?;

    let transport = SmtpTransport::starttls_relay(&config.smtp_host)
        .map_err(|e| NotifyError::EmailFailed {
            recipient: recipient.to_string(),
            reason: e.to_string(),
        })?
        .port(config.smtp_port)
        .credentials(Credentials::new(
            config.username.clone(),
            config.password.clone(),
        ))
        .build();

    // Blocking SMTP exchange; kept off the async workers.
    let recipient_owned = recipient.to_string();
    tokio::task::spawn_blocking(move || transport.send(&message))
        .await
        .map_err(|e| NotifyError::EmailFailed {
            recipient: recipient_owned.clone(),
            reason: format!("send task failed: {e}"),
        })?
        .map_err(|e| NotifyError::EmailFailed {
            recipient: recipient_owned,
            reason: e.to_string(),
        })?;

    debug!(recipient = recipient, flow_id = %notification.flow_id, "Recovery email sent");
    Ok(())
}
