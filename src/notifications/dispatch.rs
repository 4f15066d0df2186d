//! Fans a committed upload event out to every configured channel.
//!
//! Delivery is best-effort: each channel runs under its own timeout and a
//! failing channel is logged and counted, never propagated to the caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::email::EmailSender;
use super::models::{EmailMessage, MessageRenderer, NotificationEvent};
use super::webhook::ChatWebhook;
use crate::server::metrics;

/// Result of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelStatus {
    #[default]
    Disabled,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliveryReport {
    pub emails_sent: usize,
    pub emails_failed: usize,
    pub webhook: ChannelStatus,
}

pub struct NotifierDispatch {
    email: Option<Arc<dyn EmailSender>>,
    webhook: Option<Arc<dyn ChatWebhook>>,
    renderer: MessageRenderer,
    admin_emails: Vec<String>,
    timeout: Duration,
}

impl NotifierDispatch {
    pub fn new(
        email: Option<Arc<dyn EmailSender>>,
        webhook: Option<Arc<dyn ChatWebhook>>,
        renderer: MessageRenderer,
        admin_emails: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            email,
            webhook,
            renderer,
            admin_emails,
            timeout,
        }
    }

    /// Dispatcher with no channels; every event is dropped.
    pub fn disabled() -> Self {
        Self::new(
            None,
            None,
            MessageRenderer::new("bozloader", ""),
            Vec::new(),
            Duration::from_secs(1),
        )
    }

    /// Deliver in the background. The handle can be awaited but never has to be.
    pub fn dispatch(self: &Arc<Self>, event: NotificationEvent) -> JoinHandle<DeliveryReport> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.deliver(&event).await })
    }

    pub async fn deliver(&self, event: &NotificationEvent) -> DeliveryReport {
        let ((emails_sent, emails_failed), webhook) =
            tokio::join!(self.deliver_emails(event), self.deliver_webhook(event));
        let report = DeliveryReport {
            emails_sent,
            emails_failed,
            webhook,
        };
        debug!(
            "Delivered '{}' for upload {}: {:?}",
            event.outcome.as_str(),
            event.record.id,
            report
        );
        report
    }

    fn render_emails(&self, event: &NotificationEvent) -> Vec<EmailMessage> {
        let mut messages: Vec<EmailMessage> =
            self.renderer.uploader_email(event).into_iter().collect();
        messages.extend(self.renderer.admin_emails(event, &self.admin_emails));
        messages
    }

    async fn deliver_emails(&self, event: &NotificationEvent) -> (usize, usize) {
        let Some(sender) = &self.email else {
            return (0, 0);
        };

        let mut sent = 0;
        let mut failed = 0;
        for message in self.render_emails(event) {
            match tokio::time::timeout(self.timeout, sender.send(&message)).await {
                Ok(Ok(())) => {
                    sent += 1;
                    metrics::record_notification("email", "sent");
                }
                Ok(Err(e)) => {
                    failed += 1;
                    metrics::record_notification("email", "failed");
                    warn!("Failed to send email to {}: {}", message.to, e);
                }
                Err(_) => {
                    failed += 1;
                    metrics::record_notification("email", "timeout");
                    warn!(
                        "Timed out sending email to {} after {:?}",
                        message.to, self.timeout
                    );
                }
            }
        }
        (sent, failed)
    }

    async fn deliver_webhook(&self, event: &NotificationEvent) -> ChannelStatus {
        let Some(webhook) = &self.webhook else {
            return ChannelStatus::Disabled;
        };

        let message = self.renderer.webhook_message(event);
        match tokio::time::timeout(self.timeout, webhook.post(&message)).await {
            Ok(Ok(())) => {
                metrics::record_notification("webhook", "sent");
                ChannelStatus::Sent
            }
            Ok(Err(e)) => {
                metrics::record_notification("webhook", "failed");
                warn!("Failed to post webhook for upload {}: {}", event.record.id, e);
                ChannelStatus::Failed
            }
            Err(_) => {
                metrics::record_notification("webhook", "timeout");
                warn!(
                    "Timed out posting webhook for upload {} after {:?}",
                    event.record.id, self.timeout
                );
                ChannelStatus::Failed
            }
        }
    }
}
