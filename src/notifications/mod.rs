//! Upload notifications: email to uploaders and admins, plus a chat webhook.

mod dispatch;
mod email;
mod models;
mod webhook;

pub use dispatch::{ChannelStatus, DeliveryReport, NotifierDispatch};
pub use email::{EmailError, EmailSender, SmtpEmailSender};
pub use models::{
    EmailMessage, Embed, EmbedField, MessageRenderer, NotificationEvent, NotificationOutcome,
    WebhookMessage,
};
pub use webhook::{ChatWebhook, DiscordWebhook, WebhookError};

#[cfg(test)]
pub(crate) use dispatch::testing;
