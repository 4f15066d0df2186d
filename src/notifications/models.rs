//! Notification events and the messages rendered from them.

use serde::Serialize;

use crate::uploads::{MediaType, UploadRecord};

/// What happened to an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    Received,
    Approved,
    Denied,
    /// Approval was rolled back because the library move failed.
    ApprovalFailed,
}

impl NotificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::ApprovalFailed => "approval_failed",
        }
    }
}

/// A committed state change worth telling people about.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub record: UploadRecord,
    pub outcome: NotificationOutcome,
    /// Extra context, e.g. the reason a publish failed.
    pub detail: Option<String>,
}

impl NotificationEvent {
    pub fn new(record: UploadRecord, outcome: NotificationOutcome) -> Self {
        Self {
            record,
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Discord-style embed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Payload posted to the operations webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookMessage {
    pub content: String,
    pub embeds: Vec<Embed>,
}

const COLOR_RECEIVED: u32 = 6_147_277;
const COLOR_APPROVED: u32 = 5_025_616;
const COLOR_DENIED: u32 = 15_220_031;
const COLOR_FAILED: u32 = 16_750_848;

/// Renders notification events into emails and webhook posts.
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    app_name: String,
    app_url: String,
}

impl MessageRenderer {
    pub fn new(app_name: impl Into<String>, app_url: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Email for the uploader, if this outcome is one they hear about.
    pub fn uploader_email(&self, event: &NotificationEvent) -> Option<EmailMessage> {
        let record = &event.record;
        let app = &self.app_name;
        let (subject, headline, lines) = match event.outcome {
            NotificationOutcome::Received => (
                format!("Upload Request Received - {}", app),
                "Upload Request Received".to_string(),
                vec![
                    "Your upload request has been received and is pending review.".to_string(),
                    format!("File: {}", record.original_filename),
                    format!("Type: {}", record.media_type.display_name()),
                    format!("Size: {}", record.display_size()),
                    "You'll receive another email once your upload has been approved or denied."
                        .to_string(),
                ],
            ),
            NotificationOutcome::Approved => (
                format!("Upload Approved - {}", app),
                "Upload Approved".to_string(),
                vec![
                    "Great news! Your upload has been approved and added to Plex.".to_string(),
                    format!("File: {}", record.original_filename),
                    format!("Type: {}", record.media_type.display_name()),
                    "It should appear in your Plex library shortly.".to_string(),
                ],
            ),
            NotificationOutcome::Denied => {
                let mut lines = vec![
                    "Unfortunately, your upload was not approved.".to_string(),
                    format!("File: {}", record.original_filename),
                ];
                if let Some(notes) = &record.notes {
                    lines.push(format!("Notes: {}", notes));
                }
                lines.push("Please contact the admin if you have questions.".to_string());
                (
                    format!("Upload Not Approved - {}", app),
                    "Upload Not Approved".to_string(),
                    lines,
                )
            }
            NotificationOutcome::ApprovalFailed => return None,
        };
        Some(self.email(&record.uploader_email, subject, &headline, &lines))
    }

    /// Emails for the admins.
    pub fn admin_emails(&self, event: &NotificationEvent, admins: &[String]) -> Vec<EmailMessage> {
        let record = &event.record;
        let (subject, headline, lines) = match event.outcome {
            NotificationOutcome::Received => (
                format!("New Upload Pending - {}", record.original_filename),
                format!("New {} Upload", record.media_type.display_name()),
                vec![
                    format!("File: {}", record.original_filename),
                    format!("Stored as: {}", record.stored_filename),
                    format!("Uploader: {}", record.uploader_email),
                    format!("Size: {}", record.display_size()),
                    format!("Review at {}/admin", self.app_url),
                ],
            ),
            NotificationOutcome::ApprovalFailed => (
                format!("Approval Failed - {}", record.original_filename),
                "Approval Failed".to_string(),
                vec![
                    format!("File: {}", record.stored_filename),
                    format!(
                        "Reason: {}",
                        event.detail.as_deref().unwrap_or("unknown error")
                    ),
                    "The upload was returned to pending and can be approved again.".to_string(),
                ],
            ),
            NotificationOutcome::Approved | NotificationOutcome::Denied => return Vec::new(),
        };
        admins
            .iter()
            .map(|admin| self.email(admin, subject.clone(), &headline, &lines))
            .collect()
    }

    /// Summary post for the operations channel.
    pub fn webhook_message(&self, event: &NotificationEvent) -> WebhookMessage {
        let record = &event.record;
        let file_field = field("File", &record.original_filename, false);
        let embed = match event.outcome {
            NotificationOutcome::Received => Embed {
                title: format!("{} New Upload - {}", media_emoji(record.media_type), self.app_name),
                color: COLOR_RECEIVED,
                fields: vec![
                    file_field,
                    field("Type", record.media_type.display_name(), true),
                    field("Uploader", &record.uploader_email, true),
                    field("Size", &record.display_size(), true),
                ],
                footer: Some(EmbedFooter {
                    text: format!("Review at {}/admin", self.app_url),
                }),
            },
            NotificationOutcome::Approved => Embed {
                title: "Upload Approved".to_string(),
                color: COLOR_APPROVED,
                fields: vec![
                    file_field,
                    field(
                        "Added to",
                        &format!("Plex {} Library", record.media_type.display_name()),
                        true,
                    ),
                    field(
                        "Approved by",
                        record.decided_by.as_deref().unwrap_or("unknown"),
                        true,
                    ),
                ],
                footer: None,
            },
            NotificationOutcome::Denied => {
                let mut fields = vec![file_field];
                if let Some(notes) = &record.notes {
                    fields.push(field("Notes", notes, false));
                }
                Embed {
                    title: "Upload Denied".to_string(),
                    color: COLOR_DENIED,
                    fields,
                    footer: None,
                }
            }
            NotificationOutcome::ApprovalFailed => Embed {
                title: "Approval Failed".to_string(),
                color: COLOR_FAILED,
                fields: vec![
                    file_field,
                    field(
                        "Reason",
                        event.detail.as_deref().unwrap_or("unknown error"),
                        false,
                    ),
                    field("Status", "returned to pending", true),
                ],
                footer: None,
            },
        };
        WebhookMessage {
            content: String::new(),
            embeds: vec![embed],
        }
    }

    fn email(&self, to: &str, subject: String, headline: &str, lines: &[String]) -> EmailMessage {
        let mut text_body = format!("{} - {}\n\n", self.app_name, headline);
        for line in lines {
            text_body.push_str(line);
            text_body.push('\n');
        }
        text_body.push_str(&format!("\n-- {}\n", self.app_name));

        let mut html_body = format!(
            "<!DOCTYPE html><html><body><h1>{}</h1><h2>{}</h2>",
            escape_html(&self.app_name),
            escape_html(headline)
        );
        for line in lines {
            html_body.push_str(&format!("<p>{}</p>", escape_html(line)));
        }
        html_body.push_str(&format!(
            "<p style=\"color:#888\">-- {}</p></body></html>",
            escape_html(&self.app_name)
        ));

        EmailMessage {
            to: to.to_string(),
            subject,
            text_body,
            html_body,
        }
    }
}

/// Discord rejects the whole message if a field value is longer than this.
const MAX_FIELD_VALUE_CHARS: usize = 1024;

fn field(name: &str, value: &str, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value: truncate_chars(value, MAX_FIELD_VALUE_CHARS),
        inline,
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars.saturating_sub(1)) {
        Some((end, _)) if value[end..].chars().nth(1).is_some() => {
            format!("{}…", &value[..end])
        }
        _ => value.to_string(),
    }
}

fn media_emoji(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Movie => "🎬",
        MediaType::Tv => "📺",
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploads::UploadStatus;

    fn renderer() -> MessageRenderer {
        MessageRenderer::new("Bozloader", "https://boz.example.com/")
    }

    fn record() -> UploadRecord {
        UploadRecord::new_pending(
            MediaType::Movie,
            "Alien <1979>.mkv",
            "Alien _1979_.mkv",
            "ripley@example.com",
            2_000_000_000,
        )
    }

    #[test]
    fn test_received_goes_to_uploader_and_admins() {
        let event = NotificationEvent::new(record(), NotificationOutcome::Received);
        let email = renderer().uploader_email(&event).unwrap();
        assert_eq!(email.to, "ripley@example.com");
        assert!(email.subject.contains("Received"));
        assert!(email.text_body.contains("File: Alien <1979>.mkv"));
        assert!(email.html_body.contains("Alien &lt;1979&gt;.mkv"));
        assert!(!email.html_body.contains("<1979>"));

        let admins = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        let admin_emails = renderer().admin_emails(&event, &admins);
        assert_eq!(admin_emails.len(), 2);
        assert!(admin_emails[0]
            .text_body
            .contains("Review at https://boz.example.com/admin"));
    }

    #[test]
    fn test_long_filename_fits_in_webhook_field() {
        let mut record = record();
        record.original_filename = format!("{}.mkv", "é".repeat(2000));
        let event = NotificationEvent::new(record, NotificationOutcome::Received);

        let message = renderer().webhook_message(&event);

        let file = &message.embeds[0].fields[0];
        assert_eq!(file.value.chars().count(), MAX_FIELD_VALUE_CHARS);
        assert!(file.value.ends_with('…'));
    }

    #[test]
    fn test_truncate_chars_keeps_short_values() {
        assert_eq!(truncate_chars("Alien.mkv", 9), "Alien.mkv");
        assert_eq!(truncate_chars("Alien.mkv", 5), "Alie…");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn test_denied_includes_notes() {
        let mut rec = record();
        rec.status = UploadStatus::Denied;
        rec.notes = Some("wrong cut".to_string());
        let event = NotificationEvent::new(rec, NotificationOutcome::Denied);

        let email = renderer().uploader_email(&event).unwrap();
        assert!(email.text_body.contains("Notes: wrong cut"));

        let post = renderer().webhook_message(&event);
        assert!(post.embeds[0].fields.iter().any(|f| f.value == "wrong cut"));
        assert!(renderer().admin_emails(&event, &["a@b.c".to_string()]).is_empty());
    }

    #[test]
    fn test_approval_failed_skips_uploader() {
        let event = NotificationEvent::new(record(), NotificationOutcome::ApprovalFailed)
            .with_detail("destination exists");
        assert!(renderer().uploader_email(&event).is_none());

        let admin_emails = renderer().admin_emails(&event, &["a@b.c".to_string()]);
        assert_eq!(admin_emails.len(), 1);
        assert!(admin_emails[0].text_body.contains("destination exists"));

        let post = renderer().webhook_message(&event);
        assert_eq!(post.embeds[0].title, "Approval Failed");
    }

    #[test]
    fn test_webhook_payload_shape() {
        let event = NotificationEvent::new(record(), NotificationOutcome::Received);
        let json = serde_json::to_value(renderer().webhook_message(&event)).unwrap();
        assert_eq!(json["content"], "");
        assert_eq!(json["embeds"][0]["color"], COLOR_RECEIVED);
        assert_eq!(json["embeds"][0]["fields"][0]["name"], "File");
        assert_eq!(
            json["embeds"][0]["footer"]["text"],
            "Review at https://boz.example.com/admin"
        );
    }
}
