use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::specification::{Recipient, RecipientRole};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAddress {
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl MailAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }
}

impl From<&Recipient> for MailAddress {
    fn from(recipient: &Recipient) -> Self {
        Self::new(recipient.address.clone()).with_display_name(recipient.display_name.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub mime_type: String,

    #[serde(default)]
    pub inline: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        content: impl Into<Vec<u8>>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            mime_type: mime_type.into(),
            inline: false,
            content_id: None,
        }
    }

    pub fn inline(mut self, content_id: Option<String>) -> Self {
        self.inline = true;
        self.content_id = content_id;
        self
    }
}

/// The message produced for one send call.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub from: MailAddress,
    pub reply_to: Option<MailAddress>,
    pub priority: u8,
    pub to: Vec<MailAddress>,
    pub cc: Vec<MailAddress>,
    pub bcc: Vec<MailAddress>,
    pub attachments: Vec<Attachment>,
}

impl RenderedMessage {
    pub fn new(subject: String, html_body: String, from: MailAddress, priority: u8) -> Self {
        Self {
            subject,
            html_body,
            text_body: None,
            from,
            reply_to: None,
            priority,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn add_recipient(&mut self, recipient: &Recipient) {
        let address = MailAddress::from(recipient);
        match recipient.role {
            RecipientRole::To => self.to.push(address),
            RecipientRole::Cc => self.cc.push(address),
            RecipientRole::Bcc => self.bcc.push(address),
        }
    }

    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    pub fn has_recipients(&self) -> bool {
        self.recipient_count() > 0
    }

    pub fn all_recipients(&self) -> impl Iterator<Item = &MailAddress> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Comma-separated recipient addresses, for logs and error messages.
    pub fn recipient_list(&self) -> String {
        self.all_recipients()
            .map(|r| r.address.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub attempts: u32,
    pub recipient_count: usize,
    /// Relay that accepted the message.
    pub host: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Delivered(DeliveryReceipt),
    NoRecipients,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}
