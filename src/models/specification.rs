use serde::{Deserialize, Serialize};

use crate::error::SpecificationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    To,
    Cc,
    Bcc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    pub role: RecipientRole,
}

impl Recipient {
    pub fn new(address: impl Into<String>, role: RecipientRole) -> Self {
        Self {
            address: address.into(),
            display_name: None,
            role,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientGroup {
    pub name: String,

    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

impl RecipientGroup {
    pub fn new(name: impl Into<String>, recipients: Vec<Recipient>) -> Self {
        Self {
            name: name.into(),
            recipients,
        }
    }
}

/// How one notification type is rendered and addressed.
///
/// Only constructible through [`NotificationSpecification::new`] (or
/// deserialization, which runs the same checks), so subject, body and sender
/// are always non-empty and priority is within `1..=5`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SpecificationDocument", into = "SpecificationDocument")]
pub struct NotificationSpecification {
    notification_type: String,
    subject: String,
    html_body: String,
    text_body: Option<String>,
    from_address: String,
    from_name: Option<String>,
    reply_to: Option<String>,
    priority: u8,
    is_active: bool,
    recipient_groups: Vec<RecipientGroup>,
}

impl NotificationSpecification {
    pub const DEFAULT_PRIORITY: u8 = 3;

    pub fn new(
        notification_type: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
        from_address: impl Into<String>,
    ) -> Result<Self, SpecificationError> {
        let spec = Self {
            notification_type: notification_type.into(),
            subject: subject.into(),
            html_body: html_body.into(),
            text_body: None,
            from_address: from_address.into(),
            from_name: None,
            reply_to: None,
            priority: Self::DEFAULT_PRIORITY,
            is_active: true,
            recipient_groups: Vec::new(),
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn with_text_body(mut self, text_body: impl Into<String>) -> Self {
        self.text_body = Some(text_body.into());
        self
    }

    pub fn with_from_name(mut self, from_name: impl Into<String>) -> Self {
        self.from_name = Some(from_name.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Result<Self, SpecificationError> {
        check_priority(priority)?;
        self.priority = priority;
        Ok(self)
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn with_recipient_group(mut self, group: RecipientGroup) -> Self {
        self.recipient_groups.push(group);
        self
    }

    fn validate(&self) -> Result<(), SpecificationError> {
        if self.notification_type.trim().is_empty() {
            return Err(SpecificationError::Empty("notification type"));
        }
        if self.subject.trim().is_empty() {
            return Err(SpecificationError::Empty("subject"));
        }
        if self.html_body.trim().is_empty() {
            return Err(SpecificationError::Empty("body"));
        }
        if self.from_address.trim().is_empty() {
            return Err(SpecificationError::Empty("sender address"));
        }
        check_priority(self.priority)
    }

    pub fn notification_type(&self) -> &str {
        &self.notification_type
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn html_body(&self) -> &str {
        &self.html_body
    }

    pub fn text_body(&self) -> Option<&str> {
        self.text_body.as_deref()
    }

    pub fn from_address(&self) -> &str {
        &self.from_address
    }

    pub fn from_name(&self) -> Option<&str> {
        self.from_name.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn recipient_groups(&self) -> &[RecipientGroup] {
        &self.recipient_groups
    }

    pub fn recipients(&self) -> impl Iterator<Item = &Recipient> {
        self.recipient_groups
            .iter()
            .flat_map(|group| group.recipients.iter())
    }
}

fn check_priority(priority: u8) -> Result<(), SpecificationError> {
    if (1..=5).contains(&priority) {
        Ok(())
    } else {
        Err(SpecificationError::PriorityOutOfRange(priority))
    }
}

/// Serialized shape of a specification, as stored in JSON documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpecificationDocument {
    notification_type: String,
    subject: String,
    html_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text_body: Option<String>,
    from_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    #[serde(default = "default_priority")]
    priority: u8,
    #[serde(default = "default_active")]
    is_active: bool,
    #[serde(default)]
    recipient_groups: Vec<RecipientGroup>,
}

fn default_priority() -> u8 {
    NotificationSpecification::DEFAULT_PRIORITY
}

fn default_active() -> bool {
    true
}

impl TryFrom<SpecificationDocument> for NotificationSpecification {
    type Error = SpecificationError;

    fn try_from(doc: SpecificationDocument) -> Result<Self, Self::Error> {
        let spec = Self {
            notification_type: doc.notification_type,
            subject: doc.subject,
            html_body: doc.html_body,
            text_body: doc.text_body,
            from_address: doc.from_address,
            from_name: doc.from_name,
            reply_to: doc.reply_to,
            priority: doc.priority,
            is_active: doc.is_active,
            recipient_groups: doc.recipient_groups,
        };
        spec.validate()?;
        Ok(spec)
    }
}

impl From<NotificationSpecification> for SpecificationDocument {
    fn from(spec: NotificationSpecification) -> Self {
        Self {
            notification_type: spec.notification_type,
            subject: spec.subject,
            html_body: spec.html_body,
            text_body: spec.text_body,
            from_address: spec.from_address,
            from_name: spec.from_name,
            reply_to: spec.reply_to,
            priority: spec.priority,
            is_active: spec.is_active,
            recipient_groups: spec.recipient_groups,
        }
    }
}
