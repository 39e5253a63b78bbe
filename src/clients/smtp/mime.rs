//! Turns a [`RenderedMessage`] into a MIME message ready for the wire.

use lettre::{
    Address, Message,
    address::Envelope,
    message::{
        Attachment as AttachmentPart, Mailbox, MultiPart, SinglePart,
        header::{ContentTransferEncoding, ContentType, Header, HeaderName, HeaderValue},
    },
};

use crate::{
    error::TransportError,
    models::message::{Attachment, MailAddress, RenderedMessage},
};

/// `X-Priority`, 1 (highest) to 5 (lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XPriority(pub u8);

impl Header for XPriority {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Priority")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let value = s
            .trim()
            .chars()
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or("X-Priority must start with a digit")?;
        Ok(Self(value as u8))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    High,
    Normal,
    Low,
}

impl Importance {
    pub fn from_priority(priority: u8) -> Self {
        match priority {
            1 | 2 => Self::High,
            3 => Self::Normal,
            _ => Self::Low,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl Header for Importance {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Importance")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err("unknown Importance value".into()),
        }
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.as_str().to_owned())
    }
}

/// A composed message: the SMTP envelope plus the formatted RFC 5322 bytes.
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub envelope: Envelope,
    pub formatted: Vec<u8>,
}

pub fn compose(message: &RenderedMessage) -> Result<OutgoingMail, TransportError> {
    let mut builder = Message::builder()
        .from(mailbox(&message.from)?)
        .subject(message.subject.clone())
        .header(XPriority(message.priority))
        .header(Importance::from_priority(message.priority));

    if let Some(reply_to) = &message.reply_to {
        builder = builder.reply_to(mailbox(reply_to)?);
    }
    for to in &message.to {
        builder = builder.to(mailbox(to)?);
    }
    for cc in &message.cc {
        builder = builder.cc(mailbox(cc)?);
    }
    for bcc in &message.bcc {
        builder = builder.bcc(mailbox(bcc)?);
    }

    let html = SinglePart::builder()
        .header(ContentType::TEXT_HTML)
        .header(ContentTransferEncoding::QuotedPrintable)
        .body(message.html_body.clone());

    let text = message.text_body.as_ref().map(|text| {
        SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .header(ContentTransferEncoding::QuotedPrintable)
            .body(text.clone())
    });

    let attachments = message
        .attachments
        .iter()
        .map(attachment_part)
        .collect::<Result<Vec<_>, _>>()?;

    let built = match (text, attachments.is_empty()) {
        (None, true) => builder.singlepart(html),
        (Some(text), true) => {
            builder.multipart(MultiPart::alternative().singlepart(text).singlepart(html))
        }
        (text, false) => {
            let mut mixed = match text {
                Some(text) => MultiPart::mixed()
                    .multipart(MultiPart::alternative().singlepart(text).singlepart(html)),
                None => MultiPart::mixed().singlepart(html),
            };
            for part in attachments {
                mixed = mixed.singlepart(part);
            }
            builder.multipart(mixed)
        }
    }
    .map_err(|e| TransportError::configuration(format!("failed to build message: {}", e)))?;

    Ok(OutgoingMail {
        envelope: built.envelope().clone(),
        formatted: built.formatted(),
    })
}

fn mailbox(address: &MailAddress) -> Result<Mailbox, TransportError> {
    let parsed: Address =
        address
            .address
            .trim()
            .parse()
            .map_err(|e: lettre::address::AddressError| TransportError::InvalidAddress {
                address: address.address.clone(),
                reason: e.to_string(),
            })?;
    Ok(Mailbox::new(address.display_name.clone(), parsed))
}

fn attachment_part(attachment: &Attachment) -> Result<SinglePart, TransportError> {
    let invalid = |reason: String| TransportError::Attachment {
        filename: attachment.filename.clone(),
        reason,
    };

    if attachment.filename.trim().is_empty() {
        return Err(invalid("filename must not be empty".to_owned()));
    }

    let content_type = ContentType::parse(&attachment.mime_type)
        .map_err(|e| invalid(format!("invalid MIME type '{}': {}", attachment.mime_type, e)))?;

    let part = if attachment.inline {
        let content_id = attachment
            .content_id
            .clone()
            .unwrap_or_else(|| attachment.filename.clone());
        AttachmentPart::new_inline(content_id).body(attachment.content.clone(), content_type)
    } else {
        AttachmentPart::new(attachment.filename.clone())
            .body(attachment.content.clone(), content_type)
    };

    Ok(part)
}
