use thiserror::Error;

use crate::models::status::SmtpFailure;

#[derive(Debug, Clone, Error)]
pub enum SecretStoreError {
    #[error("secret store request failed: {0}")]
    Backend(String),

    #[error("secret store io error: {0}")]
    Io(String),
}

/// Failures while loading the intermediate certificate bundle.
///
/// Both variants name the secret so operators can find the misconfigured entry.
#[derive(Debug, Clone, Error)]
pub enum CertificateError {
    #[error("failed to retrieve intermediate certificates from secret '{secret_id}': {reason}")]
    Retrieval { secret_id: String, reason: String },

    #[error("failed to parse intermediate certificates from secret '{secret_id}': {reason}")]
    Parse { secret_id: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    #[error("template parse error: {0}")]
    Parse(String),

    #[error("template render error: {0}")]
    Render(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("email configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<CertificateError>,
    },

    #[error("invalid attachment '{filename}': {reason}")]
    Attachment { filename: String, reason: String },

    #[error("invalid email address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to send email to [{recipients}] after {attempts} attempt(s): {source}")]
    Send {
        recipients: String,
        attempts: u32,
        #[source]
        source: SmtpFailure,
    },

    #[error("email delivery cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Attempts made before the error surfaced. Errors raised before the
    /// first connection report zero.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Send { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    #[error("specification store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid specification document: {0}")]
    InvalidDocument(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecificationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("priority {0} is outside 1..=5")]
    PriorityOutOfRange(u8),
}

/// Everything that can stop a single notification from going out.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no specification found for notification type '{0}'")]
    SpecificationNotFound(String),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
