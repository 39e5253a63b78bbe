use std::fmt::{Display, Formatter, Result};

use thiserror::Error;

/// SMTP reply codes the transport distinguishes, plus `GeneralFailure` for
/// failures that never produced a reply (connect, TLS, IO, timeout) and
/// `ClientConfiguration` for sessions refused before any command was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpStatusCode {
    ServiceNotAvailable,
    MailboxBusy,
    LocalErrorInProcessing,
    InsufficientStorage,
    ClientNotPermitted,
    CommandUnrecognized,
    SyntaxError,
    CommandNotImplemented,
    BadCommandSequence,
    MustIssueStartTlsFirst,
    AuthenticationFailed,
    MailboxUnavailable,
    UserNotLocal,
    ExceededStorageAllocation,
    MailboxNameNotAllowed,
    TransactionFailed,
    GeneralFailure,
    /// The session could not be set up from the local settings (bad TLS
    /// name, no usable AUTH mechanism). Retrying cannot help.
    ClientConfiguration,
    Other(u16),
}

impl SmtpStatusCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            421 => Self::ServiceNotAvailable,
            450 => Self::MailboxBusy,
            451 => Self::LocalErrorInProcessing,
            452 => Self::InsufficientStorage,
            454 => Self::ClientNotPermitted,
            500 => Self::CommandUnrecognized,
            501 => Self::SyntaxError,
            502 => Self::CommandNotImplemented,
            503 => Self::BadCommandSequence,
            530 => Self::MustIssueStartTlsFirst,
            535 => Self::AuthenticationFailed,
            550 => Self::MailboxUnavailable,
            551 => Self::UserNotLocal,
            552 => Self::ExceededStorageAllocation,
            553 => Self::MailboxNameNotAllowed,
            554 => Self::TransactionFailed,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> Option<u16> {
        match self {
            Self::ServiceNotAvailable => Some(421),
            Self::MailboxBusy => Some(450),
            Self::LocalErrorInProcessing => Some(451),
            Self::InsufficientStorage => Some(452),
            Self::ClientNotPermitted => Some(454),
            Self::CommandUnrecognized => Some(500),
            Self::SyntaxError => Some(501),
            Self::CommandNotImplemented => Some(502),
            Self::BadCommandSequence => Some(503),
            Self::MustIssueStartTlsFirst => Some(530),
            Self::AuthenticationFailed => Some(535),
            Self::MailboxUnavailable => Some(550),
            Self::UserNotLocal => Some(551),
            Self::ExceededStorageAllocation => Some(552),
            Self::MailboxNameNotAllowed => Some(553),
            Self::TransactionFailed => Some(554),
            Self::GeneralFailure | Self::ClientConfiguration => None,
            Self::Other(code) => Some(*code),
        }
    }

    /// Statuses worth another attempt after backing off. Everything else is fatal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotAvailable
                | Self::MailboxBusy
                | Self::MailboxUnavailable
                | Self::TransactionFailed
                | Self::GeneralFailure
        )
    }
}

impl Display for SmtpStatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self.code() {
            Some(code) => write!(f, "{} ({:?})", code, self),
            None => write!(f, "{:?}", self),
        }
    }
}

/// One failed SMTP exchange: the status it was classified as and the
/// server's text, or the local error when no reply arrived.
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct SmtpFailure {
    pub status: SmtpStatusCode,
    pub message: String,
}

impl SmtpFailure {
    pub fn new(status: SmtpStatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self::new(SmtpStatusCode::GeneralFailure, message)
    }

    pub fn from_reply(code: u16, message: impl Into<String>) -> Self {
        Self::new(SmtpStatusCode::from_code(code), message)
    }

    pub fn is_transient(&self) -> bool {
        self.status.is_transient()
    }
}
