pub mod mime;
pub mod session;
pub mod tls;

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use rustls::ClientConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use session::TcpSmtpConnector;

use crate::{
    clients::certificates::IntermediateCertificateSource,
    error::TransportError,
    models::{
        message::{DeliveryReceipt, RenderedMessage},
        retry::RetryConfig,
        status::SmtpFailure,
    },
    utils::{RetryError, retry_with_backoff},
};

use self::mime::OutgoingMail;

/// Delivers rendered messages. The orchestrator only talks to this seam.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(
        &self,
        message: &RenderedMessage,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReceipt, TransportError>;
}

/// Opens one SMTP session and pushes one message through it.
#[async_trait]
pub trait SmtpConnector: Send + Sync {
    /// Succeeds once the server has accepted the DATA payload.
    async fn transmit(
        &self,
        config: &SessionConfig,
        mail: &OutgoingMail,
    ) -> Result<(), SmtpFailure>;

    /// Connects, greets and quits without sending anything.
    async fn probe(&self, config: &SessionConfig) -> Result<(), SmtpFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Plain,
    StartTls,
    Implicit,
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub implicit_tls: bool,
    pub use_custom_server_certificate_validation: bool,
    pub server_intermediate_certificate_secret_id: Option<String>,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub max_retry_delay: Option<Duration>,
    pub timeout: Duration,
    pub hello_name: String,
    pub credentials: Option<Credentials>,
}

impl SmtpSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls: true,
            implicit_tls: false,
            use_custom_server_certificate_validation: false,
            server_intermediate_certificate_secret_id: None,
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            max_retry_delay: None,
            timeout: Duration::from_millis(30_000),
            hello_name: "localhost".to_owned(),
            credentials: None,
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.host.trim().is_empty() {
            return Err(TransportError::configuration("SMTP host must not be empty"));
        }
        if self.port == 0 {
            return Err(TransportError::configuration("SMTP port must not be 0"));
        }
        if self.max_retry_attempts < 1 {
            return Err(TransportError::configuration(
                "max retry attempts must be at least 1",
            ));
        }
        if self.timeout.is_zero() {
            return Err(TransportError::configuration("timeout must be positive"));
        }
        if self.implicit_tls && !self.use_tls {
            return Err(TransportError::configuration(
                "implicit TLS requires TLS to be enabled",
            ));
        }
        if self.use_custom_server_certificate_validation {
            if !self.use_tls {
                return Err(TransportError::configuration(
                    "custom server certificate validation requires TLS to be enabled",
                ));
            }
            let missing = self
                .server_intermediate_certificate_secret_id
                .as_deref()
                .is_none_or(|id| id.trim().is_empty());
            if missing {
                return Err(TransportError::configuration(
                    "an intermediate certificate secret id is required \
                     when custom server certificate validation is enabled",
                ));
            }
        }
        Ok(())
    }

    pub fn security(&self) -> Security {
        match (self.use_tls, self.implicit_tls) {
            (false, _) => Security::Plain,
            (true, false) => Security::StartTls,
            (true, true) => Security::Implicit,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retry_attempts, self.retry_delay)
            .with_max_delay(self.max_retry_delay)
    }
}

/// Everything one session needs, resolved before the first attempt.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub security: Security,
    pub hello_name: String,
    pub credentials: Option<Credentials>,
    pub timeout: Duration,
    pub tls: Option<Arc<ClientConfig>>,
}

pub struct SmtpTransport {
    settings: SmtpSettings,
    certificates: Arc<dyn IntermediateCertificateSource>,
    connector: Arc<dyn SmtpConnector>,
}

impl SmtpTransport {
    pub fn new(
        settings: SmtpSettings,
        certificates: Arc<dyn IntermediateCertificateSource>,
    ) -> Result<Self, TransportError> {
        settings.validate()?;

        info!(
            host = %settings.host,
            port = settings.port,
            security = ?settings.security(),
            custom_validation = settings.use_custom_server_certificate_validation,
            max_retry_attempts = settings.max_retry_attempts,
            "SMTP transport initialized"
        );

        Ok(Self {
            settings,
            certificates,
            connector: Arc::new(TcpSmtpConnector),
        })
    }

    pub fn with_connector(mut self, connector: Arc<dyn SmtpConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn settings(&self) -> &SmtpSettings {
        &self.settings
    }

    /// Opens a session, greets the server and quits. Makes a single attempt.
    pub async fn check_connection(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        let session = self.session_config(cancel).await?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            outcome = self.connector.probe(&session) => outcome,
        };

        outcome.map_err(|source| TransportError::Send {
            recipients: String::new(),
            attempts: 1,
            source,
        })
    }

    /// Builds the TLS configuration for one session. Certificate problems
    /// surface here as configuration errors, before any connection attempt.
    async fn session_config(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SessionConfig, TransportError> {
        let tls = match self.settings.security() {
            Security::Plain => None,
            _ if self.settings.use_custom_server_certificate_validation => {
                let secret_id = self
                    .settings
                    .server_intermediate_certificate_secret_id
                    .as_deref()
                    .unwrap_or_default();

                let fetched = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    fetched = self.certificates.intermediate_certificates(secret_id) => fetched,
                };

                let bundle = fetched.map_err(|e| TransportError::Configuration {
                    message: "failed to set up server certificate validation".to_owned(),
                    source: Some(e),
                })?;

                debug!(
                    secret_id,
                    intermediates = bundle.len(),
                    "Custom server certificate validation enabled"
                );

                Some(tls::custom_client_config(&bundle).map_err(tls_setup_error)?)
            }
            _ => Some(tls::standard_client_config().map_err(tls_setup_error)?),
        };

        Ok(SessionConfig {
            host: self.settings.host.clone(),
            port: self.settings.port,
            security: self.settings.security(),
            hello_name: self.settings.hello_name.clone(),
            credentials: self.settings.credentials.clone(),
            timeout: self.settings.timeout,
            tls,
        })
    }
}

fn tls_setup_error(e: rustls::Error) -> TransportError {
    TransportError::configuration(format!("failed to build TLS configuration: {}", e))
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(
        &self,
        message: &RenderedMessage,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReceipt, TransportError> {
        let session = self.session_config(cancel).await?;
        let mail = mime::compose(message)?;
        let recipients = message.recipient_list();

        let session = &session;
        let mail = &mail;
        let connector = &self.connector;

        let result = retry_with_backoff(
            &self.settings.retry_config(),
            cancel,
            SmtpFailure::is_transient,
            |attempt| async move {
                debug!(attempt, host = %session.host, "Sending email via SMTP");
                connector.transmit(session, mail).await.map(|()| attempt)
            },
        )
        .await;

        match result {
            Ok(attempts) => {
                info!(
                    recipients = %recipients,
                    attempts,
                    "Email accepted by SMTP server"
                );
                Ok(DeliveryReceipt {
                    attempts,
                    recipient_count: message.recipient_count(),
                    host: session.host.clone(),
                    accepted_at: Utc::now(),
                })
            }
            Err(RetryError::Cancelled { attempts }) => {
                warn!(recipients = %recipients, attempts, "Email delivery cancelled");
                Err(TransportError::Cancelled)
            }
            Err(
                RetryError::Exhausted { attempts, error } | RetryError::Fatal { attempts, error },
            ) => Err(TransportError::Send {
                recipients,
                attempts,
                source: error,
            }),
        }
    }
}
