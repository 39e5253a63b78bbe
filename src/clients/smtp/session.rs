use async_trait::async_trait;
use mail_send::{SmtpClient, SmtpClientBuilder, smtp::message::Message};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::{Security, SessionConfig, SmtpConnector, mime::OutgoingMail, tls};
use crate::models::status::{SmtpFailure, SmtpStatusCode};

/// Opens a fresh mail-send session for every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpSmtpConnector;

#[async_trait]
impl SmtpConnector for TcpSmtpConnector {
    async fn transmit(
        &self,
        config: &SessionConfig,
        mail: &OutgoingMail,
    ) -> Result<(), SmtpFailure> {
        let builder = client_builder(config)?;
        let sender = mail
            .envelope
            .from()
            .map(|address| address.to_string())
            .unwrap_or_default();
        let recipients: Vec<String> = mail.envelope.to().iter().map(|a| a.to_string()).collect();
        let message = Message::new(
            sender.as_str(),
            recipients.iter().map(String::as_str),
            mail.formatted.as_slice(),
        );

        let sent = match config.security {
            Security::Plain => {
                let client = builder.connect_plain().await.map_err(classify)?;
                send_and_quit(client, message).await
            }
            Security::StartTls | Security::Implicit => {
                let client = builder.connect().await.map_err(classify)?;
                send_and_quit(client, message).await
            }
        };

        sent.map_err(classify)
    }

    async fn probe(&self, config: &SessionConfig) -> Result<(), SmtpFailure> {
        let builder = client_builder(config)?;
        let quit = match config.security {
            Security::Plain => builder.connect_plain().await.map_err(classify)?.quit().await,
            Security::StartTls | Security::Implicit => {
                builder.connect().await.map_err(classify)?.quit().await
            }
        };

        if let Err(e) = quit {
            debug!(host = %config.host, error = %e, "QUIT after probe failed");
        }
        Ok(())
    }
}

fn client_builder(config: &SessionConfig) -> Result<SmtpClientBuilder<String>, SmtpFailure> {
    tls::install_crypto_provider();

    let mut builder = SmtpClientBuilder::new(config.host.clone(), config.port)
        .implicit_tls(config.security == Security::Implicit)
        .helo_host(config.hello_name.clone())
        .timeout(config.timeout);

    if let Some(credentials) = &config.credentials {
        builder = builder.credentials((
            credentials.username.clone(),
            credentials.password.clone(),
        ));
    }

    if config.security != Security::Plain {
        let tls = config
            .tls
            .clone()
            .ok_or_else(|| SmtpFailure::general("TLS requested without a TLS configuration"))?;
        builder.tls_connector = TlsConnector::from(tls);
    }

    debug!(
        host = %config.host,
        port = config.port,
        security = ?config.security,
        "Opening SMTP session"
    );
    Ok(builder)
}

async fn send_and_quit<T>(
    mut client: SmtpClient<T>,
    message: Message<'_>,
) -> Result<(), mail_send::Error>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    client.send(message).await?;
    if let Err(e) = client.quit().await {
        debug!(error = %e, "QUIT after accepted message failed");
    }
    Ok(())
}

/// Maps a mail-send error onto the status the retry policy looks at.
/// Replies keep their code; anything that never produced one is a general failure.
pub(crate) fn classify(error: mail_send::Error) -> SmtpFailure {
    match error {
        mail_send::Error::UnexpectedReply(reply)
        | mail_send::Error::AuthenticationFailed(reply) => {
            SmtpFailure::from_reply(reply.code, reply.message)
        }
        mail_send::Error::MissingStartTls => SmtpFailure::new(
            SmtpStatusCode::MustIssueStartTlsFirst,
            "server does not advertise STARTTLS",
        ),
        e @ (mail_send::Error::InvalidTLSName
        | mail_send::Error::MissingCredentials
        | mail_send::Error::UnsupportedAuthMechanism
        | mail_send::Error::MissingMailFrom
        | mail_send::Error::MissingRcptTo) => {
            SmtpFailure::new(SmtpStatusCode::ClientConfiguration, e.to_string())
        }
        e => SmtpFailure::general(e.to_string()),
    }
}
