use anyhow::Result;
use notification_mailer::{
    clients::{
        certificates::{CachedCertificateProvider, CertificateProvider},
        secrets::InMemorySecretStore,
        smtp::{
            Credentials, MailTransport, Security, SessionConfig, SmtpConnector, SmtpSettings,
            SmtpTransport, TcpSmtpConnector, mime, tls,
        },
        template::TemplateRenderer,
    },
    error::TransportError,
    models::{
        certificate::CertificateBundle,
        message::{MailAddress, RenderedMessage},
        specification::{Recipient, RecipientRole},
        status::SmtpStatusCode,
    },
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use crate::support::{
    DATA_PAYLOAD, TestPki, accepting_session, spawn_smtp_server, spawn_starttls_server,
};

fn session(addr: SocketAddr) -> SessionConfig {
    SessionConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        security: Security::Plain,
        hello_name: "mailer.test".to_owned(),
        credentials: None,
        timeout: Duration::from_secs(5),
        tls: None,
    }
}

fn message() -> RenderedMessage {
    let renderer = TemplateRenderer::new();
    let html = renderer
        .render(
            "<div>{{ Content }}</div>",
            &serde_json::json!({ "Content": "Test Content" }),
        )
        .unwrap();

    let mut message = RenderedMessage::new(
        "Test Subject".to_owned(),
        html,
        MailAddress::new("sender@example.com"),
        3,
    );
    message.add_recipient(&Recipient::new("recipient@example.com", RecipientRole::To));
    message
}

/// Test: A full session delivers the message and quits
#[tokio::test]
async fn test_delivers_over_plain_session() -> Result<()> {
    let (addr, server) = spawn_smtp_server(accepting_session()).await;
    let mail = mime::compose(&message())?;

    TcpSmtpConnector.transmit(&session(addr), &mail).await?;

    let received = server.await?;
    assert!(received[0].starts_with("EHLO mailer.test"));
    assert!(received[1].starts_with("MAIL FROM:<sender@example.com>"));
    assert!(received[2].starts_with("RCPT TO:<recipient@example.com>"));
    assert!(received[4].contains("Subject: Test Subject"));
    assert!(received[4].contains("<div>Test Content</div>"));
    assert_eq!(received[5], "QUIT\r\n");

    Ok(())
}

/// Test: Credentials are sent with AUTH PLAIN before the envelope
#[tokio::test]
async fn test_authenticates_when_credentials_set() -> Result<()> {
    let mut steps = vec![
        ("EHLO", "250-test.local\r\n250 AUTH PLAIN\r\n"),
        ("AUTH PLAIN", "235 2.7.0 Authentication successful\r\n"),
    ];
    steps.extend(accepting_session().into_iter().skip(1));
    let (addr, server) = spawn_smtp_server(steps).await;

    let mut config = session(addr);
    config.credentials = Some(Credentials::new("mailer", "secret"));
    TcpSmtpConnector
        .transmit(&config, &mime::compose(&message())?)
        .await?;

    let received = server.await?;
    // base64("\0mailer\0secret")
    assert!(received[1].contains("AG1haWxlcgBzZWNyZXQ="));

    Ok(())
}

/// Test: Rejected credentials are permanent
#[tokio::test]
async fn test_rejected_credentials_are_fatal() -> Result<()> {
    let (addr, _server) = spawn_smtp_server(vec![
        ("EHLO", "250-test.local\r\n250 AUTH PLAIN\r\n"),
        ("AUTH PLAIN", "535 5.7.8 Authentication credentials invalid\r\n"),
    ])
    .await;

    let mut config = session(addr);
    config.credentials = Some(Credentials::new("mailer", "wrong"));
    let failure = assert_err!(
        TcpSmtpConnector
            .transmit(&config, &mime::compose(&message())?)
            .await
    );

    assert_eq!(failure.status, SmtpStatusCode::AuthenticationFailed);
    assert!(!failure.is_transient());

    Ok(())
}

/// Test: Credentials the server offers no mechanism for fail without retry
#[tokio::test]
async fn test_no_common_auth_mechanism_is_fatal() -> Result<()> {
    let (addr, _server) = spawn_smtp_server(vec![("EHLO", "250 test.local\r\n")]).await;

    let mut config = session(addr);
    config.credentials = Some(Credentials::new("mailer", "secret"));
    let failure = assert_err!(
        TcpSmtpConnector
            .transmit(&config, &mime::compose(&message())?)
            .await
    );

    assert_eq!(failure.status, SmtpStatusCode::ClientConfiguration);
    assert!(!failure.is_transient());

    Ok(())
}

/// Test: A 550 recipient rejection is reported as transient
#[tokio::test]
async fn test_mailbox_unavailable_is_transient() -> Result<()> {
    let (addr, _server) = spawn_smtp_server(vec![
        ("EHLO", "250 test.local\r\n"),
        ("MAIL FROM", "250 OK\r\n"),
        ("RCPT TO", "550 5.1.1 Mailbox unavailable\r\n"),
    ])
    .await;

    let failure = TcpSmtpConnector
        .transmit(&session(addr), &mime::compose(&message())?)
        .await
        .unwrap_err();

    assert_eq!(failure.status, SmtpStatusCode::MailboxUnavailable);
    assert!(failure.is_transient());
    assert!(failure.message.contains("Mailbox unavailable"));

    Ok(())
}

/// Test: A 553 recipient rejection is reported as permanent
#[tokio::test]
async fn test_mailbox_name_not_allowed_is_fatal() -> Result<()> {
    let (addr, _server) = spawn_smtp_server(vec![
        ("EHLO", "250 test.local\r\n"),
        ("MAIL FROM", "250 OK\r\n"),
        ("RCPT TO", "553 5.1.3 Mailbox name not allowed\r\n"),
    ])
    .await;

    let failure = TcpSmtpConnector
        .transmit(&session(addr), &mime::compose(&message())?)
        .await
        .unwrap_err();

    assert_eq!(failure.status, SmtpStatusCode::MailboxNameNotAllowed);
    assert!(!failure.is_transient());

    Ok(())
}

/// Test: STARTTLS is required when TLS is on and the server does not offer it
#[tokio::test]
async fn test_missing_starttls_is_rejected() -> Result<()> {
    let (addr, _server) = spawn_smtp_server(vec![("EHLO", "250 test.local\r\n")]).await;

    let mut settings = SmtpSettings::new(addr.ip().to_string(), addr.port());
    settings.max_retry_attempts = 1;
    let transport = SmtpTransport::new(
        settings,
        Arc::new(CachedCertificateProvider::new(CertificateProvider::new(
            Arc::new(InMemorySecretStore::new()),
        ))),
    )?;

    let err = transport
        .deliver(&message(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        TransportError::Send { source, .. } => {
            assert_eq!(source.status, SmtpStatusCode::MustIssueStartTlsFirst);
        }
        other => panic!("unexpected error: {other}"),
    }

    Ok(())
}

/// Test: A closed port is a general, retryable failure
#[tokio::test]
async fn test_connection_refused_is_general_failure() -> Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let failure = assert_err!(
        TcpSmtpConnector
            .transmit(&session(addr), &mime::compose(&message())?)
            .await
    );

    assert_eq!(failure.status, SmtpStatusCode::GeneralFailure);
    assert!(failure.is_transient());

    Ok(())
}

/// Test: Probing greets the server and quits
#[tokio::test]
async fn test_probe_greets_and_quits() -> Result<()> {
    let (addr, server) = spawn_smtp_server(vec![
        ("EHLO", "250 test.local\r\n"),
        ("QUIT", "221 Bye\r\n"),
    ])
    .await;

    assert_ok!(TcpSmtpConnector.probe(&session(addr)).await);

    let received = server.await?;
    assert_eq!(received.len(), 2);

    Ok(())
}

/// Test: The payload step marker is only used for DATA content
#[test]
fn test_accepting_session_reads_payload_after_data() {
    let steps = accepting_session();
    let data = steps.iter().position(|(cmd, _)| *cmd == "DATA").unwrap();
    assert_eq!(steps[data + 1].0, DATA_PAYLOAD);
}

fn starttls_session(addr: SocketAddr, tls: Arc<rustls::ClientConfig>) -> SessionConfig {
    SessionConfig {
        host: "localhost".to_owned(),
        security: Security::StartTls,
        tls: Some(tls),
        ..session(addr)
    }
}

/// Test: The STARTTLS upgrade succeeds when the bundle supplies the missing intermediate
#[tokio::test]
async fn test_starttls_upgrade_with_supplied_intermediate() -> Result<()> {
    let pki = TestPki::generate("localhost");
    let (addr, server) = spawn_starttls_server(pki.server_config()).await;

    let tls = tls::custom_client_config_with_roots(pki.roots(), &pki.bundle())?;
    assert_ok!(TcpSmtpConnector.probe(&starttls_session(addr, tls)).await);

    let received = server.await??;
    assert!(received[0].starts_with("EHLO mailer.test"));
    assert_eq!(received.last().map(String::as_str), Some("QUIT\r\n"));

    Ok(())
}

/// Test: Without the intermediate the handshake is refused and the failure is retryable
#[tokio::test]
async fn test_starttls_upgrade_without_intermediate_fails() -> Result<()> {
    let pki = TestPki::generate("localhost");
    let (addr, server) = spawn_starttls_server(pki.server_config()).await;

    let empty = CertificateBundle::new("smtp-intermediates", Vec::new());
    let tls = tls::custom_client_config_with_roots(pki.roots(), &empty)?;
    let failure = assert_err!(TcpSmtpConnector.probe(&starttls_session(addr, tls)).await);

    assert_eq!(failure.status, SmtpStatusCode::GeneralFailure);
    assert!(failure.is_transient());
    assert!(server.await?.is_err(), "server should see the aborted handshake");

    Ok(())
}
