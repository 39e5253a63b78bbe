use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use notification_mailer::{
    clients::{
        secrets::{InMemorySecretStore, SecretStore},
        smtp::{MailTransport, SessionConfig, SmtpConnector, mime::OutgoingMail},
    },
    error::{SecretStoreError, TransportError},
    models::{
        certificate::CertificateBundle,
        message::{DeliveryReceipt, RenderedMessage},
        status::SmtpFailure,
    },
};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::{
    RootCertStore, ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
    time::Instant,
};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

pub const INTERMEDIATES_PEM: &str = include_str!("fixtures/intermediates.pem");

/// Counts every lookup before handing it to an in-memory store.
pub struct CountingSecretStore {
    inner: InMemorySecretStore,
    pub calls: AtomicU32,
}

impl CountingSecretStore {
    pub fn new(inner: InMemorySecretStore) -> Self {
        Self {
            inner,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for CountingSecretStore {
    async fn get_secret_string(&self, secret_id: &str) -> Result<Option<String>, SecretStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_secret_string(secret_id).await
    }
}

/// Replays canned results and records when each attempt happened.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Result<(), SmtpFailure>>>,
    attempts: Mutex<Vec<Instant>>,
    sessions: Mutex<Vec<SessionConfig>>,
    mails: Mutex<Vec<OutgoingMail>>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Result<(), SmtpFailure>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn sessions(&self) -> Vec<SessionConfig> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn mails(&self) -> Vec<OutgoingMail> {
        self.mails.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmtpConnector for ScriptedConnector {
    async fn transmit(
        &self,
        config: &SessionConfig,
        mail: &OutgoingMail,
    ) -> Result<(), SmtpFailure> {
        self.attempts.lock().unwrap().push(Instant::now());
        self.sessions.lock().unwrap().push(config.clone());
        self.mails.lock().unwrap().push(mail.clone());

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn probe(&self, config: &SessionConfig) -> Result<(), SmtpFailure> {
        self.sessions.lock().unwrap().push(config.clone());
        Ok(())
    }
}

/// Records every message it is asked to deliver.
pub struct SpyTransport {
    messages: Mutex<Vec<RenderedMessage>>,
    failure: Option<SmtpFailure>,
}

impl SpyTransport {
    pub fn accepting() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    pub fn failing(failure: SmtpFailure) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            failure: Some(failure),
        }
    }

    pub fn messages(&self) -> Vec<RenderedMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for SpyTransport {
    async fn deliver(
        &self,
        message: &RenderedMessage,
        _cancel: &CancellationToken,
    ) -> Result<DeliveryReceipt, TransportError> {
        self.messages.lock().unwrap().push(message.clone());

        match &self.failure {
            Some(failure) => Err(TransportError::Send {
                recipients: message.recipient_list(),
                attempts: 3,
                source: failure.clone(),
            }),
            None => Ok(DeliveryReceipt {
                attempts: 1,
                recipient_count: message.recipient_count(),
                host: "smtp.example.com".to_owned(),
                accepted_at: Utc::now(),
            }),
        }
    }
}

/// Marks a step that reads the DATA payload up to the terminating dot.
pub const DATA_PAYLOAD: &str = "<data>";

/// A one-connection SMTP server. Sends the greeting, then for each step reads
/// one command, checks its prefix and writes the canned reply. Resolves to
/// every command and payload it received.
pub async fn spawn_smtp_server(
    steps: Vec<(&'static str, &'static str)>,
) -> (SocketAddr, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let mut received = Vec::new();

        write.write_all(b"220 test.local ESMTP ready\r\n").await.unwrap();

        for (expected, reply) in steps {
            let mut input = String::new();
            if expected == DATA_PAYLOAD {
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap() == 0 || line == ".\r\n" {
                        break;
                    }
                    input.push_str(&line);
                }
            } else {
                reader.read_line(&mut input).await.unwrap();
                assert!(
                    input.starts_with(expected),
                    "expected {expected:?}, got {input:?}"
                );
            }
            received.push(input);
            write.write_all(reply.as_bytes()).await.unwrap();
        }

        received
    });

    (addr, handle)
}

/// Steps for a session that accepts one message for one recipient.
pub fn accepting_session() -> Vec<(&'static str, &'static str)> {
    vec![
        ("EHLO", "250-test.local\r\n250 SIZE 10240000\r\n"),
        ("MAIL FROM", "250 2.1.0 OK\r\n"),
        ("RCPT TO", "250 2.1.5 OK\r\n"),
        ("DATA", "354 Start mail input\r\n"),
        (DATA_PAYLOAD, "250 2.0.0 OK queued as 12345\r\n"),
        ("QUIT", "221 2.0.0 Bye\r\n"),
    ]
}

/// A private root, one intermediate and a leaf for `server_name`, the way a
/// relay signed by an in-house CA looks.
pub struct TestPki {
    pub root: CertificateDer<'static>,
    pub intermediate: CertificateDer<'static>,
    pub leaf: CertificateDer<'static>,
    leaf_key: Vec<u8>,
}

impl TestPki {
    pub fn generate(server_name: &str) -> Self {
        let root_key = KeyPair::generate().unwrap();
        let root = ca_params("Test Root CA").self_signed(&root_key).unwrap();

        let intermediate_key = KeyPair::generate().unwrap();
        let intermediate = ca_params("Test Intermediate CA")
            .signed_by(&intermediate_key, &root, &root_key)
            .unwrap();

        let mut leaf_params = CertificateParams::new(vec![server_name.to_owned()]).unwrap();
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let leaf_key = KeyPair::generate().unwrap();
        let leaf = leaf_params
            .signed_by(&leaf_key, &intermediate, &intermediate_key)
            .unwrap();

        Self {
            root: root.der().clone(),
            intermediate: intermediate.der().clone(),
            leaf: leaf.der().clone(),
            leaf_key: leaf_key.serialize_der(),
        }
    }

    /// A trust store holding only the private root.
    pub fn roots(&self) -> Arc<RootCertStore> {
        let mut roots = RootCertStore::empty();
        roots.add(self.root.clone()).unwrap();
        Arc::new(roots)
    }

    pub fn bundle(&self) -> CertificateBundle {
        CertificateBundle::new("smtp-intermediates", vec![self.intermediate.clone()])
    }

    /// Server side that presents the leaf alone and leaves the intermediate out.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.leaf_key.clone()));
        let config = ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![self.leaf.clone()], key)
        .unwrap();
        Arc::new(config)
    }
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params
}

/// A one-connection server that offers STARTTLS, upgrades with `config`
/// and then answers EHLO and QUIT over TLS. Resolves to the commands read
/// after the upgrade, or the error that ended the handshake.
pub async fn spawn_starttls_server(
    config: Arc<ServerConfig>,
) -> (SocketAddr, JoinHandle<std::io::Result<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await?;
        let mut plain = BufReader::new(socket);
        plain.get_mut().write_all(b"220 test.local ESMTP ready\r\n").await?;

        let mut line = String::new();
        plain.read_line(&mut line).await?;
        assert!(line.starts_with("EHLO"), "got {line:?}");
        plain
            .get_mut()
            .write_all(b"250-test.local\r\n250 STARTTLS\r\n")
            .await?;

        line.clear();
        plain.read_line(&mut line).await?;
        assert!(line.starts_with("STARTTLS"), "got {line:?}");
        plain.get_mut().write_all(b"220 2.0.0 Ready to start TLS\r\n").await?;

        let tls = TlsAcceptor::from(config).accept(plain.into_inner()).await?;
        let mut secure = BufReader::new(tls);
        let mut received = Vec::new();

        loop {
            let mut line = String::new();
            if secure.read_line(&mut line).await? == 0 {
                break;
            }
            let reply: &[u8] = if line.starts_with("QUIT") {
                b"221 2.0.0 Bye\r\n"
            } else {
                b"250 test.local\r\n"
            };
            let quit = line.starts_with("QUIT");
            received.push(line);

            secure.get_mut().write_all(reply).await?;
            secure.get_mut().flush().await?;
            if quit {
                break;
            }
        }

        Ok(received)
    });

    (addr, handle)
}
