use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, Error, Result, anyhow};
use clap::{Parser, Subcommand};
use notification_mailer::{
    CachedCertificateProvider, CertificateProvider, InMemorySpecificationResolver,
    NotificationService, SmtpTransport, TemplateRenderer,
    clients::secrets::{FileSecretStore, SecretStore},
    config::Config,
    models::message::Attachment,
    telemetry,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "notification-mailer", version, about = "Templated SMTP notification sender")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the configured SMTP server and quit without sending.
    Check,
    /// Render and send one notification.
    Send {
        #[arg(long)]
        notification_type: String,

        /// JSON file with the template model.
        #[arg(long)]
        data: PathBuf,

        /// `path[:mime/type]`, may be repeated.
        #[arg(long = "attach")]
        attachments: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "notification-mailer failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool, Error> {
    let config = Config::load()?;
    telemetry::init_tracing(config.log_format)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            shutdown.cancel();
        }
    });

    let secret_store = secret_store(&config).await;
    let certificates = Arc::new(CachedCertificateProvider::new(CertificateProvider::new(
        secret_store,
    )));
    let transport = SmtpTransport::new(config.smtp_settings()?, certificates)?;

    match cli.command {
        Command::Check => {
            transport.check_connection(&cancel).await?;
            info!(host = %transport.settings().host, "SMTP server reachable");
            Ok(true)
        }
        Command::Send {
            notification_type,
            data,
            attachments,
        } => {
            let specifications_path = config
                .specifications_path
                .as_ref()
                .ok_or_else(|| anyhow!("SPECIFICATIONS_PATH must be set to send notifications"))?;
            let resolver = InMemorySpecificationResolver::load(specifications_path).await?;
            info!(specifications = resolver.len(), "Specifications loaded");

            let model: serde_json::Value = serde_json::from_str(
                &tokio::fs::read_to_string(&data)
                    .await
                    .with_context(|| format!("failed to read {}", data.display()))?,
            )
            .with_context(|| format!("{} is not valid JSON", data.display()))?;

            let mut loaded = Vec::with_capacity(attachments.len());
            for argument in &attachments {
                loaded.push(load_attachment(argument).await?);
            }

            let service = NotificationService::new(
                Arc::new(resolver),
                Arc::new(TemplateRenderer::new()),
                Arc::new(transport),
            );

            Ok(service
                .send_with_cancellation(&notification_type, &model, loaded, &cancel)
                .await)
        }
    }
}

#[cfg(feature = "aws")]
async fn secret_store(config: &Config) -> Arc<dyn SecretStore> {
    use notification_mailer::clients::secrets::AwsSecretsManagerStore;

    match &config.secrets_directory {
        Some(directory) => Arc::new(FileSecretStore::new(directory.clone())),
        None => Arc::new(AwsSecretsManagerStore::from_env().await),
    }
}

#[cfg(not(feature = "aws"))]
async fn secret_store(config: &Config) -> Arc<dyn SecretStore> {
    let directory = config
        .secrets_directory
        .clone()
        .unwrap_or_else(|| PathBuf::from("secrets"));
    Arc::new(FileSecretStore::new(directory))
}

async fn load_attachment(argument: &str) -> Result<Attachment, Error> {
    let (path, mime_type) = match argument.rsplit_once(':') {
        Some((path, mime)) if mime.contains('/') => (path, mime),
        _ => (argument, "application/octet-stream"),
    };
    let path = PathBuf::from(path);

    let content = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read attachment {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("attachment path {} has no file name", path.display()))?;

    Ok(Attachment::new(filename, content, mime_type))
}
