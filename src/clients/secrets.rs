use std::{collections::HashMap, io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::SecretStoreError;

/// Read access to named secrets holding text payloads.
///
/// `Ok(None)` means the store answered but had no string payload for the id.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret_string(&self, secret_id: &str) -> Result<Option<String>, SecretStoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemorySecretStore {
    secrets: HashMap<String, String>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, secret_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(secret_id.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret_string(&self, secret_id: &str) -> Result<Option<String>, SecretStoreError> {
        Ok(self.secrets.get(secret_id).cloned())
    }
}

/// Secrets mounted as files, one file per secret id, e.g. a Kubernetes
/// secret volume.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    directory: PathBuf,
}

impl FileSecretStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, secret_id: &str) -> Result<PathBuf, SecretStoreError> {
        if secret_id.is_empty()
            || secret_id.contains(['/', '\\'])
            || secret_id == "."
            || secret_id == ".."
        {
            return Err(SecretStoreError::Backend(format!(
                "invalid secret id '{}'",
                secret_id
            )));
        }
        Ok(self.directory.join(secret_id))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret_string(&self, secret_id: &str) -> Result<Option<String>, SecretStoreError> {
        let path = self.path_for(secret_id)?;
        debug!(path = %path.display(), "Reading secret file");

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(None),
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SecretStoreError::Io(format!("{}: {}", path.display(), e))),
        }
    }
}

#[cfg(feature = "aws")]
pub use aws::AwsSecretsManagerStore;

#[cfg(feature = "aws")]
mod aws {
    use async_trait::async_trait;
    use aws_sdk_secretsmanager::Client;
    use tracing::info;

    use super::SecretStore;
    use crate::error::SecretStoreError;

    pub struct AwsSecretsManagerStore {
        client: Client,
    }

    impl AwsSecretsManagerStore {
        pub fn new(client: Client) -> Self {
            Self { client }
        }

        /// Builds a client from the default AWS credential and region chain.
        pub async fn from_env() -> Self {
            let config = aws_config::load_from_env().await;
            info!("AWS Secrets Manager client initialized");
            Self::new(Client::new(&config))
        }
    }

    #[async_trait]
    impl SecretStore for AwsSecretsManagerStore {
        async fn get_secret_string(
            &self,
            secret_id: &str,
        ) -> Result<Option<String>, SecretStoreError> {
            let output = self
                .client
                .get_secret_value()
                .secret_id(secret_id)
                .send()
                .await
                .map_err(|e| SecretStoreError::Backend(e.to_string()))?;

            Ok(output.secret_string().map(str::to_owned))
        }
    }
}
