use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use moka::future::Cache;
use rustls::pki_types::CertificateDer;
use tracing::{debug, info, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::{
    clients::secrets::SecretStore, error::CertificateError, models::certificate::CertificateBundle,
};

const BEGIN_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";
const END_CERTIFICATE: &str = "-----END CERTIFICATE-----";

/// Source of the extra intermediates used when validating the SMTP server.
#[async_trait]
pub trait IntermediateCertificateSource: Send + Sync {
    async fn intermediate_certificates(
        &self,
        secret_id: &str,
    ) -> Result<Arc<CertificateBundle>, CertificateError>;
}

pub struct CertificateProvider {
    secret_store: Arc<dyn SecretStore>,
}

impl CertificateProvider {
    pub fn new(secret_store: Arc<dyn SecretStore>) -> Self {
        Self { secret_store }
    }

    /// Fetches the PEM bundle stored under `secret_id` and decodes every
    /// certificate in it. No retries.
    pub async fn fetch_intermediate_certificates(
        &self,
        secret_id: &str,
    ) -> Result<CertificateBundle, CertificateError> {
        debug!(secret_id, "Fetching intermediate certificates");

        let pem = self
            .secret_store
            .get_secret_string(secret_id)
            .await
            .map_err(|e| CertificateError::Retrieval {
                secret_id: secret_id.to_owned(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| CertificateError::Retrieval {
                secret_id: secret_id.to_owned(),
                reason: "secret has no string payload".to_owned(),
            })?;

        let certificates = parse_pem_bundle(&pem).map_err(|reason| CertificateError::Parse {
            secret_id: secret_id.to_owned(),
            reason,
        })?;

        info!(
            secret_id,
            certificate_count = certificates.len(),
            "Intermediate certificates loaded"
        );

        Ok(CertificateBundle::new(secret_id, certificates))
    }
}

#[async_trait]
impl IntermediateCertificateSource for CertificateProvider {
    async fn intermediate_certificates(
        &self,
        secret_id: &str,
    ) -> Result<Arc<CertificateBundle>, CertificateError> {
        self.fetch_intermediate_certificates(secret_id)
            .await
            .map(Arc::new)
    }
}

/// Keeps each successfully parsed bundle for the life of the process.
/// Concurrent callers asking for the same secret share one fetch; failures
/// are not cached.
pub struct CachedCertificateProvider {
    provider: CertificateProvider,
    cache: Cache<String, Arc<CertificateBundle>>,
}

impl CachedCertificateProvider {
    pub fn new(provider: CertificateProvider) -> Self {
        Self {
            provider,
            cache: Cache::builder().build(),
        }
    }

    pub fn cached_entries(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl IntermediateCertificateSource for CachedCertificateProvider {
    async fn intermediate_certificates(
        &self,
        secret_id: &str,
    ) -> Result<Arc<CertificateBundle>, CertificateError> {
        self.cache
            .try_get_with(secret_id.to_owned(), async {
                self.provider
                    .fetch_intermediate_certificates(secret_id)
                    .await
                    .map(Arc::new)
            })
            .await
            .map_err(|e: Arc<CertificateError>| {
                warn!(secret_id, error = %e, "Intermediate certificate fetch failed");
                (*e).clone()
            })
    }
}

/// Splits PEM text into DER certificates.
///
/// Each `BEGIN`/`END CERTIFICATE` block has its delimiter lines stripped,
/// the remaining lines concatenated and base64-decoded, and the result must
/// parse as an X.509 certificate.
pub fn parse_pem_bundle(pem: &str) -> Result<Vec<CertificateDer<'static>>, String> {
    let mut certificates = Vec::new();
    let mut current: Option<String> = None;

    for line in pem.lines().map(str::trim) {
        if line == BEGIN_CERTIFICATE {
            if current.is_some() {
                return Err(format!(
                    "certificate {} is missing its END delimiter",
                    certificates.len() + 1
                ));
            }
            current = Some(String::new());
        } else if line == END_CERTIFICATE {
            let encoded = current.take().ok_or_else(|| {
                format!(
                    "certificate {} is missing its BEGIN delimiter",
                    certificates.len() + 1
                )
            })?;
            certificates.push(decode_certificate(&encoded, certificates.len() + 1)?);
        } else if let Some(encoded) = current.as_mut() {
            encoded.push_str(line);
        }
    }

    if current.is_some() {
        return Err(format!(
            "certificate {} is missing its END delimiter",
            certificates.len() + 1
        ));
    }
    if certificates.is_empty() {
        return Err("no PEM-encoded certificates found".to_owned());
    }

    Ok(certificates)
}

fn decode_certificate(encoded: &str, index: usize) -> Result<CertificateDer<'static>, String> {
    let der = STANDARD
        .decode(encoded)
        .map_err(|e| format!("certificate {} is not valid base64: {}", index, e))?;

    X509Certificate::from_der(&der)
        .map_err(|e| format!("certificate {} is not a valid X.509 certificate: {}", index, e))?;

    Ok(CertificateDer::from(der))
}
