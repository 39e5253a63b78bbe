use std::sync::{Arc, OnceLock};

use rustls::{
    ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    crypto::CryptoProvider,
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use tracing::{debug, warn};

use crate::models::certificate::CertificateBundle;

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// mail-send builds its fallback connector from the process-wide provider.
pub(crate) fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Trust anchors from the operating system store, loaded once per process.
pub fn system_root_store() -> Arc<RootCertStore> {
    static ROOTS: OnceLock<Arc<RootCertStore>> = OnceLock::new();
    Arc::clone(ROOTS.get_or_init(load_system_roots))
}

fn load_system_roots() -> Arc<RootCertStore> {
    let loaded = rustls_native_certs::load_native_certs();
    for error in &loaded.errors {
        warn!(error = %error, "Failed to read part of the system trust store");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);

    if roots.is_empty() {
        // Minimal containers often ship without a CA directory.
        warn!("System trust store is empty, falling back to bundled Mozilla roots");
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    } else {
        debug!(added, ignored, "System trust store loaded");
    }

    Arc::new(roots)
}

/// Server certificate check that builds the chain with extra intermediates
/// fetched for this session, on top of whatever the server presented.
///
/// Holds its own copy of the bundle; each session gets its own verifier so
/// concurrent sessions never see each other's trust material.
#[derive(Debug)]
pub struct IntermediateChainVerifier {
    inner: Arc<WebPkiServerVerifier>,
    intermediates: Vec<CertificateDer<'static>>,
    secret_id: String,
}

impl IntermediateChainVerifier {
    /// Anchors chains in the system trust store.
    pub fn new(bundle: &CertificateBundle) -> Result<Self, TlsError> {
        Self::with_roots(system_root_store(), bundle)
    }

    pub fn with_roots(
        roots: Arc<RootCertStore>,
        bundle: &CertificateBundle,
    ) -> Result<Self, TlsError> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, crypto_provider())
            .build()
            .map_err(|e| TlsError::General(e.to_string()))?;

        Ok(Self {
            inner,
            intermediates: bundle.certificates().to_vec(),
            secret_id: bundle.secret_id().to_owned(),
        })
    }

    pub fn intermediate_count(&self) -> usize {
        self.intermediates.len()
    }
}

impl ServerCertVerifier for IntermediateChainVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let chain: Vec<CertificateDer<'_>> = intermediates
            .iter()
            .map(borrowed)
            .chain(self.intermediates.iter().map(borrowed))
            .collect();

        match self
            .inner
            .verify_server_cert(end_entity, &chain, server_name, ocsp_response, now)
        {
            Ok(verified) => {
                debug!(
                    server = ?server_name,
                    presented = intermediates.len(),
                    supplied = self.intermediates.len(),
                    "Server certificate chain validated"
                );
                Ok(verified)
            }
            Err(e) => {
                warn!(
                    server = ?server_name,
                    secret_id = %self.secret_id,
                    chain_status = ?e,
                    "Server certificate chain validation failed"
                );
                Err(e)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn borrowed<'a>(cert: &'a CertificateDer<'_>) -> CertificateDer<'a> {
    let der: &'a [u8] = cert.as_ref();
    CertificateDer::from(der)
}

/// TLS client config using the system roots and the stock verifier.
pub fn standard_client_config() -> Result<Arc<ClientConfig>, TlsError> {
    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(system_root_store())
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// TLS client config whose server check also trusts `bundle` as intermediates.
pub fn custom_client_config(bundle: &CertificateBundle) -> Result<Arc<ClientConfig>, TlsError> {
    custom_client_config_with_roots(system_root_store(), bundle)
}

pub fn custom_client_config_with_roots(
    roots: Arc<RootCertStore>,
    bundle: &CertificateBundle,
) -> Result<Arc<ClientConfig>, TlsError> {
    let verifier = Arc::new(IntermediateChainVerifier::with_roots(roots, bundle)?);
    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(Arc::new(config))
}
