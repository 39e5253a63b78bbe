use rustls::pki_types::CertificateDer;

/// Intermediate certificates loaded from one secret, in the order they
/// appeared in the PEM text.
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    secret_id: String,
    certificates: Vec<CertificateDer<'static>>,
}

impl CertificateBundle {
    pub fn new(secret_id: impl Into<String>, certificates: Vec<CertificateDer<'static>>) -> Self {
        Self {
            secret_id: secret_id.into(),
            certificates,
        }
    }

    pub fn secret_id(&self) -> &str {
        &self.secret_id
    }

    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}
