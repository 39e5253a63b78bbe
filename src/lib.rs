pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod telemetry;
pub mod utils;

pub use clients::{
    certificates::{CachedCertificateProvider, CertificateProvider},
    smtp::{MailTransport, SmtpSettings, SmtpTransport},
    specification::{InMemorySpecificationResolver, SpecificationResolver},
    template::TemplateRenderer,
};
pub use error::DeliveryError;
pub use service::NotificationService;
