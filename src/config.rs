use std::{path::PathBuf, time::Duration};

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    clients::smtp::{Credentials, SmtpSettings},
    error::TransportError,
};

#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_true")]
    pub smtp_use_tls: bool,
    #[serde(default)]
    pub smtp_implicit_tls: bool,

    #[serde(default)]
    pub smtp_use_custom_server_certificate_validation: bool,
    pub smtp_server_intermediate_certificate_secret_id: Option<String>,

    #[serde(default = "default_max_retry_attempts")]
    pub smtp_max_retry_attempts: u32,
    #[serde(default = "default_retry_delay_milliseconds")]
    pub smtp_retry_delay_milliseconds: u64,
    pub smtp_max_retry_delay_milliseconds: Option<u64>,
    #[serde(default = "default_timeout_milliseconds")]
    pub smtp_timeout_milliseconds: u64,

    #[serde(default = "default_hello_name")]
    pub smtp_hello_name: String,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,

    pub secrets_directory: Option<PathBuf>,
    pub specifications_path: Option<PathBuf>,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_milliseconds() -> u64 {
    1000
}

fn default_timeout_milliseconds() -> u64 {
    30_000
}

fn default_hello_name() -> String {
    "localhost".to_owned()
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    /// Reads the same keys from an explicit list instead of the process environment.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(pairs)
            .map_err(|e| anyhow!("Invalid or missing configuration value: {}", e))
    }

    pub fn smtp_settings(&self) -> Result<SmtpSettings, TransportError> {
        let credentials = match (&self.smtp_username, &self.smtp_password) {
            (Some(username), password) if !username.trim().is_empty() => Some(Credentials::new(
                username.clone(),
                password.clone().unwrap_or_default(),
            )),
            _ => None,
        };

        let settings = SmtpSettings {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            use_tls: self.smtp_use_tls,
            implicit_tls: self.smtp_implicit_tls,
            use_custom_server_certificate_validation: self
                .smtp_use_custom_server_certificate_validation,
            server_intermediate_certificate_secret_id: self
                .smtp_server_intermediate_certificate_secret_id
                .clone(),
            max_retry_attempts: self.smtp_max_retry_attempts,
            retry_delay: Duration::from_millis(self.smtp_retry_delay_milliseconds),
            max_retry_delay: self.smtp_max_retry_delay_milliseconds.map(Duration::from_millis),
            timeout: Duration::from_millis(self.smtp_timeout_milliseconds),
            hello_name: self.smtp_hello_name.clone(),
            credentials,
        };

        settings.validate()?;
        Ok(settings)
    }
}
