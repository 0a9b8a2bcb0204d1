//! Listener options and validation.

use crate::error::ConfigError;
use crate::tls::read_pem_file;
use serde::Deserialize;
use std::path::Path;

const DEFAULT_HOST: &str = "127.0.0.1";

/// Options for starting a [`MockServer`](crate::MockServer).
///
/// The port is kept as text so values taken from the environment or a config
/// file are validated in one place. An empty port or `"0"` picks an
/// ephemeral port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub host: String,
    pub port: String,
    pub use_tls: bool,
    /// PEM certificate chain (required when `use_tls` is set)
    pub cert_pem: Option<Vec<u8>>,
    /// PEM private key (required when `use_tls` is set)
    pub key_pem: Option<Vec<u8>>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: "0".to_string(),
            use_tls: false,
            cert_pem: None,
            key_pem: None,
        }
    }
}

/// Validated listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenSettings {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsMaterial>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: impl ToString) -> Self {
        self.port = port.to_string();
        self
    }

    /// Serve HTTPS with the given PEM certificate chain and private key.
    pub fn with_tls(mut self, cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        self.use_tls = true;
        self.cert_pem = Some(cert_pem.into());
        self.key_pem = Some(key_pem.into());
        self
    }

    /// Serve HTTPS with PEM material read from files.
    pub fn with_tls_files(
        self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, anyhow::Error> {
        let cert = read_pem_file(cert_path)?;
        let key = read_pem_file(key_path)?;
        Ok(self.with_tls(cert, key))
    }

    /// Check the options and resolve them into listener settings.
    pub fn validate(&self) -> Result<ListenSettings, ConfigError> {
        let tls = if self.use_tls {
            match (&self.cert_pem, &self.key_pem) {
                (Some(cert), Some(key)) => Some(TlsMaterial {
                    cert_pem: cert.clone(),
                    key_pem: key.clone(),
                }),
                _ => return Err(ConfigError::MissingTlsMaterial),
            }
        } else {
            None
        };

        let raw = self.port.trim();
        let raw = if raw.is_empty() { "0" } else { raw };
        let port: i64 = raw
            .parse()
            .map_err(|_| ConfigError::InvalidPort(self.port.clone()))?;
        let port = u16::try_from(port).map_err(|_| ConfigError::PortOutOfRange(port))?;

        let host = if self.host.trim().is_empty() {
            DEFAULT_HOST.to_string()
        } else {
            self.host.trim().to_string()
        };

        Ok(ListenSettings { host, port, tls })
    }
}
