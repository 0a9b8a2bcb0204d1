//! Error types for the mock server.

use std::fmt;

/// Invalid server options, detected before any listener is bound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("port is not a valid integer: {0:?}")]
    InvalidPort(String),
    #[error("port is not a valid port number: {0}")]
    PortOutOfRange(i64),
    #[error("use_tls is set to true but no certificate or key is provided")]
    MissingTlsMaterial,
}

/// Failure to construct a running server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid options: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to listen on {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("could not load certificate: {0}")]
    Tls(anyhow::Error),
}

/// A single validator rejecting a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request validation failed: {reason}")]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Fatal outcome of resolving a request against the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    /// Neither a counted nor a default expectation accepted the request.
    #[error("Unexpected call:\nMethod: {method}\nPath: {path}\nHeaders: {headers}\nBody: {body}")]
    Unmatched {
        method: String,
        path: String,
        headers: HeaderDump,
        body: String,
    },
    /// The matched expectation never had `response(..)` called on it.
    #[error("Response not defined for expectation:\n{}", format_descriptions(.descriptions))]
    MissingResponse { descriptions: Vec<String> },
}

/// Header listing used in unmatched-call diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderDump(pub Vec<(String, String)>);

impl fmt::Display for HeaderDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str("}")
    }
}

pub(crate) fn format_descriptions(descriptions: &[String]) -> String {
    descriptions
        .iter()
        .map(|d| format!("----- {d}\n"))
        .collect()
}
