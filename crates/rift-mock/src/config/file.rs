//! Declarative expectation files.
//!
//! A YAML (or JSON) file describing server options and the `every`, `expect`
//! and `defaults` lists. Each entry is applied through the same fluent API
//! tests use, so both paths share validation and diagnostics.
//!
//! ```yaml
//! server:
//!   port: 8080
//! every:
//!   - request:
//!       - header_exists: X-Trace
//! expect:
//!   - request:
//!       - method: GET
//!       - path: /users
//!     times: 2
//!     response:
//!       status: 200
//!       json: [{"id": 1}]
//! defaults:
//!   - response:
//!       status: 404
//! ```

use super::options::ServerOptions;
use crate::builder::{ExpectationBuilder, ResponseBuilder};
use crate::server::MockServer;
use crate::tls::read_pem_file;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level file layout.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MockFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub every: Vec<ExpectationSpec>,
    #[serde(default)]
    pub expect: Vec<ExpectationSpec>,
    #[serde(default)]
    pub defaults: Vec<ExpectationSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Port as a number or a string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsFiles>,
}

/// TLS configuration for the HTTPS listener
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsFiles {
    /// Path to TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// One expectation entry.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExpectationSpec {
    #[serde(default)]
    pub request: Vec<MatcherSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_times: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_times: Option<usize>,
    #[serde(default)]
    pub any_times: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSpec>,
}

/// Request matcher vocabulary, mirroring [`ExpectationBuilder`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherSpec {
    Method(String),
    Path(String),
    PathRegex(String),
    Header { name: String, value: String },
    HeaderExists(String),
    HeaderRegex { name: String, pattern: String },
    Query { name: String, value: String },
    QueryExists(String),
    QueryRegex { name: String, pattern: String },
    Form { name: String, value: String },
    FormExists(String),
    FormRegex { name: String, pattern: String },
    Body(String),
    BodyContains(String),
    BodyRegex(String),
    JsonBody(serde_json::Value),
    JsonPath { path: String, value: serde_json::Value },
    BasicAuth { user: String, password: String },
    BasicAuthExists,
    BearerToken,
    JwtClaim { path: String, value: serde_json::Value },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResponseSpec {
    pub status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

impl MockFile {
    /// Load a file. JSON is accepted since it is valid YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mock file '{}'", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse mock file '{}'", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self, anyhow::Error> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Server options described by the file, with TLS material loaded from disk.
    pub fn server_options(&self) -> Result<ServerOptions, anyhow::Error> {
        let mut options = ServerOptions::default();
        if let Some(host) = &self.server.host {
            options = options.with_host(host.clone());
        }
        if let Some(port) = &self.server.port {
            options = options.with_port(port_text(port)?);
        }
        if let Some(tls) = &self.server.tls {
            let cert = read_pem_file(&tls.cert_path)?;
            let key = read_pem_file(&tls.key_path)?;
            options = options.with_tls(cert, key);
        }
        Ok(options)
    }

    /// Register every declared expectation on `server`, preserving file order.
    pub fn install(&self, server: &MockServer) {
        for spec in &self.every {
            spec.apply_matchers(server.every());
        }
        for spec in &self.expect {
            spec.apply(server.expect());
        }
        for spec in &self.defaults {
            spec.apply(server.default());
        }
    }
}

fn port_text(value: &serde_yaml::Value) -> Result<String, anyhow::Error> {
    match value {
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::String(s) => Ok(s.clone()),
        other => anyhow::bail!("server.port must be a number or a string, got {other:?}"),
    }
}

impl ExpectationSpec {
    fn apply_matchers(&self, builder: ExpectationBuilder) -> ExpectationBuilder {
        self.request.iter().fold(builder, |b, m| m.apply(b))
    }

    fn apply(&self, builder: ExpectationBuilder) {
        let mut builder = self.apply_matchers(builder);
        if let Some(n) = self.times {
            builder = builder.times(n);
        }
        if self.any_times {
            builder = builder.any_times();
        }
        if let Some(n) = self.min_times {
            builder = builder.min_times(n);
        }
        if let Some(n) = self.max_times {
            builder = builder.max_times(n);
        }
        if let Some(response) = &self.response {
            response.apply(builder.response(response.status));
        }
    }
}

impl MatcherSpec {
    pub fn apply(&self, b: ExpectationBuilder) -> ExpectationBuilder {
        match self {
            MatcherSpec::Method(m) => b.method(m),
            MatcherSpec::Path(p) => b.path(p),
            MatcherSpec::PathRegex(p) => b.path_regex(p),
            MatcherSpec::Header { name, value } => b.header(name, value),
            MatcherSpec::HeaderExists(name) => b.header_exists(name),
            MatcherSpec::HeaderRegex { name, pattern } => b.header_regex(name, pattern),
            MatcherSpec::Query { name, value } => b.query_param(name, value),
            MatcherSpec::QueryExists(name) => b.query_param_exists(name),
            MatcherSpec::QueryRegex { name, pattern } => b.query_param_regex(name, pattern),
            MatcherSpec::Form { name, value } => b.form_param(name, value),
            MatcherSpec::FormExists(name) => b.form_param_exists(name),
            MatcherSpec::FormRegex { name, pattern } => b.form_param_regex(name, pattern),
            MatcherSpec::Body(body) => b.string_body(body),
            MatcherSpec::BodyContains(s) => b.body_contains(s),
            MatcherSpec::BodyRegex(p) => b.body_regex(p),
            MatcherSpec::JsonBody(value) => b.json_body(value),
            MatcherSpec::JsonPath { path, value } => b.json_path(path, value),
            MatcherSpec::BasicAuth { user, password } => b.basic_auth(user, password),
            MatcherSpec::BasicAuthExists => b.basic_auth_exists(),
            MatcherSpec::BearerToken => b.bearer_token_exists(),
            MatcherSpec::JwtClaim { path, value } => b.jwt_claim(path, value),
        }
    }
}

impl ResponseSpec {
    fn apply(&self, builder: ResponseBuilder) -> ResponseBuilder {
        let mut builder = builder.headers(&self.headers);
        if let Some(body) = &self.body {
            builder = builder.string_body(body);
        }
        if let Some(json) = &self.json {
            builder = builder.json_body(json);
        }
        builder
    }
}
