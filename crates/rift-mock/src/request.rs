//! Decoded snapshot of a single incoming HTTP call.
//!
//! An `IncomingRequest` is built once per call, before any validator runs,
//! and is never mutated afterwards. Form parameters are parsed lazily on
//! first access because most expectations never look at them.

use base64::Engine;
use bytes::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{HeaderMap, Method, Uri};
use once_cell::sync::OnceCell;
use std::borrow::Cow;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Immutable view of one request as seen by the validators.
#[derive(Debug)]
pub struct IncomingRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
    form: OnceCell<Vec<(String, String)>>,
}

impl IncomingRequest {
    /// Build a snapshot from the request line, headers and the fully buffered body.
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            path: uri.path().to_string(),
            query: parse_query_string(uri.query()),
            headers,
            body: body.into(),
            form: OnceCell::new(),
        }
    }

    /// Build a snapshot from decomposed hyper request parts.
    pub fn from_parts(parts: &hyper::http::request::Parts, body: Bytes) -> Self {
        Self::new(
            parts.method.clone(),
            &parts.uri,
            parts.headers.clone(),
            body,
        )
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header. Empty and non-UTF-8 values count as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    }

    /// All values of a (possibly repeated) header.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    /// First non-empty value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        first_value(&self.query, name)
    }

    /// Form parameters: url-encoded body values first, followed by the query
    /// parameters. The body is only consulted when the request declares
    /// `application/x-www-form-urlencoded`.
    pub fn form_params(&self) -> &[(String, String)] {
        self.form.get_or_init(|| {
            let mut params = if self.is_form_encoded() {
                parse_form_body(&self.body)
            } else {
                Vec::new()
            };
            params.extend(self.query.iter().cloned());
            params
        })
    }

    /// First non-empty value of a form parameter.
    pub fn form_param(&self, name: &str) -> Option<&str> {
        first_value(self.form_params(), name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Raw `Authorization` header value.
    pub fn authorization(&self) -> Option<&str> {
        self.header(AUTHORIZATION.as_str())
    }

    /// Credentials from a `Basic` authorization header.
    pub fn basic_auth(&self) -> Option<(String, String)> {
        let auth = self.authorization()?;
        let (scheme, encoded) = auth.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }

    fn is_form_encoded(&self) -> bool {
        if !matches!(self.method, Method::POST | Method::PUT | Method::PATCH) {
            return false;
        }
        self.header(CONTENT_TYPE.as_str())
            .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with(FORM_URLENCODED))
            .unwrap_or(false)
    }
}

fn first_value<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// Parse a query string into ordered key/value pairs, keeping repeated keys.
pub fn parse_query_string(query: Option<&str>) -> Vec<(String, String)> {
    query.map(parse_urlencoded).unwrap_or_default()
}

fn parse_form_body(body: &[u8]) -> Vec<(String, String)> {
    parse_urlencoded(&String::from_utf8_lossy(body))
}

fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced.clone(),
    }
}
