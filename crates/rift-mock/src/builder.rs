//! Fluent declaration API.
//!
//! [`ExpectationBuilder`] adds validators and call-count modifiers to an
//! expectation that is already registered. `response(code)` is a one-way
//! switch to [`ResponseBuilder`], which configures what the expectation returns.
//!
//! ```no_run
//! # async fn demo() {
//! use rift_mock::MockServer;
//! use serde_json::json;
//!
//! let server = MockServer::start().await;
//! server.every().header_exists("X-Trace");
//! server
//!     .expect()
//!     .get("/users")
//!     .response(200)
//!     .json_body(&json!([{"id": 1}]));
//! server.default().response(404);
//!
//! // ... exercise the code under test against server.base_url() ...
//!
//! server.verify();
//! server.shutdown().await;
//! # }
//! ```

use crate::expectation::{Expectation, Flavor, MockResponse};
use crate::registry::ExpectationId;
use crate::request::IncomingRequest;
use crate::server::Shared;
use crate::validator::{Check, Field, Validator};
use bytes::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, StatusCode};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use serde_json_path::JsonPath;
use std::sync::Arc;
use tracing::debug;

/// Chainable request-side builder for one registered expectation.
pub struct ExpectationBuilder {
    shared: Arc<Shared>,
    id: ExpectationId,
}

impl ExpectationBuilder {
    pub(crate) fn new(shared: Arc<Shared>, id: ExpectationId) -> Self {
        Self { shared, id }
    }

    pub fn id(&self) -> ExpectationId {
        self.id
    }

    fn update(&self, f: impl FnOnce(&mut Expectation)) {
        let mut registry = self.shared.registry.lock();
        if let Some(exp) = registry.get_mut(self.id) {
            f(exp);
        }
    }

    fn with(self, check: Check, description: impl Into<String>) -> Self {
        let validator = Validator::new(check, description);
        self.update(|exp| exp.push(validator));
        self
    }

    /// Report a declaration error and register a validator that always fails with it.
    fn invalid(self, reason: String, description: impl Into<String>) -> Self {
        self.shared.reporter.fatal(&reason);
        self.with(Check::Invalid(reason), description)
    }

    fn with_regex(
        self,
        pattern: &str,
        description: String,
        make: impl FnOnce(Regex) -> Check,
    ) -> Self {
        match Regex::new(pattern) {
            Ok(regex) => self.with(make(regex), description),
            Err(e) => self.invalid(format!("invalid regex {pattern:?}: {e}"), description),
        }
    }

    fn with_json_path(
        self,
        expr: &str,
        expected: Value,
        description: String,
        make: impl FnOnce(String, JsonPath, Value) -> Check,
    ) -> Self {
        match JsonPath::parse(expr) {
            Ok(path) => self.with(make(expr.to_string(), path, expected), description),
            Err(e) => self.invalid(format!("invalid json path {expr:?}: {e}"), description),
        }
    }

    fn count_modifier(&self, name: &str, f: impl FnOnce(&mut Expectation)) {
        if self.id.flavor == Flavor::Counted {
            self.update(f);
        } else {
            debug!("{}() has no effect on a {}() expectation", name, self.id.flavor);
        }
    }

    // ----- call counts -----

    /// Match exactly `n` times.
    pub fn times(self, n: usize) -> Self {
        self.count_modifier("times", |exp| exp.bounds_mut().set_times(n));
        self
    }

    /// Match at least `n` times. Unbounded above unless `max_times` is also set.
    pub fn min_times(self, n: usize) -> Self {
        self.count_modifier("min_times", |exp| exp.bounds_mut().set_min(n));
        self
    }

    /// Match at most `n` times.
    pub fn max_times(self, n: usize) -> Self {
        self.count_modifier("max_times", |exp| exp.bounds_mut().set_max(n));
        self
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    pub fn at_most_once(self) -> Self {
        self.max_times(1)
    }

    pub fn at_least_once(self) -> Self {
        self.min_times(1)
    }

    pub fn any_times(self) -> Self {
        self.count_modifier("any_times", |exp| exp.bounds_mut().set_any());
        self
    }

    // ----- method and path -----

    /// Accept any request. Adds no validator.
    pub fn any_request(self) -> Self {
        self
    }

    pub fn method(self, method: &str) -> Self {
        match Method::from_bytes(method.as_bytes()) {
            Ok(m) => self.with(Check::Method(m), format!("Method: {method}")),
            Err(e) => self.invalid(
                format!("invalid method {method:?}: {e}"),
                format!("Method: {method}"),
            ),
        }
    }

    pub fn path(self, path: &str) -> Self {
        self.with(Check::Path(path.to_string()), format!("Path: {path}"))
    }

    pub fn path_regex(self, pattern: &str) -> Self {
        self.with_regex(pattern, format!("PathRegex: {pattern}"), Check::PathRegex)
    }

    pub fn request(self, method: &str, path: &str) -> Self {
        self.method(method).path(path)
    }

    pub fn method_get(self) -> Self {
        self.with(Check::Method(Method::GET), "GET")
    }

    pub fn method_post(self) -> Self {
        self.with(Check::Method(Method::POST), "POST")
    }

    pub fn method_put(self) -> Self {
        self.with(Check::Method(Method::PUT), "PUT")
    }

    pub fn method_delete(self) -> Self {
        self.with(Check::Method(Method::DELETE), "DELETE")
    }

    pub fn get(self, path: &str) -> Self {
        self.request("GET", path)
    }

    pub fn post(self, path: &str) -> Self {
        self.request("POST", path)
    }

    pub fn put(self, path: &str) -> Self {
        self.request("PUT", path)
    }

    pub fn patch(self, path: &str) -> Self {
        self.request("PATCH", path)
    }

    pub fn delete(self, path: &str) -> Self {
        self.request("DELETE", path)
    }

    // ----- headers, query and form parameters -----

    fn field_equals(self, field: Field, label: &str, name: &str, value: &str) -> Self {
        self.with(
            Check::FieldEquals {
                field,
                name: name.to_string(),
                value: value.to_string(),
            },
            format!("{label}: {name}:{value}"),
        )
    }

    fn field_exists(self, field: Field, label: &str, name: &str) -> Self {
        self.with(
            Check::FieldExists {
                field,
                name: name.to_string(),
            },
            format!("{label}Exists: {name}"),
        )
    }

    fn field_regex(self, field: Field, label: &str, name: &str, pattern: &str) -> Self {
        let owned = name.to_string();
        self.with_regex(pattern, format!("{label}Matches: {name}:{pattern}"), |regex| {
            Check::FieldRegex {
                field,
                name: owned,
                regex,
            }
        })
    }

    pub fn header(self, name: &str, value: &str) -> Self {
        self.field_equals(Field::Header, "Header", name, value)
    }

    /// Add one header check per entry, in iteration order.
    pub fn headers<K, V>(self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        headers
            .into_iter()
            .fold(self, |b, (k, v)| b.header(k.as_ref(), v.as_ref()))
    }

    pub fn header_exists(self, name: &str) -> Self {
        self.field_exists(Field::Header, "Header", name)
    }

    pub fn header_regex(self, name: &str, pattern: &str) -> Self {
        self.field_regex(Field::Header, "Header", name, pattern)
    }

    pub fn query_param(self, name: &str, value: &str) -> Self {
        self.field_equals(Field::Query, "QueryParameter", name, value)
    }

    pub fn query_params<K, V>(self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        params
            .into_iter()
            .fold(self, |b, (k, v)| b.query_param(k.as_ref(), v.as_ref()))
    }

    pub fn query_param_exists(self, name: &str) -> Self {
        self.field_exists(Field::Query, "QueryParameter", name)
    }

    pub fn query_param_regex(self, name: &str, pattern: &str) -> Self {
        self.field_regex(Field::Query, "QueryParameter", name, pattern)
    }

    pub fn form_param(self, name: &str, value: &str) -> Self {
        self.field_equals(Field::Form, "FormParameter", name, value)
    }

    pub fn form_params<K, V>(self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        params
            .into_iter()
            .fold(self, |b, (k, v)| b.form_param(k.as_ref(), v.as_ref()))
    }

    pub fn form_param_exists(self, name: &str) -> Self {
        self.field_exists(Field::Form, "FormParameter", name)
    }

    pub fn form_param_regex(self, name: &str, pattern: &str) -> Self {
        self.field_regex(Field::Form, "FormParameter", name, pattern)
    }

    // ----- body -----

    /// Exact body bytes.
    pub fn body(self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let description = format!("Body: {}", String::from_utf8_lossy(&body));
        self.with(Check::Body(body), description)
    }

    pub fn string_body(self, body: &str) -> Self {
        self.body(body.to_string())
    }

    pub fn body_contains(self, substring: &str) -> Self {
        self.with(
            Check::BodyContains(substring.to_string()),
            format!("BodyContains: {substring}"),
        )
    }

    pub fn body_regex(self, pattern: &str) -> Self {
        self.with_regex(pattern, format!("BodyMatches: {pattern}"), Check::BodyRegex)
    }

    /// Structural JSON equality with `value`. A string is parsed as JSON text.
    pub fn json_body<T: Serialize + ?Sized>(self, value: &T) -> Self {
        let expected = match serde_json::to_value(value) {
            Ok(Value::String(text)) => serde_json::from_str(&text)
                .map_err(|e| format!("could not parse expected json body {text}: {e}")),
            Ok(other) => Ok(other),
            Err(e) => Err(format!("could not serialize expected json body: {e}")),
        };
        match expected {
            Ok(expected) => {
                let description = format!("JsonBody: {expected}");
                self.with(Check::JsonBody(expected), description)
            }
            Err(reason) => self.invalid(reason, "JsonBody"),
        }
    }

    /// The value at a JSON path of the body equals `value`.
    pub fn json_path<T: Serialize + ?Sized>(self, path: &str, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(expected) => {
                let description = format!("JsonPath: {path} = {expected}");
                self.with_json_path(path, expected, description, |expr, path, expected| {
                    Check::JsonPath {
                        expr,
                        path,
                        expected,
                    }
                })
            }
            Err(e) => self.invalid(
                format!("could not serialize expected value for json path {path}: {e}"),
                format!("JsonPath: {path}"),
            ),
        }
    }

    /// Custom predicate over the raw body.
    pub fn body_fn<F>(self, f: F) -> Self
    where
        F: Fn(&[u8]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.with(Check::BodyFn(Arc::new(f)), "custom body validation")
    }

    // ----- authentication -----

    pub fn basic_auth(self, user: &str, password: &str) -> Self {
        self.with(
            Check::BasicAuth {
                user: user.to_string(),
                password: password.to_string(),
            },
            format!("Basic auth: {user}:{password}"),
        )
    }

    pub fn basic_auth_exists(self) -> Self {
        self.with(Check::BasicAuthExists, "Basic auth exists")
    }

    pub fn bearer_token_exists(self) -> Self {
        self.with(Check::BearerToken, "Bearer token exists")
    }

    /// The claim at a JSON path of the bearer JWT equals `value`. The token
    /// signature is not verified.
    pub fn jwt_claim<T: Serialize + ?Sized>(self, path: &str, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(expected) => {
                let description = format!("JWT claim: {path} = {expected}");
                self.with_json_path(path, expected, description, |expr, path, expected| {
                    Check::JwtClaim {
                        expr,
                        path,
                        expected,
                    }
                })
            }
            Err(e) => self.invalid(
                format!("could not serialize expected claim for {path}: {e}"),
                format!("JWT claim: {path}"),
            ),
        }
    }

    // ----- escape hatch -----

    /// Custom predicate over the whole request.
    pub fn custom<F>(self, f: F, description: &str) -> Self
    where
        F: Fn(&IncomingRequest) -> Result<(), String> + Send + Sync + 'static,
    {
        self.with(Check::Custom(Arc::new(f)), description)
    }

    // ----- switch to response configuration -----

    /// Finish request matching and start configuring the response.
    pub fn response(self, code: u16) -> ResponseBuilder {
        if self.id.flavor == Flavor::Every {
            self.shared
                .reporter
                .fatal("response() cannot be configured on an every() expectation");
            return ResponseBuilder {
                shared: self.shared,
                id: None,
            };
        }

        let status = match StatusCode::from_u16(code) {
            Ok(status) => status,
            Err(e) => {
                self.shared
                    .reporter
                    .fatal(&format!("invalid response status code {code}: {e}"));
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        self.update(|exp| exp.set_response(MockResponse::new(status)));
        ResponseBuilder {
            shared: self.shared,
            id: Some(self.id),
        }
    }
}

/// Chainable response-side builder.
pub struct ResponseBuilder {
    shared: Arc<Shared>,
    id: Option<ExpectationId>,
}

impl ResponseBuilder {
    fn update(self, f: impl FnOnce(&mut MockResponse) -> Result<(), String>) -> Self {
        let Some(id) = self.id else {
            return self;
        };
        let outcome = {
            let mut registry = self.shared.registry.lock();
            match registry.get_mut(id).and_then(|exp| exp.response_mut()) {
                Some(response) => f(response),
                None => Ok(()),
            }
        };
        if let Err(reason) = outcome {
            self.shared.reporter.fatal(&reason);
        }
        self
    }

    pub fn content_type(self, content_type: &str) -> Self {
        self.header(CONTENT_TYPE.as_str(), content_type)
    }

    /// Set a response header; the last write for a name wins.
    pub fn header(self, name: &str, value: &str) -> Self {
        let (name, value) = (name.to_string(), value.to_string());
        self.update(move |r| r.set_header(&name, &value))
    }

    pub fn headers<K, V>(self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        headers
            .into_iter()
            .fold(self, |b, (k, v)| b.header(k.as_ref(), v.as_ref()))
    }

    pub fn body(self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.update(move |r| {
            r.body = Some(body);
            Ok(())
        })
    }

    pub fn string_body(self, body: &str) -> Self {
        self.body(body.to_string())
    }

    /// Remove any configured body so nothing is written.
    pub fn no_body(self) -> Self {
        self.update(|r| {
            r.body = None;
            Ok(())
        })
    }

    /// Serialize `value` as the JSON body and default the content type to
    /// `application/json`. A value serializing to `null` leaves the body absent.
    pub fn json_body<T: Serialize + ?Sized>(self, value: &T) -> Self {
        let encoded = serde_json::to_value(value).and_then(|v| {
            if v.is_null() {
                Ok(None)
            } else {
                serde_json::to_vec(&v).map(Some)
            }
        });
        self.update(move |r| {
            if !r.has_content_type() {
                r.set_header(CONTENT_TYPE.as_str(), "application/json")?;
            }
            match encoded {
                Ok(body) => {
                    r.body = body.map(Bytes::from);
                    Ok(())
                }
                Err(e) => Err(format!(
                    "response expectation failed: could not serialize to json: {e}"
                )),
            }
        })
    }
}
