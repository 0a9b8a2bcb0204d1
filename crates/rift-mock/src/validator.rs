//! Request validators.
//!
//! A [`Validator`] pairs one [`Check`] with the human-readable description
//! shown in diagnostics. Checks are compiled once at declaration time
//! (regexes, JSON paths) and evaluated against every candidate request.
//!
//! Validators inside an expectation are combined with logical AND: the
//! expectation only accepts a request when all of them pass.

use crate::error::ValidationError;
use crate::request::IncomingRequest;
use base64::Engine;
use bytes::Bytes;
use hyper::Method;
use regex::Regex;
use serde_json::Value;
use serde_json_path::JsonPath;
use std::fmt;
use std::sync::Arc;

/// User-supplied predicate over the whole request.
pub type CustomFn = Arc<dyn Fn(&IncomingRequest) -> Result<(), String> + Send + Sync>;

/// User-supplied predicate over the request body.
pub type BodyFn = Arc<dyn Fn(&[u8]) -> Result<(), String> + Send + Sync>;

/// Named request field used by the generic field checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Header,
    Query,
    Form,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::Header => "header",
            Field::Query => "query parameter",
            Field::Form => "form parameter",
        }
    }

    fn lookup<'a>(self, req: &'a IncomingRequest, name: &str) -> Option<&'a str> {
        match self {
            Field::Header => req.header(name),
            Field::Query => req.query_param(name),
            Field::Form => req.form_param(name),
        }
    }
}

/// One atomic matching condition.
pub enum Check {
    /// Case-insensitive method comparison
    Method(Method),
    Path(String),
    PathRegex(Regex),
    FieldEquals {
        field: Field,
        name: String,
        value: String,
    },
    FieldExists {
        field: Field,
        name: String,
    },
    FieldRegex {
        field: Field,
        name: String,
        regex: Regex,
    },
    Body(Bytes),
    BodyContains(String),
    BodyRegex(Regex),
    /// Structural JSON equality
    JsonBody(Value),
    JsonPath {
        expr: String,
        path: JsonPath,
        expected: Value,
    },
    BasicAuth {
        user: String,
        password: String,
    },
    BasicAuthExists,
    BearerToken,
    JwtClaim {
        expr: String,
        path: JsonPath,
        expected: Value,
    },
    BodyFn(BodyFn),
    Custom(CustomFn),
    /// Declaration error: always fails with the stored reason
    Invalid(String),
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Method(m) => f.debug_tuple("Method").field(m).finish(),
            Check::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Check::PathRegex(r) => f.debug_tuple("PathRegex").field(&r.as_str()).finish(),
            Check::FieldEquals { field, name, value } => f
                .debug_struct("FieldEquals")
                .field("field", field)
                .field("name", name)
                .field("value", value)
                .finish(),
            Check::FieldExists { field, name } => f
                .debug_struct("FieldExists")
                .field("field", field)
                .field("name", name)
                .finish(),
            Check::FieldRegex { field, name, regex } => f
                .debug_struct("FieldRegex")
                .field("field", field)
                .field("name", name)
                .field("regex", &regex.as_str())
                .finish(),
            Check::Body(b) => f.debug_tuple("Body").field(b).finish(),
            Check::BodyContains(s) => f.debug_tuple("BodyContains").field(s).finish(),
            Check::BodyRegex(r) => f.debug_tuple("BodyRegex").field(&r.as_str()).finish(),
            Check::JsonBody(v) => f.debug_tuple("JsonBody").field(v).finish(),
            Check::JsonPath { expr, expected, .. } => f
                .debug_struct("JsonPath")
                .field("expr", expr)
                .field("expected", expected)
                .finish(),
            Check::BasicAuth { user, .. } => {
                f.debug_struct("BasicAuth").field("user", user).finish()
            }
            Check::BasicAuthExists => f.write_str("BasicAuthExists"),
            Check::BearerToken => f.write_str("BearerToken"),
            Check::JwtClaim { expr, expected, .. } => f
                .debug_struct("JwtClaim")
                .field("expr", expr)
                .field("expected", expected)
                .finish(),
            Check::BodyFn(_) => f.write_str("BodyFn(..)"),
            Check::Custom(_) => f.write_str("Custom(..)"),
            Check::Invalid(reason) => f.debug_tuple("Invalid").field(reason).finish(),
        }
    }
}

impl Check {
    /// Evaluate this check against a request.
    pub fn evaluate(&self, req: &IncomingRequest) -> Result<(), ValidationError> {
        match self {
            Check::Method(method) => {
                if req.method().as_str().eq_ignore_ascii_case(method.as_str()) {
                    Ok(())
                } else {
                    fail(format!(
                        "expected method {method} but was {}",
                        req.method()
                    ))
                }
            }
            Check::Path(path) => {
                if req.path() == path {
                    Ok(())
                } else {
                    fail(format!("expected path {path} but was {}", req.path()))
                }
            }
            Check::PathRegex(regex) => {
                if regex.is_match(req.path()) {
                    Ok(())
                } else {
                    fail(format!(
                        "pathRegex {} did not match {}",
                        regex.as_str(),
                        req.path()
                    ))
                }
            }
            Check::FieldEquals { field, name, value } => {
                let actual = require_field(*field, req, name)?;
                if actual == value {
                    Ok(())
                } else {
                    fail(format!(
                        "expected {} {name} to be {value} but was {actual}",
                        field.label()
                    ))
                }
            }
            Check::FieldExists { field, name } => require_field(*field, req, name).map(|_| ()),
            Check::FieldRegex { field, name, regex } => {
                let actual = require_field(*field, req, name)?;
                if regex.is_match(actual) {
                    Ok(())
                } else {
                    fail(format!(
                        "{} {name} did not match regex {}",
                        field.label(),
                        regex.as_str()
                    ))
                }
            }
            Check::Body(expected) => {
                if req.body() == expected.as_ref() {
                    Ok(())
                } else {
                    fail(format!(
                        "body should be {} but was {}",
                        String::from_utf8_lossy(expected),
                        req.body_str()
                    ))
                }
            }
            Check::BodyContains(needle) => {
                let body = req.body_str();
                if body.contains(needle.as_str()) {
                    Ok(())
                } else {
                    fail(format!("body should contain {needle} but was {body}"))
                }
            }
            Check::BodyRegex(regex) => {
                let body = req.body_str();
                if regex.is_match(&body) {
                    Ok(())
                } else {
                    fail(format!(
                        "body should match {} but was {body}",
                        regex.as_str()
                    ))
                }
            }
            Check::JsonBody(expected) => {
                let actual = parse_json_body(req)?;
                if json_equal(&actual, expected) {
                    Ok(())
                } else {
                    fail(format!("json body should be {expected} but was {actual}"))
                }
            }
            Check::JsonPath {
                expr,
                path,
                expected,
            } => {
                let document = parse_json_body(req)?;
                let found = select(path, &document).ok_or_else(|| {
                    ValidationError::new(format!("could not find json path {expr} in body"))
                })?;
                if json_equal(&found, expected) {
                    Ok(())
                } else {
                    fail(format!(
                        "json path {expr} should be {expected} but was {found}"
                    ))
                }
            }
            Check::BasicAuth { user, password } => {
                let (actual_user, actual_password) = req
                    .basic_auth()
                    .ok_or_else(|| ValidationError::new("expected authHeader was missing"))?;
                if &actual_user == user && &actual_password == password {
                    Ok(())
                } else {
                    let expected = format!("{user}:{password}");
                    let actual = format!("{actual_user}:{actual_password}");
                    fail(format!(
                        "expected authHeader user:password {expected} but was {actual}"
                    ))
                }
            }
            Check::BasicAuthExists => req
                .basic_auth()
                .map(|_| ())
                .ok_or_else(|| ValidationError::new("expected authHeader was missing")),
            Check::BearerToken => bearer_token(req).map(|_| ()),
            Check::JwtClaim {
                expr,
                path,
                expected,
            } => {
                let token = bearer_token(req)?;
                let claims = decode_jwt_claims(token).ok_or_else(|| {
                    ValidationError::new("could not retrieve claims from token")
                })?;
                let found = select(path, &claims).ok_or_else(|| {
                    ValidationError::new(format!(
                        "could not retrieve claim with path {expr} from token"
                    ))
                })?;
                if json_equal(&found, expected) {
                    Ok(())
                } else {
                    fail(format!(
                        "expected claim on path {expr} to be {expected} but was {found}"
                    ))
                }
            }
            Check::BodyFn(f) => f(req.body()).map_err(|e| {
                ValidationError::new(format!("custom body validation failure: {e}"))
            }),
            Check::Custom(f) => f(req).map_err(ValidationError::new),
            Check::Invalid(reason) => fail(reason.clone()),
        }
    }
}

/// A check plus its description and the diagnostic "ever matched" flag.
pub struct Validator {
    check: Check,
    description: String,
    matched: bool,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("description", &self.description)
            .field("matched", &self.matched)
            .finish()
    }
}

impl Validator {
    pub fn new(check: Check, description: impl Into<String>) -> Self {
        Self {
            check,
            description: description.into(),
            matched: false,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn check(&self) -> &Check {
        &self.check
    }

    /// Whether this validator was part of a fully matching expectation at least once.
    pub fn matched(&self) -> bool {
        self.matched
    }

    pub(crate) fn mark_matched(&mut self) {
        self.matched = true;
    }

    pub fn evaluate(&self, req: &IncomingRequest) -> Result<(), ValidationError> {
        self.check.evaluate(req)
    }
}

fn fail(reason: String) -> Result<(), ValidationError> {
    Err(ValidationError::new(reason))
}

fn require_field<'a>(
    field: Field,
    req: &'a IncomingRequest,
    name: &str,
) -> Result<&'a str, ValidationError> {
    field
        .lookup(req, name)
        .ok_or_else(|| ValidationError::new(format!("{} {name} was missing", field.label())))
}

fn parse_json_body(req: &IncomingRequest) -> Result<Value, ValidationError> {
    serde_json::from_slice(req.body()).map_err(|e| {
        ValidationError::new(format!(
            "could not parse actual json body {}: {e}",
            req.body_str()
        ))
    })
}

fn bearer_token(req: &IncomingRequest) -> Result<&str, ValidationError> {
    let auth = req
        .authorization()
        .ok_or_else(|| ValidationError::new("expected authHeader was missing"))?;
    let token = auth
        .strip_prefix("Bearer ")
        .ok_or_else(|| ValidationError::new("Bearer prefix was missing"))?;
    if token.trim().is_empty() {
        return Err(ValidationError::new("bearer token was empty"));
    }
    Ok(token.trim())
}

/// Decode the claims segment of a JWT. The signature is not verified.
pub fn decode_jwt_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.is_object().then_some(claims)
}

/// Resolve a JSON path: a single node yields that node, several nodes yield an array.
fn select(path: &JsonPath, document: &Value) -> Option<Value> {
    let nodes = path.query(document).all();
    match nodes.as_slice() {
        [] => None,
        [single] => Some((*single).clone()),
        many => Some(Value::Array(many.iter().map(|v| (*v).clone()).collect())),
    }
}

/// Structural JSON equality. Object key order is irrelevant and numbers
/// compare by value, so `1` equals `1.0`.
pub fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x == y {
                return true;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| json_equal(v, other)))
        }
        _ => a == b,
    }
}
