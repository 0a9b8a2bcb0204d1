//! Expectations: ordered validators, call-count bounds and the response template.

use crate::error::ValidationError;
use crate::request::IncomingRequest;
use crate::validator::Validator;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, StatusCode};
use std::fmt;

/// Which registry sequence an expectation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    /// Checked on every request, never consumed
    Every,
    /// Matched in registration order within its call-count bounds
    Counted,
    /// Fallback when no counted expectation matches
    Default,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Flavor::Every => "every",
            Flavor::Counted => "expect",
            Flavor::Default => "default",
        })
    }
}

/// Inclusive `[min, max]` bound on the number of matches. `max == None` is unbounded.
///
/// `min <= max` holds after every mutation: raising `min` above `max` raises
/// `max`, lowering `max` below `min` lowers `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallBounds {
    min: usize,
    max: Option<usize>,
    max_set: bool,
}

impl Default for CallBounds {
    fn default() -> Self {
        Self::exactly(1)
    }
}

impl CallBounds {
    pub fn exactly(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
            max_set: false,
        }
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> Option<usize> {
        self.max
    }

    pub fn set_times(&mut self, n: usize) {
        self.min = n;
        self.max = Some(n);
        self.max_set = true;
    }

    /// Raise or lower the lower bound. Without an explicit upper bound the
    /// expectation becomes unbounded above.
    pub fn set_min(&mut self, n: usize) {
        self.min = n;
        if !self.max_set {
            self.max = None;
        } else if self.max.is_some_and(|max| max < n) {
            self.max = Some(n);
        }
    }

    pub fn set_max(&mut self, n: usize) {
        self.max = Some(n);
        self.max_set = true;
        if self.min > n {
            self.min = n;
        }
    }

    pub fn set_any(&mut self) {
        self.min = 0;
        self.max = None;
        self.max_set = true;
    }

    /// Whether one more match is allowed after `count` matches.
    pub fn allows_another(&self, count: usize) -> bool {
        self.max.map_or(true, |max| count < max)
    }

    pub fn contains(&self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

impl fmt::Display for CallBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "exactly {max}"),
            Some(max) => write!(f, "between {} and {max}", self.min),
            None => write!(f, "at least {}", self.min),
        }
    }
}

/// Canned response written when an expectation matches.
///
/// `body == None` suppresses the body write, which differs from an empty body
/// only in that nothing is written at all.
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl MockResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Set a header, replacing any previous value for the same name.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), String> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("invalid response header name {name:?}: {e}"))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("invalid value for response header {name}: {e}"))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn has_content_type(&self) -> bool {
        self.headers.contains_key(CONTENT_TYPE)
    }
}

/// One declared rule.
#[derive(Debug)]
pub struct Expectation {
    flavor: Flavor,
    validators: Vec<Validator>,
    response: Option<MockResponse>,
    bounds: CallBounds,
    count: usize,
}

impl Expectation {
    pub fn new(flavor: Flavor) -> Self {
        Self {
            flavor,
            validators: Vec::new(),
            response: None,
            bounds: CallBounds::default(),
            count: 0,
        }
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn push(&mut self, validator: Validator) {
        self.validators.push(validator);
    }

    pub fn bounds(&self) -> CallBounds {
        self.bounds
    }

    pub fn bounds_mut(&mut self) -> &mut CallBounds {
        &mut self.bounds
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn response(&self) -> Option<&MockResponse> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: MockResponse) {
        self.response = Some(response);
    }

    pub fn response_mut(&mut self) -> Option<&mut MockResponse> {
        self.response.as_mut()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.validators
            .iter()
            .map(|v| v.description().to_string())
            .collect()
    }

    /// Evaluate the validators in declared order, stopping at the first failure.
    pub fn evaluate(&self, req: &IncomingRequest) -> Result<(), ValidationError> {
        self.validators.iter().try_for_each(|v| v.evaluate(req))
    }

    /// Record a full match: every validator is flagged and the count advances.
    pub(crate) fn record_match(&mut self) {
        for validator in &mut self.validators {
            validator.mark_matched();
        }
        self.count += 1;
    }

    /// Index of the first validator that never took part in a full match.
    pub fn first_never_matched(&self) -> Option<usize> {
        self.validators.iter().position(|v| !v.matched())
    }
}
