//! Expectation registry and matching engine.
//!
//! The registry keeps three ordered sequences (`every`, `counted`, `default`).
//! Registration order is matching order: the first expectation whose full
//! conjunction passes wins, there is no best-match scoring.

use crate::error::{HeaderDump, MatchError};
use crate::expectation::{Expectation, Flavor, MockResponse};
use crate::request::IncomingRequest;
use tracing::debug;

/// Stable handle to a registered expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpectationId {
    pub flavor: Flavor,
    pub index: usize,
}

/// Result of resolving one request.
#[derive(Debug)]
pub struct Dispatch {
    /// Non-fatal `every` violations, in evaluation order
    pub violations: Vec<String>,
    /// The expectation that accepted the request, if any
    pub matched: Option<ExpectationId>,
    pub outcome: Result<MockResponse, MatchError>,
}

#[derive(Debug, Default)]
pub struct Registry {
    every: Vec<Expectation>,
    counted: Vec<Expectation>,
    defaults: Vec<Expectation>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fresh expectation to the sequence for `flavor`.
    pub fn add(&mut self, flavor: Flavor) -> ExpectationId {
        let list = self.list_mut(flavor);
        list.push(Expectation::new(flavor));
        ExpectationId {
            flavor,
            index: list.len() - 1,
        }
    }

    pub fn add_every(&mut self) -> ExpectationId {
        self.add(Flavor::Every)
    }

    pub fn add_counted(&mut self) -> ExpectationId {
        self.add(Flavor::Counted)
    }

    pub fn add_default(&mut self) -> ExpectationId {
        self.add(Flavor::Default)
    }

    pub fn get(&self, id: ExpectationId) -> Option<&Expectation> {
        self.list(id.flavor).get(id.index)
    }

    pub fn get_mut(&mut self, id: ExpectationId) -> Option<&mut Expectation> {
        self.list_mut(id.flavor).get_mut(id.index)
    }

    pub fn every(&self) -> &[Expectation] {
        &self.every
    }

    pub fn counted(&self) -> &[Expectation] {
        &self.counted
    }

    pub fn defaults(&self) -> &[Expectation] {
        &self.defaults
    }

    fn list(&self, flavor: Flavor) -> &Vec<Expectation> {
        match flavor {
            Flavor::Every => &self.every,
            Flavor::Counted => &self.counted,
            Flavor::Default => &self.defaults,
        }
    }

    fn list_mut(&mut self, flavor: Flavor) -> &mut Vec<Expectation> {
        match flavor {
            Flavor::Every => &mut self.every,
            Flavor::Counted => &mut self.counted,
            Flavor::Default => &mut self.defaults,
        }
    }

    /// Resolve a request to exactly one expectation.
    ///
    /// 1. every `every` validator runs; failures are collected, never blocking
    /// 2. counted expectations with budget left, in order; first full match is consumed
    /// 3. defaults, in order, without touching counters
    /// 4. no match, or a match without a response, is fatal
    pub fn dispatch(&mut self, req: &IncomingRequest) -> Dispatch {
        let violations = self.check_every(req);

        let matched = self
            .match_counted(req)
            .or_else(|| self.match_default(req));

        let Some(id) = matched else {
            debug!("No expectation matched {} {}", req.method(), req.path());
            return Dispatch {
                violations,
                matched: None,
                outcome: Err(unmatched(req)),
            };
        };

        let outcome = match self.get(id) {
            Some(exp) => match exp.response() {
                Some(response) => Ok(response.clone()),
                None => Err(MatchError::MissingResponse {
                    descriptions: exp.descriptions(),
                }),
            },
            None => Err(unmatched(req)),
        };

        Dispatch {
            violations,
            matched: Some(id),
            outcome,
        }
    }

    fn check_every(&self, req: &IncomingRequest) -> Vec<String> {
        let mut violations = Vec::new();
        for exp in &self.every {
            for validator in exp.validators() {
                if let Err(e) = validator.evaluate(req) {
                    debug!(
                        "every() expectation '{}' violated by {} {}",
                        validator.description(),
                        req.method(),
                        req.path()
                    );
                    violations.push(format!(
                        "expectation failed: {e} ({})",
                        validator.description()
                    ));
                }
            }
        }
        violations
    }

    fn match_counted(&mut self, req: &IncomingRequest) -> Option<ExpectationId> {
        for (index, exp) in self.counted.iter_mut().enumerate() {
            if !exp.bounds().allows_another(exp.count()) {
                continue;
            }
            match exp.evaluate(req) {
                Ok(()) => {
                    exp.record_match();
                    debug!(
                        "{} {} matched expectation #{} (count={})",
                        req.method(),
                        req.path(),
                        index + 1,
                        exp.count()
                    );
                    return Some(ExpectationId {
                        flavor: Flavor::Counted,
                        index,
                    });
                }
                Err(e) => {
                    debug!("expectation #{} skipped: {}", index + 1, e);
                }
            }
        }
        None
    }

    fn match_default(&self, req: &IncomingRequest) -> Option<ExpectationId> {
        let index = self
            .defaults
            .iter()
            .position(|exp| exp.evaluate(req).is_ok())?;
        debug!(
            "{} {} fell through to default #{}",
            req.method(),
            req.path(),
            index + 1
        );
        Some(ExpectationId {
            flavor: Flavor::Default,
            index,
        })
    }
}

fn unmatched(req: &IncomingRequest) -> MatchError {
    MatchError::Unmatched {
        method: req.method().to_string(),
        path: req.path().to_string(),
        headers: HeaderDump(
            req.headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect(),
        ),
        body: req.body_str().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{Check, Field, Validator};
    use hyper::header::{HeaderName, HeaderValue};
    use hyper::{HeaderMap, Method, StatusCode};
    use tracing_test::traced_test;

    fn request(method: Method, uri: &str, headers: &[(&str, &str)]) -> IncomingRequest {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        IncomingRequest::new(method, &uri.parse().unwrap(), map, "")
    }

    fn route(
        registry: &mut Registry,
        flavor: Flavor,
        method: Method,
        path: &str,
        status: u16,
    ) -> ExpectationId {
        let id = registry.add(flavor);
        let exp = registry.get_mut(id).unwrap();
        exp.push(Validator::new(Check::Method(method.clone()), format!("Method: {method}")));
        exp.push(Validator::new(Check::Path(path.to_string()), format!("Path: {path}")));
        exp.set_response(MockResponse::new(StatusCode::from_u16(status).unwrap()));
        id
    }

    #[test]
    fn test_counted_match_consumes_call() {
        let mut registry = Registry::new();
        let id = route(&mut registry, Flavor::Counted, Method::GET, "/users", 200);

        let dispatch = registry.dispatch(&request(Method::GET, "/users", &[]));
        assert_eq!(dispatch.matched, Some(id));
        assert_eq!(dispatch.outcome.unwrap().status, StatusCode::OK);
        assert_eq!(registry.get(id).unwrap().count(), 1);

        // budget exhausted: second call is unmatched
        let again = registry.dispatch(&request(Method::GET, "/users", &[]));
        assert!(matches!(again.outcome, Err(MatchError::Unmatched { .. })));
        assert_eq!(registry.get(id).unwrap().count(), 1);
    }

    #[test]
    fn test_registration_order_wins() {
        let mut registry = Registry::new();
        let first = route(&mut registry, Flavor::Counted, Method::GET, "/a", 200);
        let second = route(&mut registry, Flavor::Counted, Method::GET, "/a", 201);

        let dispatch = registry.dispatch(&request(Method::GET, "/a", &[]));
        assert_eq!(dispatch.matched, Some(first));
        assert_eq!(registry.get(first).unwrap().count(), 1);
        assert_eq!(registry.get(second).unwrap().count(), 0);

        // first is exhausted, so the next identical call falls to the second
        let dispatch = registry.dispatch(&request(Method::GET, "/a", &[]));
        assert_eq!(dispatch.matched, Some(second));
        assert_eq!(dispatch.outcome.unwrap().status, StatusCode::CREATED);
    }

    #[test]
    fn test_repeated_matches_up_to_max() {
        let mut registry = Registry::new();
        let id = route(&mut registry, Flavor::Counted, Method::GET, "/poll", 200);
        registry.get_mut(id).unwrap().bounds_mut().set_times(3);

        for _ in 0..3 {
            let dispatch = registry.dispatch(&request(Method::GET, "/poll", &[]));
            assert_eq!(dispatch.matched, Some(id));
        }
        assert_eq!(registry.get(id).unwrap().count(), 3);
        assert!(registry
            .dispatch(&request(Method::GET, "/poll", &[]))
            .outcome
            .is_err());
    }

    #[test]
    fn test_partial_match_does_not_flag_validators() {
        let mut registry = Registry::new();
        let id = route(&mut registry, Flavor::Counted, Method::GET, "/users", 200);

        let dispatch = registry.dispatch(&request(Method::GET, "/orders", &[]));
        assert!(dispatch.outcome.is_err());
        let exp = registry.get(id).unwrap();
        assert_eq!(exp.count(), 0);
        assert_eq!(exp.first_never_matched(), Some(0));
    }

    #[test]
    fn test_default_is_fallback_and_never_exhausted() {
        let mut registry = Registry::new();
        let fallback = route(&mut registry, Flavor::Default, Method::GET, "/unknown", 404);
        let orders = route(&mut registry, Flavor::Counted, Method::POST, "/orders", 201);

        for _ in 0..3 {
            let dispatch = registry.dispatch(&request(Method::GET, "/unknown", &[]));
            assert_eq!(dispatch.matched, Some(fallback));
            assert_eq!(dispatch.outcome.unwrap().status, StatusCode::NOT_FOUND);
        }
        assert_eq!(registry.get(fallback).unwrap().count(), 0);

        let dispatch = registry.dispatch(&request(Method::POST, "/orders", &[]));
        assert_eq!(dispatch.matched, Some(orders));
        assert_eq!(dispatch.outcome.unwrap().status, StatusCode::CREATED);
    }

    #[test]
    fn test_counted_takes_precedence_over_default() {
        let mut registry = Registry::new();
        let fallback = registry.add_default();
        registry
            .get_mut(fallback)
            .unwrap()
            .set_response(MockResponse::new(StatusCode::NOT_FOUND));
        let counted = route(&mut registry, Flavor::Counted, Method::GET, "/a", 200);

        let dispatch = registry.dispatch(&request(Method::GET, "/a", &[]));
        assert_eq!(dispatch.matched, Some(counted));

        // a default without validators accepts everything else
        let dispatch = registry.dispatch(&request(Method::DELETE, "/zzz", &[]));
        assert_eq!(dispatch.matched, Some(fallback));
    }

    #[test]
    fn test_every_violation_is_not_blocking() {
        let mut registry = Registry::new();
        let every = registry.add_every();
        registry.get_mut(every).unwrap().push(Validator::new(
            Check::FieldExists {
                field: Field::Header,
                name: "X-Trace".into(),
            },
            "HeaderExists: X-Trace",
        ));
        let ping = route(&mut registry, Flavor::Counted, Method::GET, "/ping", 200);

        let dispatch = registry.dispatch(&request(Method::GET, "/ping", &[]));
        assert_eq!(dispatch.violations.len(), 1);
        assert!(dispatch.violations[0].contains("header X-Trace was missing"));
        assert_eq!(dispatch.matched, Some(ping));
        assert_eq!(dispatch.outcome.unwrap().status, StatusCode::OK);

        let traced = route(&mut registry, Flavor::Counted, Method::GET, "/ping", 200);
        let dispatch = registry.dispatch(&request(Method::GET, "/ping", &[("x-trace", "1")]));
        assert!(dispatch.violations.is_empty());
        assert_eq!(dispatch.matched, Some(traced));
    }

    #[test]
    #[traced_test]
    fn test_every_violation_logged_at_debug_only() {
        let mut registry = Registry::new();
        let every = registry.add_every();
        registry.get_mut(every).unwrap().push(Validator::new(
            Check::FieldExists {
                field: Field::Header,
                name: "X-Trace".into(),
            },
            "HeaderExists: X-Trace",
        ));
        route(&mut registry, Flavor::Counted, Method::GET, "/ping", 200);

        let dispatch = registry.dispatch(&request(Method::GET, "/ping", &[]));
        assert_eq!(dispatch.violations.len(), 1);
        assert!(logs_contain("every() expectation 'HeaderExists: X-Trace' violated"));
        logs_assert(|lines: &[&str]| {
            let warned = lines
                .iter()
                .filter(|line| line.contains("WARN") && line.contains("violated"))
                .count();
            match warned {
                0 => Ok(()),
                n => Err(format!("violation logged at warn level {n} time(s)")),
            }
        });
    }

    #[test]
    fn test_missing_response_is_fatal() {
        let mut registry = Registry::new();
        let id = registry.add_counted();
        registry
            .get_mut(id)
            .unwrap()
            .push(Validator::new(Check::Path("/x".into()), "Path: /x"));

        let dispatch = registry.dispatch(&request(Method::GET, "/x", &[]));
        assert_eq!(dispatch.matched, Some(id));
        match dispatch.outcome {
            Err(MatchError::MissingResponse { descriptions }) => {
                assert_eq!(descriptions, vec!["Path: /x"]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // the call was still counted
        assert_eq!(registry.get(id).unwrap().count(), 1);
    }

    #[test]
    fn test_unmatched_reports_request() {
        let mut registry = Registry::new();
        let dispatch = registry.dispatch(&request(Method::PUT, "/nowhere", &[("x-a", "b")]));
        let message = dispatch.outcome.unwrap_err().to_string();
        assert!(message.contains("Method: PUT"));
        assert!(message.contains("Path: /nowhere"));
        assert!(message.contains("x-a: b"));
    }
}
