//! In-process HTTP test double.
//!
//! A [`MockServer`] listens on a local port and answers requests from
//! declared expectations:
//!
//! - `every()` expectations are invariants checked on each request
//! - `expect()` expectations are counted and must be satisfied at [`MockServer::verify`]
//! - `default()` expectations answer anything the counted ones did not claim
//!
//! Failures go to a [`Reporter`], which is how the server talks back to the test.

pub mod builder;
pub mod config;
pub mod error;
pub mod expectation;
pub mod registry;
pub mod reporter;
pub mod request;
pub mod response;
pub mod server;
pub mod tls;
pub mod validator;
pub mod verify;

pub use builder::{ExpectationBuilder, ResponseBuilder};
pub use config::{MockFile, ServerOptions};
pub use error::{ConfigError, MatchError, ServerError, ValidationError};
pub use expectation::{CallBounds, Expectation, Flavor, MockResponse};
pub use registry::{ExpectationId, Registry};
pub use reporter::{Failure, LogReporter, Reporter, Severity, TestReporter};
pub use request::IncomingRequest;
pub use response::FAILURE_HEADER;
pub use server::MockServer;
pub use verify::{Unsatisfied, UnsatisfiedExpectation};
