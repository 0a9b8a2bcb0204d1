//! Configuration types for the mock server.
//!
//! - `options`: listener options (host, port, TLS) and their validation
//! - `file`: declarative expectation files for the standalone binary

mod file;
mod options;

pub use file::{ExpectationSpec, MatcherSpec, MockFile, ResponseSpec, ServerSection, TlsFiles};
pub use options::{ListenSettings, ServerOptions, TlsMaterial};
