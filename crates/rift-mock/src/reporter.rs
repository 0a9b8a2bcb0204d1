//! Failure-reporting sinks.
//!
//! The server never decides how a failure is surfaced, only that one occurred.
//! `fatal` is for conditions that should halt the test, `error` marks the test
//! failed and lets it continue.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, warn};

pub trait Reporter: Send + Sync {
    /// Report a failure that should stop the test.
    fn fatal(&self, message: &str);

    /// Report a failure that marks the test failed but lets it continue.
    fn error(&self, message: &str);

    /// Report a fatal failure raised while serving a request.
    ///
    /// Runs on a connection task rather than the test's thread, so it must not
    /// panic. Sinks that halt the test should record the failure and raise it
    /// from [`finish`](Reporter::finish).
    fn serving_fatal(&self, message: &str) {
        self.fatal(message);
    }

    /// Raise any recorded failures. Called on the test's thread by
    /// `verify()` and again at teardown.
    fn finish(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub severity: Severity,
    pub message: String,
}

/// Reporter for use inside Rust tests.
///
/// Every message is recorded. In panicking mode `fatal` panics, and `finish`
/// panics if anything at all was recorded, so non-fatal failures still fail
/// the test at shutdown.
#[derive(Debug)]
pub struct TestReporter {
    panicking: bool,
    failures: Mutex<Vec<Failure>>,
}

impl Default for TestReporter {
    fn default() -> Self {
        Self::panicking()
    }
}

impl TestReporter {
    pub fn panicking() -> Self {
        Self {
            panicking: true,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Never panics; failures are only recorded for inspection.
    pub fn recording() -> Self {
        Self {
            panicking: false,
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().clone()
    }

    pub fn fatals(&self) -> Vec<String> {
        self.messages(Severity::Fatal)
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages(Severity::Error)
    }

    pub fn has_failed(&self) -> bool {
        !self.failures.lock().is_empty()
    }

    fn messages(&self, severity: Severity) -> Vec<String> {
        self.failures
            .lock()
            .iter()
            .filter(|f| f.severity == severity)
            .map(|f| f.message.clone())
            .collect()
    }

    fn record(&self, severity: Severity, message: &str) {
        self.failures.lock().push(Failure {
            severity,
            message: message.to_string(),
        });
    }
}

impl Reporter for TestReporter {
    fn fatal(&self, message: &str) {
        error!("{}", message);
        self.record(Severity::Fatal, message);
        if self.panicking {
            panic!("{message}");
        }
    }

    fn error(&self, message: &str) {
        warn!("{}", message);
        self.record(Severity::Error, message);
    }

    fn serving_fatal(&self, message: &str) {
        error!("{}", message);
        self.record(Severity::Fatal, message);
    }

    fn finish(&self) {
        if !self.panicking || std::thread::panicking() {
            return;
        }
        let failures = self.failures.lock().clone();
        if failures.is_empty() {
            return;
        }
        let summary: Vec<_> = failures.iter().map(|f| f.message.as_str()).collect();
        panic!(
            "mock server recorded {} failure(s):\n{}",
            failures.len(),
            summary.join("\n")
        );
    }
}

/// Reporter that only logs and counts, for the standalone binary.
#[derive(Debug, Default)]
pub struct LogReporter {
    fatal: AtomicUsize,
    errors: AtomicUsize,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_count(&self) -> usize {
        self.fatal.load(Ordering::Relaxed) + self.errors.load(Ordering::Relaxed)
    }
}

impl Reporter for LogReporter {
    fn fatal(&self, message: &str) {
        self.fatal.fetch_add(1, Ordering::Relaxed);
        error!("{}", message);
    }

    fn error(&self, message: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!("{}", message);
    }
}
