//! The mock server: listener, per-request handling, verification and teardown.
//!
//! Requests may arrive concurrently, but all matching is serialized behind a
//! single registry lock held for the whole match-and-respond sequence, so
//! calls are totally ordered by arrival at the lock.
//!
//! Failures raised while serving are recorded through
//! [`Reporter::serving_fatal`] and [`Reporter::error`] and only surface on the
//! test's thread, from [`MockServer::verify`] and at teardown.

use crate::builder::ExpectationBuilder;
use crate::config::ServerOptions;
use crate::error::ServerError;
use crate::expectation::Flavor;
use crate::registry::Registry;
use crate::reporter::{Reporter, TestReporter};
use crate::request::IncomingRequest;
use crate::response::{failure_response, render};
use crate::tls::create_tls_acceptor;
use crate::verify::verify;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

/// State shared between the test thread and the serving tasks.
pub(crate) struct Shared {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) reporter: Arc<dyn Reporter>,
    verified: AtomicBool,
    closed: AtomicBool,
}

/// A running HTTP(S) test double.
pub struct MockServer {
    shared: Arc<Shared>,
    addr: SocketAddr,
    base_url: String,
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Start a plain HTTP server on an ephemeral port of 127.0.0.1 with a
    /// panicking [`TestReporter`].
    ///
    /// # Panics
    /// Panics if the listener cannot be bound.
    pub async fn start() -> Self {
        Self::start_with_reporter(ServerOptions::default(), Arc::new(TestReporter::panicking()))
            .await
    }

    /// Start with custom options and a panicking [`TestReporter`].
    ///
    /// # Panics
    /// Panics if the options are invalid or the listener cannot be bound.
    pub async fn start_with_options(options: ServerOptions) -> Self {
        Self::start_with_reporter(options, Arc::new(TestReporter::panicking())).await
    }

    /// Start with custom options and reporter.
    ///
    /// # Panics
    /// Panics if construction fails, after the failure was reported.
    pub async fn start_with_reporter(options: ServerOptions, reporter: Arc<dyn Reporter>) -> Self {
        match Self::try_start(options, reporter).await {
            Ok(server) => server,
            Err(e) => panic!("failed to start mock server: {e}"),
        }
    }

    /// Start the server, reporting construction failures as fatal and returning them.
    pub async fn try_start(
        options: ServerOptions,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, ServerError> {
        match Self::bind(options, Arc::clone(&reporter)).await {
            Ok(server) => Ok(server),
            Err(e) => {
                reporter.fatal(&e.to_string());
                Err(e)
            }
        }
    }

    async fn bind(
        options: ServerOptions,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, ServerError> {
        let listen = options.validate()?;

        let tls_acceptor = match &listen.tls {
            Some(material) => Some(
                create_tls_acceptor(&material.cert_pem, &material.key_pem)
                    .map_err(ServerError::Tls)?,
            ),
            None => None,
        };

        let bind_addr = format!("{}:{}", listen.host, listen.port);
        let listener = TcpListener::bind((listen.host.as_str(), listen.port))
            .await
            .map_err(|e| ServerError::Bind(bind_addr.clone(), e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(bind_addr, e))?;

        let scheme = if tls_acceptor.is_some() { "https" } else { "http" };
        let base_url = format!("{scheme}://{}:{}", listen.host, addr.port());
        info!("Mock server listening on {}", base_url);

        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::new()),
            reporter,
            verified: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(accept_loop(
            listener,
            tls_acceptor,
            Arc::clone(&shared),
            shutdown_rx,
        ));

        Ok(Self {
            shared,
            addr,
            base_url,
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Base URL, e.g. `http://127.0.0.1:49231`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path on this server.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    /// Declare a global invariant checked on every request.
    pub fn every(&self) -> ExpectationBuilder {
        self.register(Flavor::Every)
    }

    /// Declare a counted expectation (exactly once unless changed).
    pub fn expect(&self) -> ExpectationBuilder {
        self.register(Flavor::Counted)
    }

    /// Declare a fallback used when no counted expectation matches.
    pub fn default(&self) -> ExpectationBuilder {
        self.register(Flavor::Default)
    }

    fn register(&self, flavor: Flavor) -> ExpectationBuilder {
        let id = self.shared.registry.lock().add(flavor);
        ExpectationBuilder::new(Arc::clone(&self.shared), id)
    }

    #[cfg(test)]
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&self.shared.registry.lock())
    }

    /// Check every counted expectation against its call-count bounds and
    /// report all unsatisfied ones as one fatal failure. Failures recorded
    /// while serving are raised afterwards through [`Reporter::finish`].
    pub fn verify(&self) {
        self.shared.verified.store(true, Ordering::SeqCst);
        let outcome = {
            let registry = self.shared.registry.lock();
            verify(registry.counted())
        };
        match outcome {
            Ok(()) => debug!("All expectations satisfied"),
            Err(report) => self.shared.reporter.fatal(&report.to_string()),
        }
        self.shared.reporter.finish();
    }

    /// Stop the listener. [`verify`](Self::verify) must have been called first.
    pub async fn shutdown(mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if !self.shared.verified.load(Ordering::SeqCst) {
            self.shared.reporter.fatal(NOT_VERIFIED);
            return;
        }

        // wait for any in-flight request to finish matching
        drop(self.shared.registry.lock());

        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Mock server accept loop failed: {}", e);
            }
        }
        info!("Mock server on {} shut down", self.addr);
        self.shared.reporter.finish();
    }
}

const NOT_VERIFIED: &str = "verify() was not called, no expectations were checked";

/// Dropping without [`MockServer::shutdown`] still stops the listener and
/// runs the same teardown checks.
impl Drop for MockServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if self.shared.closed.swap(true, Ordering::SeqCst) || std::thread::panicking() {
            return;
        }
        if !self.shared.verified.load(Ordering::SeqCst) {
            self.shared.reporter.fatal(NOT_VERIFIED);
        }
        self.shared.reporter.finish();
    }
}

async fn accept_loop(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    shared: Arc<Shared>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, remote_addr)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            remote_addr,
                            tls_acceptor.clone(),
                            Arc::clone(&shared),
                        ));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Accept loop shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    shared: Arc<Shared>,
) {
    match tls_acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => serve(TokioIo::new(tls_stream), shared, remote_addr).await,
            Err(err) => {
                error!("TLS handshake failed from {}: {}", remote_addr, err);
            }
        },
        None => serve(TokioIo::new(stream), shared, remote_addr).await,
    }
}

async fn serve<I>(io: TokioIo<I>, shared: Arc<Shared>, remote_addr: SocketAddr)
where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let shared = Arc::clone(&shared);
        async move { handle_request(req, shared).await }
    });
    if let Err(err) = http1::Builder::new()
        .keep_alive(false)
        .serve_connection(io, service)
        .await
    {
        debug!("Error serving connection from {}: {}", remote_addr, err);
    }
}

/// Decode one request, resolve it against the registry and render the result.
async fn handle_request(
    req: Request<Incoming>,
    shared: Arc<Shared>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let message =
                format!("request validation failed: could not read incoming request body: {e}");
            let mut response = Response::new(Full::new(Bytes::from(message.clone())));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            shared.reporter.serving_fatal(&message);
            return Ok(response);
        }
    };
    let request = IncomingRequest::from_parts(&parts, body);

    let mut registry = shared.registry.lock();
    let dispatch = registry.dispatch(&request);

    for violation in &dispatch.violations {
        shared.reporter.error(violation);
    }

    let response = match &dispatch.outcome {
        Ok(mock) => render(mock),
        Err(e) => {
            let response = failure_response(e);
            shared.reporter.serving_fatal(&e.to_string());
            response
        }
    };
    drop(registry);

    Ok(response)
}
