//! Rendering of matched responses and failure responses.

use crate::error::MatchError;
use crate::expectation::MockResponse;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};

/// Header marking responses produced by the failure path rather than an expectation.
pub const FAILURE_HEADER: &str = "x-rift-mock-failure";

/// Render a mock response: headers, status, then the body if one was configured.
pub fn render(mock: &MockResponse) -> Response<Full<Bytes>> {
    let body = mock.body.clone().unwrap_or_default();
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = mock.status;
    for (name, value) in &mock.headers {
        response.headers_mut().insert(name.clone(), value.clone());
    }
    response
}

/// Response sent after a fatal matching failure, carrying the diagnostic text.
pub fn failure_response(error: &MatchError) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(error.to_string())));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(FAILURE_HEADER, HeaderValue::from_static("true"));
    response
}
