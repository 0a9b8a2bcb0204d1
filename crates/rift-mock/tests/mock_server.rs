//! Integration tests driving a live mock server over HTTP with reqwest.

use reqwest::Client;
use rift_mock::{
    ConfigError, MockFile, MockServer, ServerError, ServerOptions, TestReporter, FAILURE_HEADER,
};
use serde_json::json;
use std::sync::Arc;

/// Start a server on an ephemeral port with a reporter that records instead of panicking.
async fn start_recording() -> (MockServer, Arc<TestReporter>) {
    let reporter = Arc::new(TestReporter::recording());
    let server = MockServer::start_with_reporter(ServerOptions::default(), reporter.clone()).await;
    (server, reporter)
}

#[tokio::test]
async fn test_counted_expectation_is_served_and_verified() {
    let (server, reporter) = start_recording().await;
    server
        .expect()
        .get("/users")
        .response(200)
        .json_body(&json!([{"id": 1}]));

    let response = Client::new().get(server.url("/users")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!([{"id": 1}]));

    server.verify();
    server.shutdown().await;
    assert!(!reporter.has_failed(), "{:?}", reporter.failures());
}

#[tokio::test]
async fn test_verify_reports_unmet_expectation() {
    let (server, reporter) = start_recording().await;
    server.expect().get("/users").response(200);

    server.verify();
    server.shutdown().await;

    let fatals = reporter.fatals();
    assert_eq!(fatals.len(), 1);
    assert!(fatals[0].contains("expectation(s) not satisfied"));
    assert!(fatals[0].contains("1. Expectation"));
    assert!(fatals[0].contains("Method: GET (never matched)"));
    assert!(fatals[0].contains("expected at least 1, got 0"));
}

#[tokio::test]
async fn test_default_answers_unclaimed_requests() {
    let (server, reporter) = start_recording().await;
    server.default().response(404);
    server
        .expect()
        .post("/orders")
        .response(201)
        .string_body("created");

    let client = Client::new();
    let missing = client.get(server.url("/nothing")).send().await.unwrap();
    assert_eq!(missing.status(), 404);
    assert_eq!(missing.text().await.unwrap(), "");

    let created = client.post(server.url("/orders")).send().await.unwrap();
    assert_eq!(created.status(), 201);
    assert_eq!(created.text().await.unwrap(), "created");

    server.verify();
    server.shutdown().await;
    assert!(!reporter.has_failed(), "{:?}", reporter.failures());
}

#[tokio::test]
async fn test_exhausted_expectation_falls_through_to_default() {
    let (server, reporter) = start_recording().await;
    server.expect().get("/ping").times(2).response(200);
    server.default().response(418);

    let client = Client::new();
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = client.get(server.url("/ping")).send().await.unwrap();
        statuses.push(response.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 418]);

    server.verify();
    server.shutdown().await;
    assert!(!reporter.has_failed(), "{:?}", reporter.failures());
}

#[tokio::test]
async fn test_every_violation_does_not_block_response() {
    let (server, reporter) = start_recording().await;
    server.every().header_exists("X-Trace");
    server.expect().get("/users").any_times().response(200);

    let client = Client::new();
    let traced = client
        .get(server.url("/users"))
        .header("X-Trace", "abc")
        .send()
        .await
        .unwrap();
    assert_eq!(traced.status(), 200);
    assert!(reporter.errors().is_empty());

    let untraced = client.get(server.url("/users")).send().await.unwrap();
    assert_eq!(untraced.status(), 200);

    let errors = reporter.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("expectation failed:"));
    assert!(errors[0].contains("HeaderExists: X-Trace"));

    server.verify();
    server.shutdown().await;
    assert!(reporter.fatals().is_empty());
}

#[tokio::test]
async fn test_first_registered_match_wins() {
    let (server, _reporter) = start_recording().await;
    server
        .expect()
        .get("/items")
        .any_times()
        .response(200)
        .string_body("first");
    server
        .expect()
        .get("/items")
        .any_times()
        .response(200)
        .string_body("second");

    let client = Client::new();
    for _ in 0..2 {
        let body = client
            .get(server.url("/items"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "first");
    }

    server.verify();
    server.shutdown().await;
}

#[tokio::test]
async fn test_unmatched_request_is_fatal() {
    let (server, reporter) = start_recording().await;
    server.expect().get("/known").any_times().response(200);

    let response = Client::new()
        .post(server.url("/unknown"))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert!(response.headers().contains_key(FAILURE_HEADER));
    let body = response.text().await.unwrap();
    assert!(body.starts_with("Unexpected call:"));
    assert!(body.contains("Method: POST"));
    assert!(body.contains("Path: /unknown"));
    assert!(body.contains("Body: payload"));

    let fatals = reporter.fatals();
    assert_eq!(fatals.len(), 1);
    assert!(fatals[0].contains("Path: /unknown"));

    server.verify();
    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_response_is_fatal() {
    let (server, reporter) = start_recording().await;
    server.expect().get("/half-declared");

    let response = Client::new()
        .get(server.url("/half-declared"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let fatals = reporter.fatals();
    assert_eq!(fatals.len(), 1);
    assert!(fatals[0].contains("Response not defined for expectation"));
    assert!(fatals[0].contains("----- Path: /half-declared"));

    server.verify();
    server.shutdown().await;
    // the match was still counted
    assert_eq!(reporter.fatals().len(), 1);
}

#[tokio::test]
async fn test_shutdown_without_verify_is_fatal() {
    let (server, reporter) = start_recording().await;
    server.shutdown().await;

    let fatals = reporter.fatals();
    assert_eq!(fatals.len(), 1);
    assert!(fatals[0].contains("verify() was not called"));
}

#[tokio::test]
async fn test_request_matchers_over_http() {
    let (server, reporter) = start_recording().await;
    server
        .expect()
        .post("/login")
        .form_param("user", "ada")
        .basic_auth("ada", "secret")
        .response(204);
    server
        .expect()
        .put("/orders/7")
        .query_param("dry_run", "true")
        .json_path("$.qty", &3)
        .bearer_token_exists()
        .response(200);
    server
        .expect()
        .delete("/sessions/current")
        .header_regex("X-Request-Id", r"^[a-f0-9]{8}$")
        .response(202);

    let client = Client::new();
    let login = client
        .post(server.url("/login"))
        .basic_auth("ada", Some("secret"))
        .form(&[("user", "ada")])
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), 204);

    let order = client
        .put(server.url("/orders/7?dry_run=true"))
        .bearer_auth("token-123")
        .json(&json!({"qty": 3, "note": "rush"}))
        .send()
        .await
        .unwrap();
    assert_eq!(order.status(), 200);

    let logout = client
        .delete(server.url("/sessions/current"))
        .header("X-Request-Id", "deadbeef")
        .send()
        .await
        .unwrap();
    assert_eq!(logout.status(), 202);

    server.verify();
    server.shutdown().await;
    assert!(!reporter.has_failed(), "{:?}", reporter.failures());
}

#[tokio::test]
async fn test_response_headers_and_content_type() {
    let (server, reporter) = start_recording().await;
    server
        .expect()
        .get("/report")
        .response(200)
        .content_type("text/csv")
        .header("X-Total", "2")
        .json_body(&json!({"ignored": "content type kept"}));

    let response = Client::new().get(server.url("/report")).send().await.unwrap();
    assert_eq!(response.headers()["content-type"], "text/csv");
    assert_eq!(response.headers()["x-total"], "2");

    server.verify();
    server.shutdown().await;
    assert!(!reporter.has_failed(), "{:?}", reporter.failures());
}

#[tokio::test]
async fn test_concurrent_requests_are_all_counted() {
    let (server, reporter) = start_recording().await;
    server.expect().get("/burst").times(10).response(200);

    let client = Client::new();
    let url = server.url("/burst");
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let client = client.clone();
            let url = url.clone();
            tokio::spawn(async move { client.get(url).send().await.unwrap().status() })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 200);
    }

    server.verify();
    server.shutdown().await;
    assert!(!reporter.has_failed(), "{:?}", reporter.failures());
}

#[tokio::test]
async fn test_invalid_options_fail_construction() {
    let reporter = Arc::new(TestReporter::recording());

    let err = MockServer::try_start(ServerOptions::new().with_port("http"), reporter.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        ServerError::Config(ConfigError::InvalidPort(_))
    ));

    let no_tls_material = ServerOptions {
        use_tls: true,
        ..ServerOptions::default()
    };
    let err = MockServer::try_start(no_tls_material, reporter.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        ServerError::Config(ConfigError::MissingTlsMaterial)
    ));

    assert_eq!(reporter.fatals().len(), 2);
}

#[tokio::test]
async fn test_port_in_use_is_reported() {
    let (first, _) = start_recording().await;
    let reporter = Arc::new(TestReporter::recording());
    let taken = ServerOptions::new().with_port(first.address().port());

    let err = MockServer::try_start(taken, reporter.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ServerError::Bind(..)));
    assert!(reporter.fatals()[0].contains("failed to listen on"));

    first.verify();
    first.shutdown().await;
}

#[tokio::test]
async fn test_mock_file_installs_expectations() {
    let file = MockFile::from_yaml(
        r#"
every:
  - request:
      - header_exists: X-Trace
expect:
  - request:
      - method: GET
      - path: /users
    times: 2
    response:
      status: 200
      json: [{"id": 1}]
defaults:
  - response:
      status: 404
      body: not here
"#,
    )
    .unwrap();

    let (server, reporter) = start_recording().await;
    file.install(&server);

    let client = Client::new();
    for _ in 0..2 {
        let users = client
            .get(server.url("/users"))
            .header("X-Trace", "1")
            .send()
            .await
            .unwrap();
        assert_eq!(users.status(), 200);
    }
    let fallback = client
        .get(server.url("/users"))
        .header("X-Trace", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(fallback.status(), 404);
    assert_eq!(fallback.text().await.unwrap(), "not here");

    server.verify();
    server.shutdown().await;
    assert!(!reporter.has_failed(), "{:?}", reporter.failures());
}

#[tokio::test]
#[should_panic(expected = "expectation(s) not satisfied")]
async fn test_panicking_reporter_fails_the_test() {
    let server = MockServer::start().await;
    server.expect().get("/never").response(200);
    server.verify();
}

#[tokio::test]
async fn test_drop_without_verify_is_fatal() {
    let (server, reporter) = start_recording().await;
    server.expect().get("/users").response(200);
    drop(server);

    let fatals = reporter.fatals();
    assert_eq!(fatals.len(), 1);
    assert!(fatals[0].contains("verify() was not called"));
}

#[tokio::test]
async fn test_drop_after_shutdown_reports_nothing_more() {
    let (server, reporter) = start_recording().await;
    server.shutdown().await;
    assert_eq!(reporter.fatals().len(), 1);
}

#[tokio::test]
#[should_panic(expected = "verify() was not called")]
async fn test_panicking_reporter_fails_on_unverified_drop() {
    let server = MockServer::start().await;
    server.expect().get("/users").response(200);
}

#[tokio::test]
#[should_panic(expected = "mock server recorded 1 failure(s)")]
async fn test_every_violation_fails_the_test_at_verify() {
    let server = MockServer::start().await;
    server.every().header_exists("X-Trace");
    server.expect().get("/ping").response(200);

    let response = Client::new().get(server.url("/ping")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    server.verify();
}

#[tokio::test]
#[should_panic(expected = "Unexpected call")]
async fn test_unmatched_request_answers_then_fails_the_test() {
    let server = MockServer::start().await;
    server.expect().get("/ok").any_times().response(200);

    let client = Client::new();
    let unmatched = client.get(server.url("/nope")).send().await.unwrap();
    assert_eq!(unmatched.status(), 500);
    assert!(unmatched.headers().contains_key(FAILURE_HEADER));
    assert!(unmatched.text().await.unwrap().contains("Path: /nope"));

    let ok = client.get(server.url("/ok")).send().await.unwrap();
    assert_eq!(ok.status(), 200);

    server.verify();
}

#[tokio::test]
#[should_panic(expected = "Unexpected call")]
async fn test_failures_after_verify_are_raised_on_drop() {
    let server = MockServer::start().await;
    server.expect().get("/ok").any_times().response(200);
    server.verify();

    let late = Client::new().get(server.url("/late")).send().await.unwrap();
    assert_eq!(late.status(), 500);

    drop(server);
}

#[tokio::test]
async fn test_https_server_with_self_signed_certificate() {
    let options = ServerOptions::new().with_tls(
        include_bytes!("fixtures/localhost.crt").to_vec(),
        include_bytes!("fixtures/localhost.key").to_vec(),
    );
    let reporter = Arc::new(TestReporter::recording());
    let server = MockServer::start_with_reporter(options, reporter.clone()).await;
    assert!(server.base_url().starts_with("https://"));

    server
        .expect()
        .get("/secure")
        .response(200)
        .json_body(&json!({"tls": true}));

    let client = Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();
    let response = client.get(server.url("/secure")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"tls": true}));

    let plain = Client::new()
        .get(server.url("/secure").replacen("https://", "http://", 1))
        .send()
        .await;
    assert!(plain.is_err());

    server.verify();
    server.shutdown().await;
    assert!(!reporter.has_failed(), "{:?}", reporter.failures());
}
