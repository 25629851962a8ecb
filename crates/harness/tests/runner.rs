//! TestRunner against a stub comply-server
//!
//! The runner is exercised without a launched process: the stub writes into the
//! log file directly, standing in for captured server output.

mod common;

use std::collections::BTreeMap;

use common::{
    spawn_stub, test_config, DEFERRED_LOG_LINE, REJECTED_LOG_LINE, STATUS_BODY, STATUS_LOG_LINE,
    VERSION_LOG_LINE,
};
use comply_harness::readiness::wait_until_ready;
use comply_harness::report::report_file_name;
use comply_harness::suite::builtin_suite;
use comply_harness::{
    Expectations, HttpClient, RequestSpec, TestCase, TestContext, TestRunner, TestStatus,
};

#[tokio::test]
async fn test_builtin_suite_runs_in_order_and_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("server.log");
    std::fs::write(&log, "comply-server listening\n").unwrap();

    let stub = spawn_stub(Some(log.clone()), 0).await;
    let mut config = test_config(dir.path().to_path_buf(), stub.port);
    config.server.log_file = Some(log);

    let runner = TestRunner::from_config(&config).unwrap();
    let cases = builtin_suite();
    let results = runner.run(&cases).await;

    let names: Vec<_> = results.tests.iter().map(|t| t.name.as_str()).collect();
    let expected: Vec<_> = cases.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, expected);
    assert_eq!(results.passed + results.failed, cases.len());
    assert_eq!(results.runtime_version, "v-test.1");

    let status_of = |name: &str| {
        results
            .tests
            .iter()
            .find(|t| t.name == name)
            .map(|t| (t.status, t.error.clone()))
            .unwrap()
    };
    assert_eq!(status_of("Server Version"), (TestStatus::Passed, None));
    assert_eq!(status_of("List Plugins").0, TestStatus::Passed);
    assert_eq!(status_of("Server Next Commands").0, TestStatus::Passed);
    assert_eq!(status_of("Invalid Endpoint Returns 404").0, TestStatus::Passed);
    assert_eq!(
        status_of("Server Status"),
        (TestStatus::Failed, Some("Expected status 200, got 500".to_string()))
    );

    // HTML where JSON was expected: one failure, and the suite carried on
    let (api_status, api_error) = status_of("API Documentation");
    assert_eq!(api_status, TestStatus::Failed);
    assert!(
        api_error.unwrap().starts_with("Failed to decode response body"),
        "decode failures are reported as such"
    );
    assert_eq!(results.passed, 4);
    assert_eq!(results.failed, 3);
}

#[tokio::test]
async fn test_failure_report_correlates_exchange_with_log_lines() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("server.log");
    std::fs::write(&log, "").unwrap();

    let stub = spawn_stub(Some(log.clone()), 0).await;
    let mut config = test_config(dir.path().to_path_buf(), stub.port);
    config.server.log_file = Some(log);

    let runner = TestRunner::from_config(&config).unwrap();
    runner.run(&builtin_suite()).await;

    let report_path = dir.path().join("server-status-failure-report-v-test_1.txt");
    let report = std::fs::read_to_string(&report_path).unwrap();
    assert!(report.contains("Test:      Server Status"));
    assert!(report.contains("Expected status 200, got 500"));
    assert!(report.contains(&format!("GET http://127.0.0.1:{}/server/status", stub.port)));
    assert!(report.contains("Status: 500"));
    assert!(report.contains(STATUS_BODY));
    assert!(report.contains(STATUS_LOG_LINE));

    // "Server Accepts JSON" runs after "Server Version": only its own log lines are attached
    let accepts = std::fs::read_to_string(
        dir.path()
            .join(report_file_name("Server Accepts JSON", &config.version_tag())),
    )
    .unwrap();
    assert!(accepts.contains(STATUS_LOG_LINE));
    assert!(!accepts.contains(VERSION_LOG_LINE));
    assert!(accepts.contains("accept: application/json"));

    // passing tests leave no report behind
    assert!(!dir
        .path()
        .join(report_file_name("Server Version", &config.version_tag()))
        .exists());
}

#[tokio::test]
async fn test_late_output_of_passing_test_stays_out_of_next_report() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("server.log");
    std::fs::write(&log, "").unwrap();

    let stub = spawn_stub(Some(log.clone()), 0).await;
    let mut config = test_config(dir.path().to_path_buf(), stub.port);
    config.server.log_file = Some(log);

    let cases = vec![
        TestCase::new("Audit Flush", RequestSpec::get("/server/audit"), Expectations::default()),
        TestCase::new("Reject", RequestSpec::get("/server/reject"), Expectations::default()),
    ];
    let runner = TestRunner::from_config(&config).unwrap();
    let results = runner.run(&cases).await;
    assert_eq!((results.passed, results.failed), (1, 1));

    let report = std::fs::read_to_string(
        dir.path().join(report_file_name("Reject", &config.version_tag())),
    )
    .unwrap();
    let log_section = report
        .split("Server Log (output during this test)")
        .nth(1)
        .unwrap();
    assert!(log_section.contains(REJECTED_LOG_LINE), "{log_section}");
    assert!(!log_section.contains(DEFERRED_LOG_LINE), "{log_section}");
}

#[tokio::test]
async fn test_captured_request_matches_what_the_server_received() {
    let stub = spawn_stub(None, 0).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf(), stub.port);
    let client = HttpClient::new(&config.http).unwrap();

    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    headers.insert("x-trace-id".to_string(), "run-42".to_string());
    let spec = RequestSpec {
        method: "post".to_string(),
        path: "/echo".to_string(),
        headers,
        body: Some(r#"{"msg":"hello"}"#.to_string()),
    };

    let mut ctx = TestContext::new();
    let response = client.send(&mut ctx, &spec).await.unwrap();
    let echoed: serde_json::Value = serde_json::from_str(&response.body).unwrap();

    let request = ctx.request.expect("request recorded");
    assert_eq!(request.method, "POST");
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["path"], request.path.as_str());
    assert_eq!(echoed["body"], request.body.as_deref().unwrap());
    for (name, value) in &request.headers {
        assert_eq!(echoed["headers"][name.as_str()], value.as_str(), "header {name}");
    }
    assert_eq!(ctx.response.as_ref(), Some(&response));
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_unreachable_server_fails_each_test_without_aborting() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf(), common::closed_port());
    let runner = TestRunner::from_config(&config).unwrap();

    let cases = vec![
        TestCase::new("First", RequestSpec::get("/server/version"), Expectations::default()),
        TestCase::new("Second", RequestSpec::get("/server/api"), Expectations::default()),
    ];
    let results = runner.run(&cases).await;

    assert_eq!(results.failed, 2);
    assert!(results.tests.iter().all(|t| t.error.as_deref().unwrap().starts_with("HTTP error")));

    // the log was never created; the report says so instead of failing
    let report =
        std::fs::read_to_string(dir.path().join("first-failure-report-v-test_1.txt")).unwrap();
    assert!(report.contains("(log unavailable"));
    assert!(report.contains("(no response received)"));
}

#[tokio::test]
async fn test_readiness_retries_until_healthy() {
    let stub = spawn_stub(None, 2).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf(), stub.port);
    let client = HttpClient::new(&config.http).unwrap();

    wait_until_ready(&client, "/heartbeat", 5, config.readiness.interval)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_readiness_gives_up_after_max_attempts() {
    let stub = spawn_stub(None, 10).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf(), stub.port);
    let client = HttpClient::new(&config.http).unwrap();

    let err = wait_until_ready(&client, "/heartbeat", 3, config.readiness.interval)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Server failed to become ready after 3 attempts (last error: status 503)"
    );
}
