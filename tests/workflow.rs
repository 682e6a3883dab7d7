//! End-to-end tests of the submit → wait → fetch workflow.
//!
//! Uses wiremock to stand in for the conversion service. Poll intervals are
//! a few milliseconds so every scenario, including timeouts, runs in well
//! under a second.

use docsvc_client::{
    run, ClientConfig, DocsvcError, FetchOutcome, PdfExport, PollState, RunOutcome, Stage,
    SubmitMode, WaitDetail,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;
use wiremock::{
    matchers::{method, path, path_regex},
    Mock, MockServer, ResponseTemplate,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=docsvc_client=debug`
/// shows every request and poll tick.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Two small input files inside a fresh temp dir.
fn inputs(dir: &TempDir) -> Vec<PathBuf> {
    let a = dir.path().join("a.pdf");
    let b = dir.path().join("b.docx");
    std::fs::write(&a, b"%PDF-1.7\n%stub").unwrap();
    std::fs::write(&b, b"PK\x03\x04stub").unwrap();
    vec![a, b]
}

fn config(server: &MockServer, out_dir: &Path, mode: SubmitMode) -> ClientConfig {
    init_tracing();
    ClientConfig::builder()
        .base_url(server.uri())
        .mode(mode)
        .case_name("it-case")
        .out_dir(out_dir)
        .poll_interval(Duration::from_millis(20))
        .poll_timeout(Duration::from_secs(5))
        .request_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Number of requests the server saw for `method path`.
async fn hits(server: &MockServer, verb: &str, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == verb && r.url.path() == route)
        .count()
}

/// Body of the first request to `route`, as lossy UTF-8.
async fn body_of(server: &MockServer, route: &str) -> String {
    let requests = server.received_requests().await.unwrap_or_default();
    let req = requests
        .iter()
        .find(|r| r.url.path() == route)
        .unwrap_or_else(|| panic!("no request to {route}"));
    String::from_utf8_lossy(&req.body).into_owned()
}

/// The health check every run sends during preflight.
async fn mount_health(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(server)
        .await;
}

async fn mount_case_submission(server: &MockServer) {
    mount_health(server).await;
    Mock::given(method("POST"))
        .and(path("/cases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "case_id": "c1" })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cases/c1/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cases/c1/convert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "queued": true })))
        .mount(server)
        .await;
}

/// Baseline listing is empty; every later listing returns `after`.
async fn mount_listing(server: &MockServer, after: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/cases/c1/results"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cases/c1/results"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": after })))
        .mount(server)
        .await;
}

// ── Case mode ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn case_run_downloads_archive() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    mount_case_submission(&server).await;
    mount_listing(&server, &["page_0001.png", "page_0002.png"]).await;
    Mock::given(method("GET"))
        .and(path("/cases/c1/results.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x05\x06zip".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let report = assert_ok!(run(&inputs(&dir), &config(&server, &out, SubmitMode::Case)).await);

    let archive = out.join("c1_results.zip");
    assert_eq!(
        report.outcome,
        RunOutcome::ArtifactDownloaded {
            path: archive.clone()
        }
    );
    assert_eq!(std::fs::read(&archive).unwrap(), b"PK\x05\x06zip");
    assert_eq!(report.uploaded, vec!["a.pdf".to_string(), "b.docx".to_string()]);
    assert!(!report.wait.timed_out);
    assert_eq!(hits(&server, "POST", "/cases/c1/files").await, 2);
    match &report.wait.detail {
        WaitDetail::Results { changed, .. } => assert_eq!(changed.len(), 2),
        other => panic!("unexpected wait detail: {other:?}"),
    }
}

#[tokio::test]
async fn convert_request_carries_conversion_params() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_case_submission(&server).await;
    mount_listing(&server, &["page_0001.png"]).await;
    Mock::given(method("GET"))
        .and(path("/cases/c1/results.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip".to_vec()))
        .mount(&server)
        .await;

    assert_ok!(run(&inputs(&dir), &config(&server, dir.path(), SubmitMode::Case)).await);

    let upload = body_of(&server, "/cases/c1/files").await;
    assert!(upload.contains(r#"name="file""#), "upload body: {upload}");
    assert!(upload.contains(r#"filename="a.pdf""#), "upload body: {upload}");

    let convert = body_of(&server, "/cases/c1/convert").await;
    assert_eq!(convert.matches(r#"name="filenames""#).count(), 2);
    assert!(convert.contains("b.docx"));
    assert!(convert.contains(r#"name="dpi""#) && convert.contains("220"));
    assert!(convert.contains(r#"name="image_format""#) && convert.contains("PNG"));
    assert!(convert.contains(r#"name="pack_zip""#));
    assert!(convert.contains(r#"name="filename_prefix""#));
    assert!(!convert.contains(r#"name="max_side""#), "unconstrained max_side must be omitted");
}

#[tokio::test]
async fn null_case_id_aborts_before_any_upload() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_health(&server).await;
    Mock::given(method("POST"))
        .and(path("/cases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "case_id": null })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/cases/.+/files$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = assert_err!(run(&inputs(&dir), &config(&server, dir.path(), SubmitMode::Case)).await);

    assert_eq!(err.stage(), Stage::CreateWorkUnit);
    match err {
        DocsvcError::WorkUnitNotCreated { raw, .. } => assert!(raw.contains("null"), "raw: {raw}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_input_makes_no_requests() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut files = inputs(&dir);
    files.push(dir.path().join("ghost.pdf"));

    let err = assert_err!(run(&files, &config(&server, dir.path(), SubmitMode::Case)).await);

    assert!(matches!(err, DocsvcError::FileNotFound { .. }), "got: {err:?}");
    assert_eq!(err.stage().number(), 1);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn upload_failure_names_the_file_and_stops() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_health(&server).await;
    Mock::given(method("POST"))
        .and(path("/cases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "case_id": "c1" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cases/c1/files"))
        .respond_with(ResponseTemplate::new(413).set_body_string("too large"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cases/c1/convert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "queued": true })))
        .expect(0)
        .mount(&server)
        .await;

    let err = assert_err!(run(&inputs(&dir), &config(&server, dir.path(), SubmitMode::Case)).await);

    assert_eq!(err.stage(), Stage::Upload);
    match err {
        DocsvcError::UploadFailed { path, .. } => assert!(path.ends_with("a.pdf")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(hits(&server, "POST", "/cases/c1/files").await, 1);
}

#[tokio::test]
async fn unacknowledged_conversion_aborts_at_trigger() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_health(&server).await;
    Mock::given(method("POST"))
        .and(path("/cases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "case_id": "c1" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cases/c1/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cases/c1/results"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cases/c1/convert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "queued": false })))
        .mount(&server)
        .await;

    let err = assert_err!(run(&inputs(&dir), &config(&server, dir.path(), SubmitMode::Case)).await);

    assert_eq!(err.stage(), Stage::Trigger);
    assert!(err.to_string().contains(r#""queued":false"#), "got: {err}");
}

#[tokio::test]
async fn missing_archive_falls_back_to_one_listing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_case_submission(&server).await;
    mount_listing(&server, &["page 1.png"]).await;
    Mock::given(method("GET"))
        .and(path("/cases/c1/results.zip"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "detail": "Not Found" })))
        .expect(1)
        .mount(&server)
        .await;

    let report = assert_ok!(run(&inputs(&dir), &config(&server, dir.path(), SubmitMode::Case)).await);

    assert_eq!(report.outcome, RunOutcome::ManualRetrieval { timed_out: false });
    // baseline + the poll that saw the change + exactly one fallback listing
    assert_eq!(hits(&server, "GET", "/cases/c1/results").await, 3);
    match report.fetch {
        Some(FetchOutcome::Fallback {
            reason,
            listing_url,
            entries,
        }) => {
            assert!(reason.contains("404"), "reason: {reason}");
            assert!(listing_url.ends_with("/cases/c1/results"));
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].name, "page 1.png");
            assert!(entries[0].url.ends_with("/cases/c1/results/page%201.png"));
        }
        other => panic!("unexpected fetch outcome: {other:?}"),
    }
    assert!(!dir.path().join("c1_results.zip").exists(), "no partial archive left behind");
}

#[tokio::test]
async fn unchanged_results_time_out_with_manual_retrieval() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_case_submission(&server).await;
    mount_listing(&server, &[]).await;
    Mock::given(method("GET"))
        .and(path("/cases/c1/results.zip"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = ClientConfig::builder()
        .base_url(server.uri())
        .out_dir(dir.path())
        .poll_interval(Duration::from_millis(40))
        .poll_timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let report = assert_ok!(run(&inputs(&dir), &config).await);

    assert!(report.wait.timed_out);
    assert!(report.wait.attempts >= 2, "attempts = {}", report.wait.attempts);
    assert_eq!(report.outcome, RunOutcome::ManualRetrieval { timed_out: true });
    assert!(matches!(
        report.fetch,
        Some(FetchOutcome::Fallback { ref entries, .. }) if entries.is_empty()
    ));
}

#[tokio::test]
async fn failing_listings_are_retried_until_the_deadline() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_case_submission(&server).await;
    Mock::given(method("GET"))
        .and(path("/cases/c1/results"))
        .respond_with(ResponseTemplate::new(500).set_body_string("storage offline"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cases/c1/results.zip"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = ClientConfig::builder()
        .base_url(server.uri())
        .out_dir(dir.path())
        .poll_interval(Duration::from_millis(30))
        .poll_timeout(Duration::from_millis(90))
        .build()
        .unwrap();

    let report = assert_ok!(run(&inputs(&dir), &config).await);

    assert!(report.wait.timed_out);
    match &report.wait.detail {
        WaitDetail::Results {
            failed_queries,
            current,
            ..
        } => {
            assert_eq!(*failed_queries, report.wait.attempts);
            assert!(current.is_none());
        }
        other => panic!("unexpected wait detail: {other:?}"),
    }
    match report.fetch {
        Some(FetchOutcome::Unavailable { listing_error, .. }) => {
            assert!(listing_error.contains("storage offline"), "got: {listing_error}")
        }
        other => panic!("unexpected fetch outcome: {other:?}"),
    }
}

#[tokio::test]
async fn stalled_listing_still_ends_near_the_poll_timeout() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_case_submission(&server).await;
    Mock::given(method("GET"))
        .and(path("/cases/c1/results"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cases/c1/results"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "results": ["late.png"] }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cases/c1/results.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip".to_vec()))
        .mount(&server)
        .await;

    let config = ClientConfig::builder()
        .base_url(server.uri())
        .out_dir(dir.path())
        .poll_interval(Duration::from_millis(100))
        .poll_timeout(Duration::from_millis(300))
        .request_timeout(Duration::from_secs(30))
        .build()
        .unwrap();

    let report = assert_ok!(run(&inputs(&dir), &config).await);

    assert!(report.wait.timed_out);
    assert_eq!(report.wait.attempts, 1);
    // T + I is 400ms; the rest is scheduling slack, far below the 3s stall.
    assert!(report.wait.elapsed_ms < 1_000, "elapsed_ms = {}", report.wait.elapsed_ms);
    match &report.wait.detail {
        WaitDetail::Results { failed_queries, .. } => assert_eq!(*failed_queries, 1),
        other => panic!("unexpected wait detail: {other:?}"),
    }
}

#[tokio::test]
async fn server_case_id_cannot_escape_its_path_or_out_dir() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    mount_health(&server).await;
    Mock::given(method("POST"))
        .and(path("/cases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "case_id": "../escaped" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/cases/[^/]+/files$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/cases/[^/]+/convert$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "queued": true })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/cases/[^/]+/results$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/cases/[^/]+/results$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": ["page_0001.png"] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/cases/[^/]+/results\.zip$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip".to_vec()))
        .mount(&server)
        .await;

    let report = assert_ok!(run(&inputs(&dir), &config(&server, &out, SubmitMode::Case)).await);

    let requests = server.received_requests().await.unwrap_or_default();
    for request in &requests {
        let p = request.url.path();
        assert!(p == "/" || p == "/cases" || p.starts_with("/cases/..%2Fescaped/"), "request to {p}");
    }
    assert_eq!(hits(&server, "POST", "/cases/..%2Fescaped/files").await, 2);

    let archive = out.join("_escaped_results.zip");
    assert_eq!(report.outcome, RunOutcome::ArtifactDownloaded { path: archive.clone() });
    assert!(archive.exists());
    assert!(!dir.path().join("escaped_results.zip").exists());
}

#[tokio::test]
async fn unreachable_service_fails_preflight_before_creating_anything() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503).set_body_string("starting up"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "case_id": "c1" })))
        .expect(0)
        .mount(&server)
        .await;

    let err = assert_err!(run(&inputs(&dir), &config(&server, dir.path(), SubmitMode::Case)).await);

    assert_eq!(err.stage(), Stage::Preflight);
    assert!(err.to_string().contains("503"), "got: {err}");
}

#[tokio::test]
async fn service_not_answering_ok_fails_preflight() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": false })))
        .mount(&server)
        .await;

    let err = assert_err!(run(&inputs(&dir), &config(&server, dir.path(), SubmitMode::Batch)).await);

    assert_eq!(err.stage().number(), 1);
    match err {
        DocsvcError::ServiceNotReady { raw } => assert!(raw.contains("false"), "raw: {raw}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(hits(&server, "POST", "/files").await, 0);
}

// ── Batch mode ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_run_reports_each_handle() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_health(&server).await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "file_ids": ["f1", "f2"] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/files:run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "runs": [
                { "task_run_id": "r1", "file_id": "f1" },
                { "task_run_id": "r2", "file_id": "f2" },
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "task_run_id": "r1", "status": "RUNNING" })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "task_run_id": "r1",
            "status": "SUCCEEDED",
            "started_at": "2024-05-01T10:00:00",
            "finished_at": "2024-05-01T10:00:42",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs/r2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "task_run_id": "r2",
            "status": "FAILED",
            "error": "unsupported format",
        })))
        .mount(&server)
        .await;

    let config = ClientConfig::builder()
        .base_url(server.uri())
        .mode(SubmitMode::Batch)
        .task_name("to_pdf")
        .user_id("alice")
        .out_dir(dir.path())
        .poll_interval(Duration::from_millis(20))
        .poll_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let report = assert_ok!(run(&inputs(&dir), &config).await);

    assert_eq!(
        report.outcome,
        RunOutcome::RunsFinished {
            succeeded: 1,
            failed: 1
        }
    );
    assert!(report.fetch.is_none());
    assert!(report.pdf_exports.is_empty(), "PDF export is opt-in");
    assert_eq!(hits(&server, "POST", "/files/f1/to-pdf").await, 0);
    assert_eq!(report.uploaded, vec!["a.pdf".to_string(), "b.docx".to_string()]);
    assert_eq!(report.wait.attempts, 3);
    // r2 was terminal after the first tick and never queried again
    assert_eq!(hits(&server, "GET", "/runs/r2").await, 1);
    assert_eq!(hits(&server, "GET", "/runs/r1").await, 3);

    match &report.wait.detail {
        WaitDetail::Runs { runs } => {
            assert_eq!(runs[0].state, PollState::Succeeded);
            assert_eq!(runs[0].started_at.as_deref(), Some("2024-05-01T10:00:00"));
            assert_eq!(runs[0].finished_at.as_deref(), Some("2024-05-01T10:00:42"));
            assert_eq!(runs[1].state, PollState::Failed);
            assert_eq!(runs[1].error.as_deref(), Some("unsupported format"));
        }
        other => panic!("unexpected wait detail: {other:?}"),
    }

    let upload = body_of(&server, "/files").await;
    assert_eq!(upload.matches(r#"name="files""#).count(), 2);
    assert!(upload.contains(r#"name="user_id""#) && upload.contains("alice"));

    let trigger: serde_json::Value = serde_json::from_str(&body_of(&server, "/files:run").await).unwrap();
    assert_eq!(trigger["name"], "to_pdf");
    assert_eq!(trigger["file_ids"], json!(["f1", "f2"]));
    assert_eq!(trigger["params"]["image_format"], "PNG");
    assert_eq!(trigger["params"]["dpi"], 220);
}

#[tokio::test]
async fn batch_without_runs_is_not_queued() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_health(&server).await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "file_ids": ["f1", "f2"] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/files:run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "runs": [] })))
        .mount(&server)
        .await;

    let err = assert_err!(run(&inputs(&dir), &config(&server, dir.path(), SubmitMode::Batch)).await);

    assert!(matches!(err, DocsvcError::NotQueued { .. }), "got: {err:?}");
    assert_eq!(err.stage(), Stage::Trigger);
}

#[tokio::test]
async fn batch_timeout_keeps_partial_results() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_health(&server).await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "file_ids": ["f1", "f2"] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/files:run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "runs": [{ "task_run_id": "r1" }, { "task_run_id": "r2" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "SUCCEEDED" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs/r2"))
        .respond_with(ResponseTemplate::new(503).set_body_string("worker busy"))
        .mount(&server)
        .await;

    let config = ClientConfig::builder()
        .base_url(server.uri())
        .mode(SubmitMode::Batch)
        .out_dir(dir.path())
        .poll_interval(Duration::from_millis(30))
        .poll_timeout(Duration::from_millis(90))
        .build()
        .unwrap();

    let report = assert_ok!(run(&inputs(&dir), &config).await);

    assert_eq!(
        report.outcome,
        RunOutcome::RunsTimedOut {
            succeeded: 1,
            failed: 0,
            pending: 1
        }
    );
    match &report.wait.detail {
        WaitDetail::Runs { runs } => {
            assert_eq!(runs[1].state, PollState::Unknown);
            assert!(runs[1]
                .last_query_error
                .as_deref()
                .is_some_and(|e| e.contains("worker busy")));
        }
        other => panic!("unexpected wait detail: {other:?}"),
    }
}

#[tokio::test]
async fn batch_exports_a_pdf_per_file_when_asked() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    mount_health(&server).await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "file_ids": ["f1", "f2"] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/files:run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "runs": [{ "task_run_id": "r1", "file_id": "f1" }, { "task_run_id": "r2", "file_id": "f2" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/runs/r[12]$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "SUCCEEDED" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/files/f1/to-pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(b"%PDF-1.7 converted".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/files/f2/to-pdf"))
        .respond_with(ResponseTemplate::new(500).set_body_string("libreoffice crashed"))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::builder()
        .base_url(server.uri())
        .mode(SubmitMode::Batch)
        .export_pdf(true)
        .out_dir(&out)
        .poll_interval(Duration::from_millis(20))
        .poll_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let report = assert_ok!(run(&inputs(&dir), &config).await);

    assert_eq!(
        report.outcome,
        RunOutcome::RunsFinished {
            succeeded: 2,
            failed: 0
        }
    );
    assert_eq!(report.pdf_exports.len(), 2);
    match &report.pdf_exports[0] {
        PdfExport::Saved { file_id, path: saved, bytes } => {
            assert_eq!(file_id.as_str(), "f1");
            assert_eq!(saved, &out.join("f1.pdf"));
            assert_eq!(*bytes, 18);
            assert_eq!(std::fs::read(saved).unwrap(), b"%PDF-1.7 converted");
        }
        other => panic!("unexpected export: {other:?}"),
    }
    match &report.pdf_exports[1] {
        PdfExport::Failed { file_id, reason } => {
            assert_eq!(file_id.as_str(), "f2");
            assert!(reason.contains("libreoffice crashed"), "reason: {reason}");
        }
        other => panic!("unexpected export: {other:?}"),
    }
    assert!(!out.join("f2.pdf").exists());
}
