mod common;

use axum::http::StatusCode;
use flate2::{write::GzEncoder, Compression};
use std::io::Write;

use common::TestApp;

fn write_gz(app: &TestApp, name: &str, body: &str) {
    let file = std::fs::File::create(app.data_dir.path().join(name)).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "OK");
}

#[tokio::test]
async fn metrics_fall_back_then_404() {
    let app = TestApp::new();

    let (status, _) = app.get("/api/recent-rate-changes", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    write_gz(&app, "rate_changes_fallback.json.gz", r#"{"changes": [], "source": "fallback"}"#);
    let (status, body) = app.get("/api/recent-rate-changes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "fallback");

    write_gz(&app, "state_metrics.json.gz", r#"{"TX": {"avgRate": 41.5}}"#);
    let (status, body) = app.get("/api/enhanced-metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["TX"]["avgRate"], 41.5);
}

#[tokio::test]
async fn corrupt_metrics_are_a_server_error() {
    let app = TestApp::new();
    std::fs::write(app.data_dir.path().join("state_metrics.json.gz"), b"plain text").unwrap();

    let (status, body) = app.get("/api/state-metrics", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
}
