#![allow(dead_code)]

use axum::{Router, body::Body, http::Request, http::StatusCode};
use speed_dashboard::{
    log_store::LogStore,
    server::{AppState, router},
    trigger::MockTrigger,
};
use std::{fs, path::Path, sync::Arc};
use tower::ServiceExt;

pub const HEADER: &str = "timestamp,download_mbps,upload_mbps,latency_ms,responsiveness_rpm,status";

/// Write a speed log with the monitor's header followed by `rows`.
pub fn write_log(dir: &Path, name: &str, rows: &[String]) {
    let mut content = String::from(HEADER);
    for row in rows {
        content.push('\n');
        content.push_str(row);
    }
    content.push('\n');
    fs::write(dir.join(name), content).unwrap();
}

pub fn row(timestamp: &str, download: f64, upload: f64, latency: f64, status: &str) -> String {
    format!("{timestamp},{download},{upload},{latency},900,{status}")
}

pub fn create_test_app(dir: &Path, trigger: MockTrigger) -> Router {
    let store = LogStore::new(dir, "speed_log_*.csv", 168);
    router(Arc::new(AppState::new(store, Arc::new(trigger), 6432)))
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

pub async fn get_json(app: &Router, uri: &str) -> serde_json::Value {
    let (status, body) = get(app, uri).await;
    assert_eq!(status, StatusCode::OK, "unexpected status for {uri}: {body}");
    serde_json::from_str(&body).unwrap()
}
