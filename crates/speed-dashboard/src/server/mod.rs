use crate::{
    Result,
    log_store::LogStore,
    stats::SummaryStats,
    trigger::{Trigger, TriggerOutcome},
};
use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DASHBOARD_TEMPLATE: &str = include_str!("dashboard.html");

pub struct AppState {
    store: LogStore,
    trigger: Arc<dyn Trigger>,
    page: String,
}

impl AppState {
    pub fn new(store: LogStore, trigger: Arc<dyn Trigger>, port: u16) -> Self {
        Self {
            store,
            trigger,
            page: DASHBOARD_TEMPLATE.replace("{{PORT}}", &port.to_string()),
        }
    }
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/api/data", get(api_data))
        .route("/api/stats", get(api_stats))
        .route("/api/trigger", get(api_trigger))
        .fallback(not_found)
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` is cancelled. A bind failure is the
/// only error this returns during normal operation.
pub async fn serve(
    addr: SocketAddr,
    state: SharedState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    serve_listener(listener, state, shutdown).await
}

pub async fn serve_listener(
    listener: TcpListener,
    state: SharedState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "speed dashboard listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")?;

    info!("speed dashboard stopped accepting connections");
    Ok(())
}

async fn dashboard(State(state): State<SharedState>) -> Html<String> {
    record_request("dashboard");
    Html(state.page.clone())
}

async fn api_data(State(state): State<SharedState>) -> Response {
    record_request("data");
    match read_logs(&state.store, |store| store.recent()).await {
        Ok(records) => Json(records).into_response(),
        Err(err) => internal_error("data", err),
    }
}

async fn api_stats(State(state): State<SharedState>) -> Response {
    record_request("stats");
    let stats = read_logs(&state.store, |store| {
        store
            .read_all()
            .map(|records| SummaryStats::from_records(&records))
    })
    .await;

    match stats {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => internal_error("stats", err),
    }
}

async fn api_trigger(State(state): State<SharedState>) -> Json<TriggerOutcome> {
    record_request("trigger");
    let result = state.trigger.run().await;

    let outcome = match &result {
        Ok(_) => "completed",
        Err(err) => err.kind(),
    };
    metrics::counter!("speed_dashboard_trigger_total", "outcome" => outcome).increment(1);

    Json(TriggerOutcome::from_result(result))
}

async fn not_found() -> (StatusCode, &'static str) {
    record_request("not_found");
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Run a log read on the blocking pool so concurrent readers do not stall
/// the runtime.
async fn read_logs<T, F>(store: &LogStore, read: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&LogStore) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || read(&store)).await?
}

fn internal_error(route: &'static str, err: crate::Error) -> Response {
    error!(route, error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn record_request(route: &'static str) {
    metrics::counter!("speed_dashboard_requests_total", "route" => route).increment(1);
}
