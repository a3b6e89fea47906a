use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use speed_dashboard::{
    log_store::LogStore,
    server::{self, AppState},
    settings::{AppArgs, Command, Settings},
    stats::SummaryStats,
    trigger::{ScriptTrigger, Trigger, TriggerOutcome},
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppArgs::parse();
    let settings = Settings::new(&args)?;
    init_logging(&settings.log_level);

    if let Some(addr) = settings.metrics_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!(%addr, "prometheus exporter listening");
    }
    export_build_info();

    let store = LogStore::from(&settings.logs);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!(
                addr = %settings.server.addr(),
                log_dir = %settings.logs.dir.display(),
                pattern = %settings.logs.pattern,
                "Speed Dashboard starting"
            );

            let trigger: Arc<dyn Trigger> =
                Arc::new(ScriptTrigger::from_settings(&settings.trigger, store.clone()));
            let state = Arc::new(AppState::new(store, trigger, settings.server.port));

            server::serve(settings.server.addr(), state, shutdown_listener()).await?;
            info!("Speed Dashboard shutting down");
        }
        Command::Stats => {
            let records = store.read_all()?;
            let stats = SummaryStats::from_records(&records);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Trigger => {
            let trigger = ScriptTrigger::from_settings(&settings.trigger, store);
            let outcome = TriggerOutcome::from_result(trigger.run().await);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.is_completed() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn init_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();
}

fn shutdown_listener() -> CancellationToken {
    let cancellation_token = CancellationToken::new();
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            match shutdown_signal().await {
                Ok(()) => {
                    info!("shutdown signal received");
                    cancellation_token.cancel();
                }
                Err(err) => error!(?err, "failed to listen for shutdown signals"),
            }
        }
    });

    cancellation_token
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => Ok(()),
        result = signal::ctrl_c() => result,
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    signal::ctrl_c().await
}

fn export_build_info() {
    let version = option_env!("BUILD_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    let build_commit = option_env!("BUILD_COMMIT").unwrap_or("UNKNOWN");
    let pkg_version = env!("CARGO_PKG_VERSION");

    metrics::gauge!(
        "speed_dashboard_build_info",
        "version" => version,
        "commit" => build_commit,
        "pkg_version" => pkg_version
    )
    .set(1);
}
