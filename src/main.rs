use std::sync::Arc;
use std::time::Instant;

use judge::{
    batch::BatchRunner,
    config::AppConfig,
    judge::Judge,
    router, system_monitor,
    types::AppState,
    workspace,
};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!("failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}

fn describe_metrics() {
    describe_counter!("requests_total", "Total number of job requests by endpoint");
    describe_counter!("executions_total", "Total number of finished jobs by outcome");
    describe_histogram!(
        "execution_time_ms",
        "Compile plus run wall time of a job in milliseconds"
    );
    describe_gauge!("active_jobs", "Number of jobs currently executing");
    describe_gauge!("system_memory_used_bytes", "Used system memory in bytes");
    describe_gauge!("system_memory_total_bytes", "Total system memory in bytes");
    describe_gauge!("system_cpu_usage_percent", "System CPU usage in percent");
    describe_gauge!(
        "workspace_disk_free_bytes",
        "Free space on the disk holding job workspaces"
    );
    describe_gauge!(
        "workspace_disk_total_bytes",
        "Size of the disk holding job workspaces"
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app_config = AppConfig::load()?;

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    match workspace::purge_stale(&app_config.workspace_root) {
        Ok(0) => {}
        Ok(n) => tracing::warn!("removed {} stale workspaces from a previous run", n),
        Err(e) => tracing::warn!("could not scan workspace root: {}", e),
    }

    let judge = Arc::new(Judge::new(&app_config)?);
    let batch = Arc::new(BatchRunner::new(judge.clone(), &app_config));

    system_monitor::start_system_monitor(
        app_config.workspace_root.clone(),
        judge.registry().clone(),
    );

    if app_config.api_key().is_none() {
        tracing::warn!("no api_key configured, job endpoints are unauthenticated");
    }

    let app = router(AppState {
        judge: judge.clone(),
        batch,
        api_key: app_config.api_key(),
        started_at: Instant::now(),
        prometheus_handle: Some(handle),
    });

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", app_config.host, app_config.port)).await?;

    tracing::info!(
        sandbox = judge.sandbox_name(),
        workspace_root = %app_config.workspace_root.display(),
        "listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let swept = judge.shutdown();
    if swept > 0 {
        tracing::warn!("cleaned up {} unfinished jobs on shutdown", swept);
    }

    Ok(())
}
