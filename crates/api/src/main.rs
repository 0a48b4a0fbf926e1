//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use saga::{
    DelayScan, HttpLocationDirectory, HttpLocationGateway, LocationRegistry, LoggingNotifier,
    PendingCancelRetry, ScanWindow,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the order store
    match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresOrderStore::connect(url, config.database_max_connections).await?;
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL order store");
            run(&config, store, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory");
            run(&config, InMemoryOrderStore::new(), metrics_handle).await
        }
    }
}

async fn run<S>(config: &Config, store: S, metrics_handle: PrometheusHandle) -> Result<(), BoxError>
where
    S: OrderStore + Clone + 'static,
{
    // 4. Locations
    let directory =
        HttpLocationDirectory::new(config.location_directory_url.as_str(), config.location_timeout)?;
    let registry = Arc::new(LocationRegistry::new(
        Arc::new(directory),
        config.location_refresh,
    ));
    registry.start();
    let gateway = HttpLocationGateway::new(Arc::clone(&registry), config.location_timeout)?;

    // 5. Reconciliation loops
    let shutdown = CancellationToken::new();
    let retry = PendingCancelRetry::new(store.clone(), gateway.clone());
    let scan = DelayScan::new(
        store.clone(),
        LoggingNotifier,
        ScanWindow::new(config.delay_scan_start_hour, config.delay_scan_end_hour),
    );
    let loops = [
        tokio::spawn(retry.run(config.pending_cancel_interval, shutdown.clone())),
        tokio::spawn(scan.run(config.delay_scan_interval, shutdown.clone())),
    ];

    // 6. Serve
    let state = Arc::new(api::AppState::new(store, gateway, Arc::clone(&registry)));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 7. Stop background work
    shutdown.cancel();
    for handle in loops {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "background loop ended abnormally");
        }
    }
    registry.stop().await;

    tracing::info!("server shut down gracefully");
    Ok(())
}
