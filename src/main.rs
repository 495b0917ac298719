use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use courtbook::accounts::InMemoryAccounts;
use courtbook::catalog::InMemoryCatalog;
use courtbook::clock::{Clock, SystemClock};
use courtbook::config::Config;
use courtbook::http::{self, AppState};
use courtbook::manager::{DEFAULT_HOLD_TTL_MS, ReservationManager};
use courtbook::store::ReservationStore;
use courtbook::sweeper;

const COMPACT_CHECK_PERIOD: Duration = Duration::from_secs(30);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    courtbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let catalog = Arc::new(InMemoryCatalog::load(config.catalog_path.as_deref())?);
    let accounts = Arc::new(InMemoryAccounts::load(config.accounts_path.as_deref())?);
    let store = Arc::new(ReservationStore::open(config.wal_path())?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let manager = Arc::new(
        ReservationManager::new(store.clone(), catalog.clone(), catalog, clock.clone())
            .with_hold_ttl(i64::try_from(config.hold_ttl.as_millis()).unwrap_or(DEFAULT_HOLD_TTL_MS)),
    );

    let shutdown = CancellationToken::new();
    let sweeper_task = tokio::spawn(sweeper::run_sweeper(
        store.clone(),
        clock,
        config.sweep_interval,
        shutdown.clone(),
    ));
    let compactor_task = tokio::spawn(sweeper::run_compactor(
        store.clone(),
        config.compact_threshold,
        COMPACT_CHECK_PERIOD,
        shutdown.clone(),
    ));

    let app = http::router(AppState { manager, accounts }, config.max_connections);
    let listener = TcpListener::bind(config.addr()).await?;
    info!("courtbook listening on {}", config.addr());
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {}", config.max_connections);
    info!("  hold_ttl: {}s, sweep every {}s", config.hold_ttl.as_secs(), config.sweep_interval.as_secs());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("shutdown signal received, draining requests");
            signal_token.cancel();
        })
        .await?;

    // Background tasks finish their current batch, then stop.
    shutdown.cancel();
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        let _ = sweeper_task.await;
        let _ = compactor_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!("background tasks did not stop within {}s", DRAIN_TIMEOUT.as_secs());
    }

    info!("courtbook stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
