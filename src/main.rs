//! arb-scanner — real-time cryptocurrency arbitrage scanner.
//!
//! Wires the three core subsystems together: the Ingestion Supervisor
//! launches venue adapters that feed the Freshness Cache; the Publisher
//! ticks the Spatial and Cyclic Finders against that cache and the
//! Commission Table; a thin Axum layer exposes both the pull and push
//! surfaces over that engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arb_scanner::cache::FreshnessCache;
use arb_scanner::commission::CommissionTable;
use arb_scanner::config::ScannerConfig;
use arb_scanner::publisher::Publisher;
use arb_scanner::supervisor::IngestionSupervisor;
use arb_scanner::types::VenueId;
use arb_scanner::{api, AppState};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ScannerConfig::from_env().context("invalid configuration; aborting startup")?;
    info!(exchanges = ?config.exchanges, min_profit_percent = %config.min_profit_percent, "starting arb-scanner");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install the Prometheus metrics recorder")?;

    let cache = Arc::new(FreshnessCache::new(config.cache_ttl));
    let commissions = Arc::new(CommissionTable::load_from_dir(&config.commissions_dir));

    let venues: Vec<VenueId> = config.exchanges.iter().map(|v| VenueId::new(v.as_str())).collect();

    let supervisor =
        Arc::new(IngestionSupervisor::new(cache.clone(), commissions.clone(), config.exchanges.clone()));
    supervisor.start().await;

    let publisher = Arc::new(Publisher::new(
        commissions.clone(),
        cache.clone(),
        venues,
        config.min_profit_percent,
        config.publisher_period,
    ));

    let publisher_cancel = CancellationToken::new();
    let publisher_task = {
        let publisher = publisher.clone();
        let cancel = publisher_cancel.clone();
        tokio::spawn(async move { publisher.run_loop(cancel).await })
    };

    let state = AppState { publisher: publisher.clone(), metrics_handle };
    let app = api::routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.http_bind_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.http_bind_addr))?;
    info!(addr = %config.http_bind_addr, "HTTP adapter listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("shutting down: stopping publisher and ingestion supervisor");
    publisher_cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(15), publisher_task).await.is_err() {
        error!("publisher task did not stop within the shutdown grace period");
    }
    supervisor.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
