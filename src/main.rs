//! Ledger Gateway - transaction submission service for an EVM node
//!
//! Accepts transaction intents over HTTP, assigns nonces, signs with the
//! managed key, submits to the node and tracks receipts.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod account;
mod api;
mod chain;
mod config;
mod error;
mod metrics;
mod tx;

#[cfg(test)]
mod test_utils;

use account::AccountContext;
use chain::{redact_endpoint, EthersConnector, NodeConnection, ReconnectPolicy};
use config::Settings;
use metrics::MetricsServer;
use tx::{GasEstimator, NonceSequencer, ReceiptPolicy, SubmissionPolicy, TransactionManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Ledger Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    // Connect to the node and wait until it is healthy
    let connector = Arc::new(EthersConnector::new(settings.node.url.clone())?);
    info!(
        "Using {:?} node endpoint {}",
        connector.transport(),
        redact_endpoint(&settings.node.url)
    );
    let policy = ReconnectPolicy {
        interval: settings.node.reconnect_interval(),
        reacquire_delay: settings.node.reacquire_delay(),
        max_attempts: settings.node.max_reconnect_attempts,
    };
    let connection = Arc::new(NodeConnection::open(connector, policy).await);
    connection.acquire().await?;
    info!("Node connection established");

    // Account first, then the nonce seeded for it
    let account = Arc::new(
        AccountContext::resolve(&connection, settings.wallet.private_key()).await?,
    );
    let nonces = Arc::new(NonceSequencer::new());
    nonces.initialize(&connection, account.address()).await?;

    let manager = Arc::new(TransactionManager::new(
        connection.clone(),
        account,
        nonces,
        GasEstimator::new(&settings.gas),
        SubmissionPolicy {
            max_conflict_retries: settings.submission.max_conflict_retries,
        },
        ReceiptPolicy {
            max_tries: settings.receipts.max_tries,
            interval: std::time::Duration::from_secs(settings.receipts.interval_secs),
        },
    ));
    info!("Transaction manager initialized");

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = api::AppState {
            manager: manager.clone(),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let connection = connection.clone();
        let interval = settings.submission.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                if connection.probe().await {
                    metrics::record_health_check();
                } else {
                    warn!("Node health check failed for {}", connection.endpoint());
                    metrics::record_health_check_failure();
                    if let Err(e) = connection.reconnect().await {
                        error!("Reconnect from health check failed: {}", e);
                    }
                }
            }
        }
    });

    info!("Ledger Gateway is running");
    info!(
        "API server: http://{}:{}{}",
        settings.api.host, settings.api.port, settings.api.root_path
    );
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Ledger Gateway stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ledger_gateway=debug,hyper=warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
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
