//! Swap Submitter service
//!
//! Serves swap submission, nonce lookups and cancellations over HTTP and
//! keeps the locally tracked transactions in sync with the chains.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use swap_submitter::api::{self, AppState};
use swap_submitter::chain::ChainManager;
use swap_submitter::config::Settings;
use swap_submitter::metrics::{self, MetricsServer};
use swap_submitter::policy::SwapProtectionPolicy;
use swap_submitter::ports::PendingTransactionStore;
use swap_submitter::state::{MemoryStore, StateManager};
use swap_submitter::tx::{
    AdjustmentFactor, CancellationPlanner, LocalWalletSigner, NonceReconciler, RpcSubmissionSink,
    SwapSequencer, TransactionWatcher,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(settings.submitter.json_logs);

    info!("Starting Swap Submitter v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Loaded configuration for {} chains (instance {})",
        settings.enabled_chains().len(),
        settings.submitter.instance_id
    );

    // Pending transaction store
    let store: Arc<dyn PendingTransactionStore> = match settings.database {
        Some(ref database) => {
            let state_manager = StateManager::new(database).await?;
            state_manager.run_migrations().await?;
            info!("Database connection established");
            Arc::new(state_manager)
        }
        None => {
            warn!("No database configured, tracked transactions are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    // Initialize chain manager (handles all chain connections)
    let chain_manager = Arc::new(ChainManager::new(&settings)?);
    info!("Chain connections initialized");

    let signer = Arc::new(LocalWalletSigner::from_env(&settings.wallet.private_key_env)?);
    let sink = Arc::new(RpcSubmissionSink::new(
        chain_manager.clone(),
        signer,
        store.clone(),
    ));

    let policy = Arc::new(SwapProtectionPolicy::from_config(
        &settings.protection,
        chain_manager.private_relay_chains(),
    ));
    let nonces = Arc::new(NonceReconciler::new(chain_manager.clone(), store.clone()));
    let sequencer = Arc::new(SwapSequencer::new(
        nonces.clone(),
        sink.clone(),
        policy.clone(),
    ));
    let factor = AdjustmentFactor::from_percent(settings.submitter.cancellation_gas_factor_percent);
    let canceller = Arc::new(CancellationPlanner::new(
        chain_manager.clone(),
        sink,
        factor,
    ));
    info!("Cancellations priced at {} of the original fee", factor);

    let watcher = Arc::new(TransactionWatcher::new(
        chain_manager.clone(),
        store.clone(),
        Duration::from_secs(settings.submitter.stale_transaction_timeout_secs),
        Duration::from_secs(settings.submitter.finalized_retention_secs),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            chain_manager: chain_manager.clone(),
            store: store.clone(),
            nonces,
            sequencer,
            canceller,
            policy,
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start transaction watcher
    let watcher_handle = tokio::spawn({
        let watcher = watcher.clone();
        let period = Duration::from_secs(settings.submitter.sweep_interval_secs);
        async move {
            if let Err(e) = watcher.run(period).await {
                error!("Transaction watcher error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        let store = store.clone();
        let interval = settings.submitter.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                let (chains, store_health) =
                    futures::join!(chain_manager.health_check(), store.health_check());

                let mut healthy = true;
                for (chain_id, ok) in chains {
                    if !ok {
                        warn!("Chain {} health check failed", chain_id);
                        healthy = false;
                    }
                }
                if let Err(e) = store_health {
                    warn!("Store health check failed: {}", e);
                    healthy = false;
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Swap Submitter is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    watcher.stop().await;

    api_handle.abort();
    watcher_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Swap Submitter stopped");
    Ok(())
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,swap_submitter=debug,sqlx=warn,hyper=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
