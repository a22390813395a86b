//! Process lifecycle
//!
//! Session setup, update logging, scheduler start and graceful stop.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::client::ExchangeClient;
use crate::config::{AppConfig, CycleConfig, RunnerSettings, TradingMode};
use crate::gateway::AccountGateway;
use crate::paper::PaperGateway;
use crate::scheduler::{CycleScheduler, CycleStatsSnapshot};
use crate::types::AccountUpdate;

/// Build the gateway selected by the trading mode
pub fn build_gateway(config: &AppConfig) -> anyhow::Result<Arc<dyn AccountGateway>> {
    match config.settings.trading_mode {
        TradingMode::Paper => {
            info!("📝 Running in PAPER TRADING mode");
            Ok(Arc::new(PaperGateway::new(&config.settings.paper)))
        }
        TradingMode::Live => {
            warn!(
                "💰 Running in LIVE TRADING mode against {}",
                config.settings.exchange_url
            );
            let client = ExchangeClient::new(&config.settings, config.credentials.clone())
                .context("Failed to create exchange client")?;
            Ok(Arc::new(client))
        }
    }
}

/// Run until `shutdown` resolves
pub async fn run<F>(config: AppConfig, shutdown: F) -> anyhow::Result<CycleStatsSnapshot>
where
    F: Future<Output = ()>,
{
    info!(
        "Using wallet {} (mode {:?})",
        config.credentials.wallet_fingerprint(),
        config.settings.trading_mode
    );
    let gateway = build_gateway(&config)?;
    run_with_gateway(gateway, config.cycle, &config.settings, shutdown).await
}

/// Start the session on `gateway`, drive cycles, and stop on `shutdown`.
///
/// Session failures abort before the first cycle. After shutdown no new
/// cycle starts; an in-flight one gets the configured grace period.
pub async fn run_with_gateway<F>(
    gateway: Arc<dyn AccountGateway>,
    cycle: CycleConfig,
    settings: &RunnerSettings,
    shutdown: F,
) -> anyhow::Result<CycleStatsSnapshot>
where
    F: Future<Output = ()>,
{
    info!("Establishing exchange session...");
    let me = gateway
        .fetch_me()
        .await
        .context("Failed to fetch account info")?;
    info!("Bot data: {:?}", me);

    let updates = gateway
        .subscribe_updates()
        .await
        .context("Failed to subscribe to account updates")?;
    let update_logger = tokio::spawn(log_updates(updates));

    let scheduler = CycleScheduler::new(gateway, cycle).with_shutdown_grace(settings.shutdown_grace());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::pin!(shutdown);

    let stats = tokio::select! {
        _ = &mut shutdown => {
            info!("Shutdown signal received. Exiting...");
            if shutdown_tx.send(true).is_err() {
                debug!("Scheduler already stopped");
            }
            scheduler_task.await.context("Scheduler task failed")?
        }
        result = &mut scheduler_task => {
            warn!("Scheduler stopped without a shutdown signal");
            result.context("Scheduler task failed")?
        }
    };

    update_logger.abort();

    info!(
        "Cycle stats: {} started, {} completed, {} skipped, {} failed",
        stats.started, stats.completed, stats.skipped, stats.failed
    );
    Ok(stats)
}

async fn log_updates(mut updates: mpsc::Receiver<AccountUpdate>) {
    while let Some(update) = updates.recv().await {
        match update {
            AccountUpdate::Order(order) => info!("Order update: {:?}", order),
            AccountUpdate::Position(position) => info!("Position update: {:?}", position),
            AccountUpdate::Balance(balance) => info!("Balance update: {:?}", balance),
        }
    }
    debug!("Account update stream ended");
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
