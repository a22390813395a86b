//! Cycle Runner - Fixed-interval open/close trading bot
//!
//! Usage: cycle-runner <WALLET_PRIVATE_KEY> <API_KEY> [INSTRUMENT] [LEVERAGE] [INTERVAL_MS]
//!
//! Every interval the runner:
//! 1. Fetches available balance and the current position
//! 2. Closes the position if one is open, otherwise opens a market buy
//! 3. Skips the tick if the previous cycle is still running

use anyhow::Context;
use clap::Parser;
use tracing::info;

use cycle_runner::config::Cli;
use cycle_runner::lifecycle;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .init();

    info!("Starting Cycle Runner...");

    let config = cli.into_config().context("Invalid startup configuration")?;
    info!(
        "Instrument: {}, leverage: x{}, interval: {}ms",
        config.cycle.instrument, config.cycle.leverage, config.cycle.interval_ms
    );

    let stats = lifecycle::run(config, lifecycle::shutdown_signal()).await?;
    info!("Cycle Runner stopped after {} completed cycles", stats.completed);
    Ok(())
}
