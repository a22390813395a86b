//! Trading Cycle Scheduler - Main orchestration loop
//!
//! A fixed-interval timer admits at most one cycle at a time through the
//! [`CycleGuard`]. Each admitted cycle runs as its own task:
//!
//! 1. Fetching: balance and position (awaited: both gateway calls)
//! 2. Deciding: position evaluator
//! 3. Submitting: exactly one order (awaited: gateway call)
//! 4. Done / Failed: guard released
//!
//! Ticks that arrive while a cycle is in flight are skipped, never queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::CycleConfig;
use crate::evaluator::evaluate;
use crate::gateway::{AccountGateway, ClosePositionRequest, GatewayError, MarketOrderRequest};
use crate::guard::{CycleGuard, CyclePermit};
use crate::intent::OrderIntent;
use crate::types::OrderResult;

/// Default wait for an in-flight cycle at shutdown
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Trading cycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    /// Waiting for the next tick
    Idle,
    /// Polling balance and position
    Fetching,
    /// Running the position evaluator
    Deciding,
    /// Submitting the order
    Submitting,
    Done,
    Skipped,
    Failed,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleState::Idle => write!(f, "idle"),
            CycleState::Fetching => write!(f, "fetching"),
            CycleState::Deciding => write!(f, "deciding"),
            CycleState::Submitting => write!(f, "submitting"),
            CycleState::Done => write!(f, "done"),
            CycleState::Skipped => write!(f, "skipped"),
            CycleState::Failed => write!(f, "failed"),
        }
    }
}

/// A cycle failure, caught at the cycle boundary
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Trading cycle failed while {stage}: {source}")]
pub struct CycleError {
    pub stage: CycleState,
    #[source]
    pub source: GatewayError,
}

impl CycleError {
    fn new(stage: CycleState, source: GatewayError) -> Self {
        Self { stage, source }
    }
}

/// Result of one admission attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The cycle ran and submitted exactly one order
    Completed {
        intent: OrderIntent,
        order: OrderResult,
    },
    /// Another cycle held the guard; nothing was done
    Skipped,
}

/// Process-lifetime cycle counters
#[derive(Debug, Default)]
pub struct CycleStats {
    started: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleStatsSnapshot {
    pub started: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl CycleStats {
    pub fn snapshot(&self) -> CycleStatsSnapshot {
        CycleStatsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Drives the fixed-interval trading cycle for one instrument
#[derive(Clone)]
pub struct CycleScheduler {
    gateway: Arc<dyn AccountGateway>,
    config: Arc<CycleConfig>,
    guard: Arc<CycleGuard>,
    stats: Arc<CycleStats>,
    shutdown_grace: Duration,
}

impl CycleScheduler {
    pub fn new(gateway: Arc<dyn AccountGateway>, config: CycleConfig) -> Self {
        Self {
            gateway,
            config: Arc::new(config),
            guard: CycleGuard::new(),
            stats: Arc::new(CycleStats::default()),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// How long `run` waits for an in-flight cycle after shutdown
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn guard(&self) -> &Arc<CycleGuard> {
        &self.guard
    }

    pub fn stats(&self) -> CycleStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run the timer until `shutdown` flips to true (or its sender is dropped).
    ///
    /// The first cycle fires one interval after start. An in-flight cycle is
    /// awaited up to the shutdown grace period, never aborted.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> CycleStatsSnapshot {
        let period = self.config.interval();
        info!(
            "Trading cycle scheduler started: {} every {:?} (x{})",
            self.config.instrument, period, self.config.leverage
        );

        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = timer.tick() => {
                    match self.guard.try_enter() {
                        Some(permit) => {
                            let cycle = self.clone();
                            in_flight = Some(tokio::spawn(async move {
                                // Outcome and failure are logged inside execute
                                let _ = cycle.execute(permit).await;
                            }));
                        }
                        None => self.record_skip(),
                    }
                }
            }
        }

        info!("Trading cycle timer stopped");

        if let Some(handle) = in_flight.take() {
            if !handle.is_finished() {
                info!(
                    "Waiting up to {:?} for the in-flight cycle to finish",
                    self.shutdown_grace
                );
                match tokio::time::timeout(self.shutdown_grace, handle).await {
                    Ok(Ok(())) => info!("In-flight cycle finished"),
                    Ok(Err(e)) => error!("In-flight cycle task failed: {}", e),
                    Err(_) => warn!(
                        "In-flight cycle still running after {:?}, exiting without it",
                        self.shutdown_grace
                    ),
                }
            }
        }

        self.stats()
    }

    /// Attempt one cycle immediately, subject to the guard
    pub async fn run_once(&self) -> Result<CycleOutcome, CycleError> {
        match self.guard.try_enter() {
            Some(permit) => self.execute(permit).await,
            None => {
                self.record_skip();
                Ok(CycleOutcome::Skipped)
            }
        }
    }

    fn record_skip(&self) {
        let skipped = self.stats.skipped.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "Previous trading cycle is still in process, skipping this cycle ({} skipped so far)",
            skipped
        );
        debug!("Tick -> {}", CycleState::Skipped);
    }

    /// Run the cycle body while holding the permit, then release it
    async fn execute(&self, permit: CyclePermit) -> Result<CycleOutcome, CycleError> {
        let cycle = self.stats.started.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();

        let result = self.cycle_body(cycle).await;

        let outcome = match result {
            Ok((intent, order)) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                debug!("Cycle #{} -> {}", cycle, CycleState::Done);
                info!(
                    "Cycle #{} done in {:?}: {} {} -> order {} ({:?})",
                    cycle,
                    started.elapsed(),
                    intent.kind(),
                    intent.instrument(),
                    order.order_id,
                    order.status
                );
                Ok(CycleOutcome::Completed { intent, order })
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                debug!("Cycle #{} -> {}", cycle, CycleState::Failed);
                if e.source.is_rejection() {
                    warn!("Cycle #{} order rejected while {}: {}", cycle, e.stage, e.source);
                } else {
                    error!("Cycle #{} failed while {}: {}", cycle, e.stage, e.source);
                }
                Err(e)
            }
        };

        permit.leave();
        debug!("Cycle #{} -> {}", cycle, CycleState::Idle);
        outcome
    }

    async fn cycle_body(&self, cycle: u64) -> Result<(OrderIntent, OrderResult), CycleError> {
        let instrument = self.config.instrument.as_str();

        debug!("Cycle #{} -> {}", cycle, CycleState::Fetching);
        let (balance, position) = tokio::join!(
            self.gateway.fetch_available_balance(),
            self.gateway.get_position(instrument),
        );
        let balance = balance.map_err(|e| CycleError::new(CycleState::Fetching, e))?;
        let position = position.map_err(|e| CycleError::new(CycleState::Fetching, e))?;

        info!("Available balance is: {}", balance.available_balance);
        match &position {
            Some(p) => info!(
                "Current position for {}: {} (avg price {:?})",
                instrument, p.quantity, p.avg_price
            ),
            None => info!("Current position for {}: none", instrument),
        }

        if let Some(p) = &position {
            if p.instrument != instrument {
                return Err(CycleError::new(
                    CycleState::Fetching,
                    GatewayError::InstrumentMismatch {
                        expected: instrument.to_string(),
                        actual: p.instrument.clone(),
                    },
                ));
            }
        }

        debug!("Cycle #{} -> {}", cycle, CycleState::Deciding);
        let intent = evaluate(position.as_ref(), &balance, &self.config);
        info!("Cycle #{} decision: {}", cycle, intent);

        debug!("Cycle #{} -> {}", cycle, CycleState::Submitting);
        let submitted = match &intent {
            OrderIntent::ClosePosition {
                instrument,
                leverage,
                quantity,
            } => {
                info!("Position for {} exists, closing it...", instrument);
                self.gateway
                    .create_close_position_order(ClosePositionRequest {
                        instrument: instrument.clone(),
                        leverage: *leverage,
                        quantity: *quantity,
                    })
                    .await
            }
            OrderIntent::OpenMarketPosition {
                instrument,
                side,
                leverage,
                cash_quantity,
                time_in_force,
            } => {
                info!(
                    "No position for {}, opening {} market order for {} cash",
                    instrument, side, cash_quantity
                );
                self.gateway
                    .create_market_order(MarketOrderRequest {
                        instrument: instrument.clone(),
                        side: *side,
                        cash_quantity: *cash_quantity,
                        time_in_force: *time_in_force,
                        leverage: *leverage,
                    })
                    .await
            }
        };
        let order = submitted.map_err(|e| CycleError::new(CycleState::Submitting, e))?;

        Ok((intent, order))
    }
}
