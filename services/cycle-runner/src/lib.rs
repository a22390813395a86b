//! Cycle Runner Library
//!
//! Fixed-interval trading cycle for a single derivatives instrument: poll the
//! account, close an open position or open a new one, never overlap cycles.

pub mod client;
pub mod config;
pub mod evaluator;
pub mod gateway;
pub mod guard;
pub mod intent;
pub mod lifecycle;
pub mod paper;
pub mod scheduler;
pub mod stream;
pub mod types;


// Re-export main types for convenience
pub use client::ExchangeClient;
pub use config::{AppConfig, Cli, ConfigurationError, CycleConfig, RunnerSettings, TradingMode};
pub use gateway::{AccountGateway, ClosePositionRequest, GatewayError, MarketOrderRequest};
pub use guard::{CycleGuard, CyclePermit};
pub use intent::OrderIntent;
pub use paper::PaperGateway;
pub use scheduler::{CycleError, CycleOutcome, CycleScheduler, CycleState, CycleStatsSnapshot};
pub use types::{AccountUpdate, BalanceSnapshot, OrderResult, PositionSnapshot, Side, TimeInForce};
