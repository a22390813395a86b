//! Account Gateway
//!
//! Narrow interface to the exchange account: balance and position snapshots,
//! order submission and the streamed update feed. The live exchange client
//! and the paper account both implement [`AccountGateway`].

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::{
    AccountInfo, AccountUpdate, BalanceSnapshot, OrderResult, PositionSnapshot, Side, TimeInForce,
};

/// Errors raised by an account gateway
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Position snapshot is for {actual}, expected {expected}")]
    InstrumentMismatch { expected: String, actual: String },
}

impl GatewayError {
    /// True if the exchange declined the order (as opposed to failing to reach it)
    pub fn is_rejection(&self) -> bool {
        matches!(self, GatewayError::OrderRejected(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::InvalidResponse(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Close the full position for an instrument
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionRequest {
    pub instrument: String,
    pub leverage: u32,
    pub quantity: Decimal,
}

/// Market order sized in cash (quote currency)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOrderRequest {
    pub instrument: String,
    pub side: Side,
    pub cash_quantity: Decimal,
    pub time_in_force: TimeInForce,
    pub leverage: u32,
}

/// Exchange account operations consumed by the trading cycle
#[async_trait::async_trait]
pub trait AccountGateway: Send + Sync {
    /// Account identity for the current session
    async fn fetch_me(&self) -> Result<AccountInfo, GatewayError>;

    /// Cash available for new positions
    async fn fetch_available_balance(&self) -> Result<BalanceSnapshot, GatewayError>;

    /// Current position for `instrument`, `None` if there is none
    async fn get_position(&self, instrument: &str)
        -> Result<Option<PositionSnapshot>, GatewayError>;

    /// Submit an order closing an existing position
    async fn create_close_position_order(
        &self,
        request: ClosePositionRequest,
    ) -> Result<OrderResult, GatewayError>;

    /// Submit a market order
    async fn create_market_order(
        &self,
        request: MarketOrderRequest,
    ) -> Result<OrderResult, GatewayError>;

    /// Subscribe to order, position and balance updates
    async fn subscribe_updates(&self) -> Result<mpsc::Receiver<AccountUpdate>, GatewayError>;
}
