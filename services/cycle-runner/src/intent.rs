//! Order intents produced by the position evaluator

use rust_decimal::Decimal;

use crate::types::{Side, TimeInForce};

/// The single order a trading cycle submits
#[derive(Debug, Clone, PartialEq)]
pub enum OrderIntent {
    /// Close the full existing position
    ClosePosition {
        instrument: String,
        leverage: u32,
        quantity: Decimal,
    },
    /// Open a new position with a cash-sized market order
    OpenMarketPosition {
        instrument: String,
        side: Side,
        leverage: u32,
        cash_quantity: Decimal,
        time_in_force: TimeInForce,
    },
}

impl OrderIntent {
    pub fn instrument(&self) -> &str {
        match self {
            OrderIntent::ClosePosition { instrument, .. }
            | OrderIntent::OpenMarketPosition { instrument, .. } => instrument,
        }
    }

    /// Short label for logs and events
    pub fn kind(&self) -> &'static str {
        match self {
            OrderIntent::ClosePosition { .. } => "close_position",
            OrderIntent::OpenMarketPosition { .. } => "open_market_position",
        }
    }
}

impl std::fmt::Display for OrderIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderIntent::ClosePosition {
                instrument,
                leverage,
                quantity,
            } => write!(f, "close {} {} (x{})", quantity, instrument, leverage),
            OrderIntent::OpenMarketPosition {
                instrument,
                side,
                leverage,
                cash_quantity,
                time_in_force,
            } => write!(
                f,
                "{} {} for {} cash (x{}, {})",
                side, instrument, cash_quantity, leverage, time_in_force
            ),
        }
    }
}
