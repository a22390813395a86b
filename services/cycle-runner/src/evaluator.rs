//! Position Evaluator
//!
//! Maps the polled position and balance to the one order a cycle submits.

use rust_decimal::Decimal;

use crate::config::CycleConfig;
use crate::intent::OrderIntent;
use crate::types::{BalanceSnapshot, PositionSnapshot, Side, TimeInForce};

/// Share of available balance committed to a new position
const OPEN_BALANCE_PERCENT: u32 = 90;

/// Decide the cycle's order
///
/// An open position (quantity > 0) is closed in full; otherwise a long
/// market position is opened with 90% of available balance, fill-or-kill.
pub fn evaluate(
    position: Option<&PositionSnapshot>,
    balance: &BalanceSnapshot,
    config: &CycleConfig,
) -> OrderIntent {
    match position {
        Some(position) if position.is_open() => OrderIntent::ClosePosition {
            instrument: config.instrument.clone(),
            leverage: config.leverage,
            quantity: position.quantity,
        },
        _ => OrderIntent::OpenMarketPosition {
            instrument: config.instrument.clone(),
            side: Side::Buy,
            leverage: config.leverage,
            cash_quantity: open_cash_quantity(balance.available_balance),
            time_in_force: TimeInForce::Fok,
        },
    }
}

/// Cash to commit when opening, never negative
pub fn open_cash_quantity(available_balance: Decimal) -> Decimal {
    let available = available_balance.max(Decimal::ZERO);
    let share = Decimal::new(i64::from(OPEN_BALANCE_PERCENT), 2);
    (available * share).normalize()
}
