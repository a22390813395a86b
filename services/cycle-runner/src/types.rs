//! Core account types
//!
//! These types define the contract between the cycle runner and the
//! exchange account gateway.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Available balance snapshot, re-fetched every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    /// Cash available for new positions
    pub available_balance: Decimal,
}

/// Open position for one instrument, re-fetched every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSnapshot {
    /// Instrument identifier (e.g. `BTCUSDT:DEMO`)
    pub instrument: String,
    /// Position size; zero or negative means no long position
    pub quantity: Decimal,
    /// Average entry price (if reported)
    #[serde(default)]
    pub avg_price: Option<Decimal>,
    /// Leverage the position was opened with (if reported)
    #[serde(default)]
    pub leverage: Option<u32>,
}

impl PositionSnapshot {
    /// True if this snapshot represents an open long position
    pub fn is_open(&self) -> bool {
        self.quantity > Decimal::ZERO
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Time in force for market orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good till cancelled
    Gtc,
    /// Immediate or cancel
    Ioc,
    /// Fill or kill: the whole order executes immediately or not at all
    Fok,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Ioc => write!(f, "IOC"),
            TimeInForce::Fok => write!(f, "FOK"),
        }
    }
}

/// Order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

/// Result of an accepted order submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    /// Exchange order identifier
    pub order_id: String,
    /// Client order identifier we submitted with
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub instrument: String,
    pub status: OrderStatus,
    /// Executed quantity (if known at submission time)
    #[serde(default)]
    pub filled_quantity: Option<Decimal>,
}

/// Account identity returned by the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub id: String,
    #[serde(default)]
    pub wallet: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Order update pushed by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub order_id: String,
    pub instrument: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub side: Option<Side>,
    #[serde(default)]
    pub filled_quantity: Option<Decimal>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Balance update pushed by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceUpdate {
    pub available_balance: Decimal,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Streamed account notification
///
/// Logged for observability; never part of the decision path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "data", rename_all = "lowercase")]
pub enum AccountUpdate {
    Order(OrderUpdate),
    Position(PositionSnapshot),
    Balance(BalanceUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_is_open() {
        let mut position = PositionSnapshot {
            instrument: "BTCUSDT:DEMO".to_string(),
            quantity: Decimal::from(5),
            avg_price: None,
            leverage: None,
        };
        assert!(position.is_open());

        position.quantity = Decimal::ZERO;
        assert!(!position.is_open());

        position.quantity = Decimal::from(-2);
        assert!(!position.is_open());
    }

    #[test]
    fn test_balance_accepts_string_amounts() {
        let balance: BalanceSnapshot =
            serde_json::from_str(r#"{"availableBalance":"1000.50"}"#).unwrap();
        assert_eq!(
            balance.available_balance,
            Decimal::from_str_exact("1000.50").unwrap()
        );
    }

    #[test]
    fn test_account_update_tagging() {
        let json = r#"{"channel":"position","data":{"instrument":"BTCUSDT:DEMO","quantity":"0.5"}}"#;
        let update: AccountUpdate = serde_json::from_str(json).unwrap();
        match update {
            AccountUpdate::Position(p) => {
                assert_eq!(p.instrument, "BTCUSDT:DEMO");
                assert!(p.is_open());
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }
}
