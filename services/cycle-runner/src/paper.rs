//! Paper trading account
//!
//! In-memory [`AccountGateway`] that simulates fills against a random-walk
//! mark price. Used in paper mode and by tests.

use std::collections::HashMap;

use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::config::PaperSettings;
use crate::gateway::{AccountGateway, ClosePositionRequest, GatewayError, MarketOrderRequest};
use crate::types::{
    AccountInfo, AccountUpdate, BalanceSnapshot, BalanceUpdate, OrderResult, OrderStatus,
    OrderUpdate, PositionSnapshot, Side,
};

/// Decimal places kept on simulated position sizes
const QUANTITY_DP: u32 = 8;

/// Buffered updates per subscriber
const UPDATE_BUFFER: usize = 256;

#[derive(Debug, Clone)]
struct PaperPosition {
    quantity: Decimal,
    entry_price: Decimal,
    margin: Decimal,
    leverage: u32,
}

#[derive(Debug)]
struct PaperAccount {
    available_balance: Decimal,
    positions: HashMap<String, PaperPosition>,
    mark_price: Decimal,
    volatility_pct: f64,
    order_seq: u64,
}

impl PaperAccount {
    /// Move the mark price by up to `volatility_pct` in either direction
    fn drift(&mut self) {
        if self.volatility_pct <= 0.0 {
            return;
        }
        let pct = rand::thread_rng().gen_range(-self.volatility_pct..=self.volatility_pct);
        if let Some(factor) = Decimal::from_f64(1.0 + pct / 100.0) {
            let next = (self.mark_price * factor).round_dp(2);
            if next > Decimal::ZERO {
                self.mark_price = next;
            }
        }
    }

    fn next_order_id(&mut self) -> String {
        self.order_seq += 1;
        format!("paper-{}", self.order_seq)
    }

    fn snapshot(&self, instrument: &str) -> Option<PositionSnapshot> {
        self.positions.get(instrument).map(|p| PositionSnapshot {
            instrument: instrument.to_string(),
            quantity: p.quantity,
            avg_price: Some(p.entry_price),
            leverage: Some(p.leverage),
        })
    }
}

/// Simulated exchange account
pub struct PaperGateway {
    account: Mutex<PaperAccount>,
    subscribers: Mutex<Vec<mpsc::Sender<AccountUpdate>>>,
}

impl PaperGateway {
    pub fn new(settings: &PaperSettings) -> Self {
        info!(
            "Paper account: balance={}, mark price={}, volatility={}%",
            settings.starting_balance, settings.mark_price, settings.volatility_pct
        );
        Self {
            account: Mutex::new(PaperAccount {
                available_balance: settings.starting_balance,
                positions: HashMap::new(),
                mark_price: settings.mark_price,
                volatility_pct: settings.volatility_pct,
                order_seq: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Override the simulated mark price
    pub async fn set_mark_price(&self, price: Decimal) {
        self.account.lock().await.mark_price = price;
    }

    pub async fn mark_price(&self) -> Decimal {
        self.account.lock().await.mark_price
    }

    async fn emit(&self, updates: Vec<AccountUpdate>) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| !tx.is_closed());
        for update in updates {
            for tx in subscribers.iter() {
                if tx.try_send(update.clone()).is_err() {
                    debug!("Paper update dropped for a slow subscriber");
                }
            }
        }
    }

    fn fill_updates(
        order_id: &str,
        instrument: &str,
        side: Side,
        filled: Decimal,
        position: PositionSnapshot,
        available_balance: Decimal,
    ) -> Vec<AccountUpdate> {
        let now = chrono::Utc::now();
        vec![
            AccountUpdate::Order(OrderUpdate {
                order_id: order_id.to_string(),
                instrument: instrument.to_string(),
                status: OrderStatus::Filled,
                side: Some(side),
                filled_quantity: Some(filled),
                updated_at: Some(now),
            }),
            AccountUpdate::Position(position),
            AccountUpdate::Balance(BalanceUpdate {
                available_balance,
                updated_at: Some(now),
            }),
        ]
    }
}

#[async_trait::async_trait]
impl AccountGateway for PaperGateway {
    async fn fetch_me(&self) -> Result<AccountInfo, GatewayError> {
        Ok(AccountInfo {
            id: "paper".to_string(),
            wallet: None,
            name: Some("Paper account".to_string()),
        })
    }

    async fn fetch_available_balance(&self) -> Result<BalanceSnapshot, GatewayError> {
        let account = self.account.lock().await;
        Ok(BalanceSnapshot {
            available_balance: account.available_balance,
        })
    }

    async fn get_position(
        &self,
        instrument: &str,
    ) -> Result<Option<PositionSnapshot>, GatewayError> {
        let mut account = self.account.lock().await;
        account.drift();
        Ok(account.snapshot(instrument))
    }

    async fn create_close_position_order(
        &self,
        request: ClosePositionRequest,
    ) -> Result<OrderResult, GatewayError> {
        let (order_id, updates) = {
            let mut account = self.account.lock().await;

            let position = account
                .positions
                .get(&request.instrument)
                .cloned()
                .ok_or_else(|| {
                    GatewayError::OrderRejected(format!(
                        "No open position for {}",
                        request.instrument
                    ))
                })?;

            if position.quantity != request.quantity {
                return Err(GatewayError::OrderRejected(format!(
                    "Close quantity {} does not match position {}",
                    request.quantity, position.quantity
                )));
            }

            let pnl = (account.mark_price - position.entry_price) * position.quantity;
            account.positions.remove(&request.instrument);
            account.available_balance += position.margin + pnl;

            let order_id = account.next_order_id();
            info!(
                "Paper close {} {} at {} | Realized PnL: {}",
                position.quantity, request.instrument, account.mark_price, pnl
            );

            let closed = PositionSnapshot {
                instrument: request.instrument.clone(),
                quantity: Decimal::ZERO,
                avg_price: None,
                leverage: Some(request.leverage),
            };
            let updates = Self::fill_updates(
                &order_id,
                &request.instrument,
                Side::Sell,
                position.quantity,
                closed,
                account.available_balance,
            );
            (order_id, updates)
        };

        self.emit(updates).await;

        Ok(OrderResult {
            order_id,
            client_order_id: None,
            instrument: request.instrument,
            status: OrderStatus::Filled,
            filled_quantity: Some(request.quantity),
        })
    }

    async fn create_market_order(
        &self,
        request: MarketOrderRequest,
    ) -> Result<OrderResult, GatewayError> {
        if request.side != Side::Buy {
            return Err(GatewayError::OrderRejected(
                "Paper account only opens long positions".to_string(),
            ));
        }
        if request.cash_quantity <= Decimal::ZERO {
            return Err(GatewayError::OrderRejected(format!(
                "Cash quantity must be positive, got {}",
                request.cash_quantity
            )));
        }

        let (order_id, quantity, updates) = {
            let mut account = self.account.lock().await;

            // Fill-or-kill: the whole cash amount must be covered
            if request.cash_quantity > account.available_balance {
                return Err(GatewayError::OrderRejected(format!(
                    "Insufficient available balance: {} < {}",
                    account.available_balance, request.cash_quantity
                )));
            }

            let price = account.mark_price;
            let quantity = (request.cash_quantity * Decimal::from(request.leverage) / price)
                .round_dp(QUANTITY_DP);
            if quantity.is_zero() {
                return Err(GatewayError::OrderRejected(format!(
                    "Cash quantity {} too small at price {}",
                    request.cash_quantity, price
                )));
            }

            account.available_balance -= request.cash_quantity;
            let position = account
                .positions
                .entry(request.instrument.clone())
                .or_insert(PaperPosition {
                    quantity: Decimal::ZERO,
                    entry_price: price,
                    margin: Decimal::ZERO,
                    leverage: request.leverage,
                });

            let total_qty = position.quantity + quantity;
            position.entry_price =
                (position.quantity * position.entry_price + quantity * price) / total_qty;
            position.quantity = total_qty;
            position.margin += request.cash_quantity;

            let order_id = account.next_order_id();
            info!(
                "Paper buy {} {} at {} for {} cash",
                quantity, request.instrument, price, request.cash_quantity
            );

            let snapshot = account.snapshot(&request.instrument).ok_or_else(|| {
                GatewayError::InvalidResponse("Paper position vanished after fill".to_string())
            })?;
            let updates = Self::fill_updates(
                &order_id,
                &request.instrument,
                Side::Buy,
                quantity,
                snapshot,
                account.available_balance,
            );
            (order_id, quantity, updates)
        };

        self.emit(updates).await;

        Ok(OrderResult {
            order_id,
            client_order_id: None,
            instrument: request.instrument,
            status: OrderStatus::Filled,
            filled_quantity: Some(quantity),
        })
    }

    async fn subscribe_updates(&self) -> Result<mpsc::Receiver<AccountUpdate>, GatewayError> {
        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        self.subscribers.lock().await.push(tx);
        Ok(rx)
    }
}
