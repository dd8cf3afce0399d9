//! Paper exchange for dry runs and tests.
//!
//! Simulates an inverse perpetual venue: position sizes and order amounts
//! are quote-currency notionals, resting limit orders fill when the price
//! trades through them, and status strings follow the exchange-native
//! vocabulary (`open`, `filled`, `cancelled`, `rejected`). Market data can
//! optionally come from a live gateway so paper runs follow the real market.

use super::error::GatewayError;
use super::traits::{ExchangeGateway, GatewayResult, Venue};
use super::types::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Simulated position on one instrument.
#[derive(Debug, Clone, Default)]
pub struct PaperPosition {
    /// Signed quote notional (negative = short)
    pub size: Decimal,
    pub entry_price: Decimal,
}

/// Mutable venue state.
#[derive(Debug, Default)]
pub struct PaperState {
    pub balances: HashMap<String, Decimal>,
    pub price: Decimal,
    pub half_spread: Decimal,
    pub markets: HashMap<String, MarketInfo>,
    pub positions: HashMap<String, PaperPosition>,
    pub orders: HashMap<String, ExchangeOrder>,
}

impl PaperState {
    /// Fill every resting order the current price has traded through.
    fn match_orders(&mut self) {
        let price = self.price;
        if price <= Decimal::ZERO {
            return;
        }

        let mut fills = Vec::new();
        for order in self.orders.values_mut() {
            if order.status != "open" {
                continue;
            }
            let crossed = match order.side {
                OrderSide::Sell => price >= order.price,
                OrderSide::Buy => price <= order.price,
            };
            if crossed {
                order.status = "filled".to_string();
                order.filled = order.amount;
                order.average_price = Some(order.price);
                fills.push(order.clone());
            }
        }

        for order in fills {
            debug!(order_id = %order.id, side = %order.side, price = %order.price, "Paper fill");
            let position = self.positions.entry(order.instrument.clone()).or_default();
            let delta = match order.side {
                OrderSide::Sell => -order.amount,
                OrderSide::Buy => order.amount,
            };
            let grows = position.size.is_zero() || position.size.is_sign_negative() == delta.is_sign_negative();
            if grows {
                let total = position.size.abs() + delta.abs();
                position.entry_price = (position.entry_price * position.size.abs()
                    + order.price * delta.abs())
                    / total;
            }
            position.size += delta;
            if position.size.is_zero() {
                position.entry_price = Decimal::ZERO;
            }
        }
    }

    fn best_bid(&self) -> Decimal {
        self.price - self.half_spread
    }

    fn best_ask(&self) -> Decimal {
        self.price + self.half_spread
    }
}

/// In-memory exchange implementing [`ExchangeGateway`].
pub struct PaperExchange {
    state: Arc<RwLock<PaperState>>,
    order_id_counter: AtomicU64,
    feed: Option<Arc<dyn ExchangeGateway>>,
    failures: Mutex<HashMap<&'static str, VecDeque<GatewayError>>>,
}

impl PaperExchange {
    /// Create a paper venue holding `balance` of `asset`.
    pub fn new(asset: &str, balance: Decimal) -> Self {
        let mut state = PaperState {
            half_spread: dec!(0.5),
            ..PaperState::default()
        };
        state.balances.insert(asset.to_ascii_uppercase(), balance);

        Self {
            state: Arc::new(RwLock::new(state)),
            order_id_counter: AtomicU64::new(1),
            feed: None,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_price(self, price: Decimal) -> Self {
        if let Ok(mut state) = self.state.try_write() {
            state.price = price;
        }
        self
    }

    pub fn with_market(self, instrument: &str, market: MarketInfo) -> Self {
        if let Ok(mut state) = self.state.try_write() {
            state.markets.insert(instrument.to_string(), market);
        }
        self
    }

    /// Take ticker, book and market metadata from another gateway.
    pub fn with_market_feed(mut self, feed: Arc<dyn ExchangeGateway>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Move the market; resting orders the price trades through are filled.
    pub async fn set_price(&self, price: Decimal) {
        let mut state = self.state.write().await;
        state.price = price;
        state.match_orders();
    }

    pub async fn set_position(&self, instrument: &str, size: Decimal, entry_price: Decimal) {
        let mut state = self.state.write().await;
        state
            .positions
            .insert(instrument.to_string(), PaperPosition { size, entry_price });
    }

    /// Overwrite an order's native status, e.g. to simulate an external cancel.
    pub async fn set_order_status(&self, order_id: &str, status: &str) {
        let mut state = self.state.write().await;
        if let Some(order) = state.orders.get_mut(order_id) {
            order.status = status.to_string();
        }
    }

    /// Queue `error` for the next call of `operation` (gateway method name).
    pub fn fail_next(&self, operation: &'static str, error: GatewayError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.entry(operation).or_default().push_back(error);
        }
    }

    pub async fn orders(&self) -> Vec<ExchangeOrder> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id.parse::<u64>().unwrap_or(u64::MAX));
        orders
    }

    pub async fn open_order_count(&self) -> usize {
        let state = self.state.read().await;
        state.orders.values().filter(|o| o.status == "open").count()
    }

    pub async fn position_size(&self, instrument: &str) -> Decimal {
        let state = self.state.read().await;
        state
            .positions
            .get(instrument)
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO)
    }

    fn injected(&self, operation: &'static str) -> GatewayResult<()> {
        let next = self
            .failures
            .lock()
            .ok()
            .and_then(|mut f| f.get_mut(operation).and_then(|q| q.pop_front()));
        match next {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    fn venue(&self) -> Venue {
        Venue::Paper
    }

    async fn fetch_balance(&self, asset: &str) -> GatewayResult<Decimal> {
        self.injected("fetch_balance")?;
        let state = self.state.read().await;
        Ok(state
            .balances
            .get(&asset.to_ascii_uppercase())
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn fetch_ticker(&self, instrument: &str) -> GatewayResult<Decimal> {
        self.injected("fetch_ticker")?;
        if let Some(feed) = &self.feed {
            let price = feed.fetch_ticker(instrument).await?;
            self.set_price(price).await;
            return Ok(price);
        }
        Ok(self.state.read().await.price)
    }

    async fn fetch_order_book(&self, instrument: &str) -> GatewayResult<OrderBook> {
        self.injected("fetch_order_book")?;
        if let Some(feed) = &self.feed {
            return feed.fetch_order_book(instrument).await;
        }
        let state = self.state.read().await;
        if state.price <= Decimal::ZERO {
            return Ok(OrderBook::default());
        }
        Ok(OrderBook {
            bids: vec![BookLevel::new(state.best_bid(), dec!(10000))],
            asks: vec![BookLevel::new(state.best_ask(), dec!(10000))],
        })
    }

    async fn fetch_positions(&self) -> GatewayResult<Vec<PositionInfo>> {
        self.injected("fetch_positions")?;
        let state = self.state.read().await;
        let price = state.price;
        Ok(state
            .positions
            .iter()
            .filter(|(_, p)| !p.size.is_zero())
            .map(|(instrument, p)| {
                let unrealized_pnl = if p.entry_price > Decimal::ZERO && price > Decimal::ZERO {
                    // Inverse contract PnL in the settlement asset
                    p.size * (Decimal::ONE / p.entry_price - Decimal::ONE / price)
                } else {
                    Decimal::ZERO
                };
                PositionInfo {
                    instrument: instrument.clone(),
                    size: p.size,
                    entry_price: p.entry_price,
                    unrealized_pnl,
                }
            })
            .collect())
    }

    async fn load_markets(&self) -> GatewayResult<HashMap<String, MarketInfo>> {
        self.injected("load_markets")?;
        if let Some(feed) = &self.feed {
            return feed.load_markets().await;
        }
        Ok(self.state.read().await.markets.clone())
    }

    async fn create_limit_order(&self, order: &LimitOrder) -> GatewayResult<ExchangeOrder> {
        self.injected("create_limit_order")?;
        if order.amount <= Decimal::ZERO || order.price <= Decimal::ZERO {
            return Err(GatewayError::InvalidRequest(format!(
                "amount {} and price {} must be positive",
                order.amount, order.price
            )));
        }

        let mut state = self.state.write().await;

        if order.params.post_only && state.price > Decimal::ZERO {
            let crosses = match order.side {
                OrderSide::Sell => order.price <= state.best_bid(),
                OrderSide::Buy => order.price >= state.best_ask(),
            };
            if crosses {
                return Err(GatewayError::Rejected {
                    code: 11054,
                    message: "post_only_reject".to_string(),
                });
            }
        }

        if order.params.reduce_only {
            let size = state
                .positions
                .get(&order.instrument)
                .map(|p| p.size)
                .unwrap_or(Decimal::ZERO);
            let reduces = match order.side {
                OrderSide::Buy => size < Decimal::ZERO,
                OrderSide::Sell => size > Decimal::ZERO,
            };
            if !reduces {
                return Err(GatewayError::InvalidRequest(
                    "reduce_only order would open a position".to_string(),
                ));
            }
        }

        let id = self.order_id_counter.fetch_add(1, Ordering::SeqCst).to_string();
        let placed = ExchangeOrder {
            id: id.clone(),
            instrument: order.instrument.clone(),
            side: order.side,
            amount: order.amount,
            price: order.price,
            status: "open".to_string(),
            filled: Decimal::ZERO,
            average_price: None,
        };
        state.orders.insert(id, placed.clone());

        info!(
            order_id = %placed.id,
            side = %placed.side,
            amount = %placed.amount,
            price = %placed.price,
            "[PAPER] Order placed"
        );
        Ok(placed)
    }

    async fn fetch_order(&self, order_id: &str, _instrument: &str) -> GatewayResult<ExchangeOrder> {
        self.injected("fetch_order")?;
        let state = self.state.read().await;
        state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))
    }

    async fn cancel_order(&self, order_id: &str, instrument: &str) -> GatewayResult<CancelAck> {
        self.injected("cancel_order")?;
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(order_id)
            .filter(|o| o.instrument == instrument)
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))?;
        if order.status == "open" {
            order.status = "cancelled".to_string();
        }
        Ok(CancelAck {
            order_id: order.id.clone(),
            status: order.status.clone(),
        })
    }

    async fn cancel_all_orders(&self, instrument: &str) -> GatewayResult<()> {
        self.injected("cancel_all_orders")?;
        let mut state = self.state.write().await;
        for order in state.orders.values_mut() {
            if order.instrument == instrument && order.status == "open" {
                order.status = "cancelled".to_string();
            }
        }
        Ok(())
    }
}
