//! Venue-agnostic exchange gateway.
//!
//! The hedging core talks to an exchange only through [`ExchangeGateway`].
//! Implementations own transport, authentication and rate-limit handling;
//! retries are applied by the caller through a
//! [`RetryPolicy`](super::RetryPolicy).

use super::error::GatewayError;
use super::types::{CancelAck, ExchangeOrder, LimitOrder, MarketInfo, OrderBook, PositionInfo};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Venue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    Deribit,
    Paper,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Deribit => write!(f, "Deribit"),
            Venue::Paper => write!(f, "Paper"),
        }
    }
}

/// Capability set consumed by the rebalance controller and order tracker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Returns the venue identifier.
    fn venue(&self) -> Venue;

    /// Total balance of `asset`.
    async fn fetch_balance(&self, asset: &str) -> GatewayResult<Decimal>;

    /// Last traded price of `instrument`.
    async fn fetch_ticker(&self, instrument: &str) -> GatewayResult<Decimal>;

    async fn fetch_order_book(&self, instrument: &str) -> GatewayResult<OrderBook>;

    async fn fetch_positions(&self) -> GatewayResult<Vec<PositionInfo>>;

    /// Instrument metadata keyed by instrument name.
    async fn load_markets(&self) -> GatewayResult<HashMap<String, MarketInfo>>;

    async fn create_limit_order(&self, order: &LimitOrder) -> GatewayResult<ExchangeOrder>;

    async fn fetch_order(&self, order_id: &str, instrument: &str) -> GatewayResult<ExchangeOrder>;

    async fn cancel_order(&self, order_id: &str, instrument: &str) -> GatewayResult<CancelAck>;

    async fn cancel_all_orders(&self, instrument: &str) -> GatewayResult<()>;
}
