//! Venue-neutral request and response types for the exchange gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Order book snapshot, best level first on both sides.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

/// Derivative position as reported by the exchange.
#[derive(Debug, Clone)]
pub struct PositionInfo {
    pub instrument: String,
    /// Signed position size in quote currency (negative = short)
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Instrument metadata from `load_markets`.
#[derive(Debug, Clone)]
pub struct MarketInfo {
    pub is_contract: bool,
    pub settle_asset: String,
    pub is_swap: bool,
    /// Minimum order increment
    pub min_amount: Option<Decimal>,
    /// Minimum price increment
    pub tick_size: Option<Decimal>,
}

/// Execution flags for a limit order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderParams {
    pub post_only: bool,
    pub reduce_only: bool,
}

impl OrderParams {
    /// Post-only, may open or increase a position.
    pub fn maker() -> Self {
        Self {
            post_only: true,
            reduce_only: false,
        }
    }

    /// Post-only and restricted to decreasing the position.
    pub fn maker_reduce_only() -> Self {
        Self {
            post_only: true,
            reduce_only: true,
        }
    }
}

/// New limit order request.
#[derive(Debug, Clone)]
pub struct LimitOrder {
    pub instrument: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub params: OrderParams,
}

/// Order as reported by the exchange, with its native status string.
#[derive(Debug, Clone)]
pub struct ExchangeOrder {
    pub id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub status: String,
    pub filled: Decimal,
    pub average_price: Option<Decimal>,
}

/// Acknowledgement of a single-order cancel.
#[derive(Debug, Clone)]
pub struct CancelAck {
    pub order_id: String,
    pub status: String,
}

impl CancelAck {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "canceled" | "cancelled"
        )
    }
}
