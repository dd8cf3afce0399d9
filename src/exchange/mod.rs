//! Exchange integrations for the delta hedger.
//!
//! ## Deribit
//! REST API (v2) connectivity for:
//! - Market data (ticker, order book, instruments)
//! - Account operations (balance, positions, limit orders)
//!
//! ## Paper
//! An in-memory venue that simulates fills against a settable price,
//! optionally sourcing live market data from another gateway.

mod access;
mod client;
mod error;
mod paper;
mod retry;
mod traits;
mod types;

pub use access::{perpetual_instruments, MarketAccess};
pub use client::DeribitClient;
pub use error::GatewayError;
pub use paper::PaperExchange;
pub use retry::RetryPolicy;
pub use traits::{ExchangeGateway, GatewayResult, Venue};
pub use types::*;

#[cfg(test)]
pub use traits::MockExchangeGateway;
