//! Retrying access to the configured instrument on one gateway.
//!
//! Every gateway call made by the hedging core goes through
//! [`MarketAccess`], which applies the [`RetryPolicy`] explicitly at each
//! call site and narrows the venue-wide API to one instrument.

use super::retry::RetryPolicy;
use super::traits::{ExchangeGateway, GatewayResult, Venue};
use super::types::{
    CancelAck, ExchangeOrder, LimitOrder, MarketInfo, OrderParams, OrderSide, PositionInfo,
};
use crate::state::OrderRecord;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Gateway handle bound to one instrument and its settlement asset.
pub struct MarketAccess {
    gateway: Arc<dyn ExchangeGateway>,
    retry: RetryPolicy,
    instrument: String,
    asset: String,
    market: Option<MarketInfo>,
}

impl MarketAccess {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        retry: RetryPolicy,
        instrument: impl Into<String>,
        asset: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            retry,
            instrument: instrument.into(),
            asset: asset.into(),
            market: None,
        }
    }

    pub fn venue(&self) -> Venue {
        self.gateway.venue()
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    /// Cached metadata of the instrument, if [`Self::load_market`] found it.
    pub fn market_info(&self) -> Option<&MarketInfo> {
        self.market.as_ref()
    }

    /// Whether the handle currently targets `instrument`.
    pub fn is_bound_to(&self, instrument: &str) -> bool {
        self.instrument == instrument
    }

    /// Rebind to another instrument. Cached metadata is dropped.
    pub fn rebind(&mut self, instrument: impl Into<String>, asset: impl Into<String>) {
        self.instrument = instrument.into();
        self.asset = asset.into();
        self.market = None;
    }

    /// Fetch all markets and cache the bound instrument's metadata.
    ///
    /// Returns `false` if the instrument is not listed.
    pub async fn load_market(&mut self) -> GatewayResult<bool> {
        let mut markets = self.all_markets().await?;
        self.market = markets.remove(&self.instrument);
        Ok(self.market.is_some())
    }

    pub async fn all_markets(&self) -> GatewayResult<HashMap<String, MarketInfo>> {
        self.retry
            .run("load_markets", || self.gateway.load_markets())
            .await
    }

    /// Last price, or `None` if the exchange reports a non-positive one.
    pub async fn price(&self) -> GatewayResult<Option<Decimal>> {
        let price = self
            .retry
            .run("fetch_ticker", || self.gateway.fetch_ticker(&self.instrument))
            .await?;
        Ok((price > Decimal::ZERO).then_some(price))
    }

    pub async fn asset_balance(&self) -> GatewayResult<Decimal> {
        self.retry
            .run("fetch_balance", || self.gateway.fetch_balance(&self.asset))
            .await
    }

    /// Position on the bound instrument, if any.
    pub async fn position(&self) -> GatewayResult<Option<PositionInfo>> {
        let positions = self
            .retry
            .run("fetch_positions", || self.gateway.fetch_positions())
            .await?;
        Ok(positions
            .into_iter()
            .find(|p| p.instrument == self.instrument))
    }

    /// Signed position size in quote currency, zero when flat.
    pub async fn position_size(&self) -> GatewayResult<Decimal> {
        Ok(self
            .position()
            .await?
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO))
    }

    /// Passive limit price for `side`: best ask for a sell, best bid for a buy.
    pub async fn maker_price(&self, side: OrderSide) -> GatewayResult<Option<Decimal>> {
        let book = self
            .retry
            .run("fetch_order_book", || {
                self.gateway.fetch_order_book(&self.instrument)
            })
            .await?;
        Ok(match side {
            OrderSide::Sell => book.best_ask(),
            OrderSide::Buy => book.best_bid(),
        })
    }

    /// Submit a limit order and return the record to track.
    ///
    /// The order is re-fetched for an authoritative view; if that fails the
    /// submission response is used as-is.
    pub async fn submit(
        &self,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
        params: OrderParams,
    ) -> GatewayResult<OrderRecord> {
        let request = LimitOrder {
            instrument: self.instrument.clone(),
            side,
            amount,
            price,
            params,
        };
        let submitted = self
            .retry
            .run("create_limit_order", || {
                self.gateway.create_limit_order(&request)
            })
            .await?;

        match self.fetch_order(&submitted.id).await {
            Ok(verified) => Ok(OrderRecord::from(&verified)),
            Err(e) => {
                warn!(
                    order_id = %submitted.id,
                    error = %e,
                    "Could not re-fetch submitted order, tracking submission response"
                );
                Ok(OrderRecord::from(&submitted))
            }
        }
    }

    pub async fn fetch_order(&self, order_id: &str) -> GatewayResult<ExchangeOrder> {
        self.retry
            .run("fetch_order", || {
                self.gateway.fetch_order(order_id, &self.instrument)
            })
            .await
    }

    pub async fn cancel(&self, order_id: &str) -> GatewayResult<CancelAck> {
        self.retry
            .run("cancel_order", || {
                self.gateway.cancel_order(order_id, &self.instrument)
            })
            .await
    }

    pub async fn cancel_all(&self) -> GatewayResult<()> {
        debug!(instrument = %self.instrument, "Exchange-wide cancel");
        self.retry
            .run("cancel_all_orders", || {
                self.gateway.cancel_all_orders(&self.instrument)
            })
            .await
    }
}

/// Perpetual instruments settling in a major asset, sorted by name.
pub fn perpetual_instruments(markets: &HashMap<String, MarketInfo>) -> Vec<String> {
    const SETTLE_ASSETS: [&str; 5] = ["USD", "USDT", "USDC", "BTC", "ETH"];

    let mut symbols: Vec<String> = markets
        .iter()
        .filter(|(_, m)| {
            m.is_contract && m.is_swap && SETTLE_ASSETS.contains(&m.settle_asset.as_str())
        })
        .map(|(symbol, _)| symbol.clone())
        .collect();
    symbols.sort();
    symbols
}
