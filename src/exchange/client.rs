//! Deribit REST API client (API v2, JSON-RPC over HTTP GET).

use crate::config::ExchangeConfig;
use crate::exchange::error::GatewayError;
use crate::exchange::traits::{ExchangeGateway, GatewayResult, Venue};
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{debug, instrument};

const BASE_URL: &str = "https://www.deribit.com";
const TESTNET_URL: &str = "https://test.deribit.com";
const API_PREFIX: &str = "/api/v2/";

/// Deribit API client.
pub struct DeribitClient {
    http: Client,
    client_id: String,
    client_secret: String,
    base_url: String,
}

// ==================== Wire types ====================

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct AccountSummary {
    equity: Decimal,
}

#[derive(Debug, Deserialize)]
struct TickerResult {
    last_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct BookResult {
    #[serde(default)]
    bids: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct PositionResult {
    instrument_name: String,
    size: Decimal,
    #[serde(default)]
    average_price: Decimal,
    #[serde(default)]
    floating_profit_loss: Decimal,
}

#[derive(Debug, Deserialize)]
struct InstrumentResult {
    instrument_name: String,
    kind: String,
    settlement_period: Option<String>,
    settlement_currency: Option<String>,
    min_trade_amount: Option<Decimal>,
    tick_size: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct OrderResult {
    order_id: String,
    instrument_name: String,
    direction: OrderSide,
    amount: Decimal,
    #[serde(default)]
    price: Decimal,
    order_state: String,
    #[serde(default)]
    filled_amount: Decimal,
    average_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct PlacedOrderResult {
    order: OrderResult,
}

impl From<OrderResult> for ExchangeOrder {
    fn from(o: OrderResult) -> Self {
        // Deribit reports 0 for orders without fills
        let average_price = o.average_price.filter(|p| !p.is_zero());
        Self {
            id: o.order_id,
            instrument: o.instrument_name,
            side: o.direction,
            amount: o.amount,
            price: o.price,
            status: o.order_state,
            filled: o.filled_amount,
            average_price,
        }
    }
}

/// Map a Deribit JSON-RPC error code.
fn map_rpc_error(code: i64, message: String) -> GatewayError {
    match code {
        10028 => GatewayError::RateLimited(message),
        10004 => GatewayError::OrderNotFound(message),
        10009 => GatewayError::InsufficientFunds(message),
        13888 => GatewayError::Timeout(message),
        10040 | 11051 => GatewayError::Unavailable(message),
        10019 | 11029 | 11030 | 11031 => GatewayError::InvalidRequest(message),
        _ => GatewayError::Rejected { code, message },
    }
}

fn map_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(e.to_string())
    } else if e.is_decode() {
        GatewayError::Decode(e.to_string())
    } else {
        GatewayError::Network(e.to_string())
    }
}

impl DeribitClient {
    /// Create a new Deribit client from configuration.
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let base_url = if config.testnet { TESTNET_URL } else { BASE_URL };
        Self::with_base_url(config, base_url)
    }

    /// Create a client against an explicit base URL.
    pub fn with_base_url(config: &ExchangeConfig, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            client_id: config.api_key.clone(),
            client_secret: config.secret_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Generate the `deri-hmac-sha256` Authorization header value.
    fn authorization(&self, uri: &str, timestamp: i64, nonce: &str) -> String {
        let string_to_sign = format!("{}\n{}\nGET\n{}\n\n", timestamp, nonce, uri);
        let mut mac = Hmac::<Sha256>::new_from_slice(self.client_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        format!(
            "deri-hmac-sha256 id={},ts={},sig={},nonce={}",
            self.client_id, timestamp, signature, nonce
        )
    }

    fn uri(method: &str, params: &[(&str, String)]) -> String {
        let query: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        if query.is_empty() {
            format!("{}{}", API_PREFIX, method)
        } else {
            format!("{}{}?{}", API_PREFIX, method, query)
        }
    }

    /// Call a JSON-RPC method. Methods under `private/` are signed.
    #[instrument(skip(self, params))]
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> GatewayResult<T> {
        let uri = Self::uri(method, params);
        let mut request = self.http.get(format!("{}{}", self.base_url, uri));

        if method.starts_with("private/") {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let nonce = uuid::Uuid::new_v4().simple().to_string();
            request = request.header("Authorization", self.authorization(&uri, timestamp, &nonce));
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        debug!(%method, %status, "Deribit response");

        match serde_json::from_str::<RpcResponse<T>>(&body) {
            Ok(RpcResponse {
                error: Some(err), ..
            }) => Err(map_rpc_error(err.code, err.message)),
            Ok(RpcResponse {
                result: Some(result),
                ..
            }) if status.is_success() => Ok(result),
            _ if status == StatusCode::TOO_MANY_REQUESTS => {
                Err(GatewayError::RateLimited(format!("HTTP 429 on {}", method)))
            }
            _ if status.is_server_error() => Err(GatewayError::Unavailable(format!(
                "HTTP {} on {}",
                status.as_u16(),
                method
            ))),
            Ok(_) => Err(GatewayError::Decode(format!("{} returned no result", method))),
            Err(e) if status.is_success() => Err(GatewayError::Decode(e.to_string())),
            Err(_) => Err(GatewayError::Rejected {
                code: i64::from(status.as_u16()),
                message: body,
            }),
        }
    }
}

fn decimal_param(value: Decimal) -> String {
    value.normalize().to_string()
}

#[async_trait]
impl ExchangeGateway for DeribitClient {
    fn venue(&self) -> Venue {
        Venue::Deribit
    }

    async fn fetch_balance(&self, asset: &str) -> GatewayResult<Decimal> {
        let summary: AccountSummary = self
            .call(
                "private/get_account_summary",
                &[("currency", asset.to_ascii_uppercase())],
            )
            .await?;
        Ok(summary.equity)
    }

    async fn fetch_ticker(&self, instrument: &str) -> GatewayResult<Decimal> {
        let ticker: TickerResult = self
            .call("public/ticker", &[("instrument_name", instrument.to_string())])
            .await?;
        Ok(ticker.last_price.unwrap_or(Decimal::ZERO))
    }

    async fn fetch_order_book(&self, instrument: &str) -> GatewayResult<OrderBook> {
        let book: BookResult = self
            .call(
                "public/get_order_book",
                &[
                    ("instrument_name", instrument.to_string()),
                    ("depth", "5".to_string()),
                ],
            )
            .await?;
        let levels = |side: Vec<(Decimal, Decimal)>| {
            side.into_iter()
                .map(|(price, size)| BookLevel::new(price, size))
                .collect()
        };
        Ok(OrderBook {
            bids: levels(book.bids),
            asks: levels(book.asks),
        })
    }

    async fn fetch_positions(&self) -> GatewayResult<Vec<PositionInfo>> {
        let positions: Vec<PositionResult> = self
            .call(
                "private/get_positions",
                &[("currency", "any".to_string()), ("kind", "future".to_string())],
            )
            .await?;
        Ok(positions
            .into_iter()
            .map(|p| PositionInfo {
                instrument: p.instrument_name,
                size: p.size,
                entry_price: p.average_price,
                unrealized_pnl: p.floating_profit_loss,
            })
            .collect())
    }

    async fn load_markets(&self) -> GatewayResult<HashMap<String, MarketInfo>> {
        let instruments: Vec<InstrumentResult> = self
            .call(
                "public/get_instruments",
                &[
                    ("currency", "any".to_string()),
                    ("kind", "future".to_string()),
                    ("expired", "false".to_string()),
                ],
            )
            .await?;
        Ok(instruments
            .into_iter()
            .map(|i| {
                let market = MarketInfo {
                    is_contract: i.kind == "future",
                    settle_asset: i.settlement_currency.unwrap_or_default(),
                    is_swap: i.settlement_period.as_deref() == Some("perpetual"),
                    min_amount: i.min_trade_amount,
                    tick_size: i.tick_size,
                };
                (i.instrument_name, market)
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn create_limit_order(&self, order: &LimitOrder) -> GatewayResult<ExchangeOrder> {
        let method = format!("private/{}", order.side.as_str());
        let params = [
            ("instrument_name", order.instrument.clone()),
            ("amount", decimal_param(order.amount)),
            ("type", "limit".to_string()),
            ("price", decimal_param(order.price)),
            ("post_only", order.params.post_only.to_string()),
            ("reject_post_only", order.params.post_only.to_string()),
            ("reduce_only", order.params.reduce_only.to_string()),
        ];

        debug!("Placing limit order: {:?}", order);
        let placed: PlacedOrderResult = self.call(&method, &params).await?;
        Ok(placed.order.into())
    }

    async fn fetch_order(&self, order_id: &str, _instrument: &str) -> GatewayResult<ExchangeOrder> {
        let order: OrderResult = self
            .call("private/get_order_state", &[("order_id", order_id.to_string())])
            .await?;
        Ok(order.into())
    }

    async fn cancel_order(&self, order_id: &str, _instrument: &str) -> GatewayResult<CancelAck> {
        let order: OrderResult = self
            .call("private/cancel", &[("order_id", order_id.to_string())])
            .await?;
        Ok(CancelAck {
            order_id: order.order_id,
            status: order.order_state,
        })
    }

    async fn cancel_all_orders(&self, instrument: &str) -> GatewayResult<()> {
        let cancelled: u64 = self
            .call(
                "private/cancel_all_by_instrument",
                &[("instrument_name", instrument.to_string())],
            )
            .await?;
        debug!(%instrument, cancelled, "Cancelled all orders");
        Ok(())
    }
}
