//! Order lifecycle tracking.
//!
//! Polls every tracked order, folds the exchange view into the records and
//! applies the reconciliation rules. The tracker is the only way out of the
//! two waiting states.

use super::sweep::cancel_all_tracked;
use crate::exchange::{GatewayError, GatewayResult, MarketAccess};
use crate::state::{BotState, OrderRecord, OrderStatus, ProcessState};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, error, info, warn};

/// Relative distance from the market beyond which a directional order is stale.
pub const DRIFT_THRESHOLD: Decimal = dec!(0.001);

/// What a polling pass concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerOutcome {
    /// One or more orders filled
    Filled(Vec<String>),
    /// One or more orders were cancelled or expired on the exchange
    Cancelled(Vec<String>),
    /// The directional order drifted away from the market and was withdrawn
    Stale { order_id: String },
    /// Orders still resting
    Waiting,
}

/// Reconciles tracked orders with the exchange.
#[derive(Debug, Default)]
pub struct OrderTracker;

impl OrderTracker {
    pub fn new() -> Self {
        Self
    }

    /// Refresh every tracked order and apply the first matching rule.
    ///
    /// Fills are handled before cancellations; the drift check only applies
    /// to a directional order in `WaitMatch`.
    pub async fn poll(
        &self,
        access: &MarketAccess,
        state: &mut BotState,
    ) -> GatewayResult<TrackerOutcome> {
        self.refresh_orders(access, state).await?;

        let filled = state.take_with_status(OrderStatus::Filled);
        if !filled.is_empty() {
            for order in &filled {
                info!(
                    order_id = %order.order_id,
                    side = %order.side,
                    amount = %order.amount,
                    filled = %order.filled,
                    average_price = ?order.average_price,
                    "Order filled"
                );
            }
            refresh_position(access, state).await;
            state.set_process(ProcessState::Rebalancing);
            cancel_all_tracked(access, state).await;
            return Ok(TrackerOutcome::Filled(ids(&filled)));
        }

        let cancelled = state.take_with_status(OrderStatus::Cancelled);
        if !cancelled.is_empty() {
            for order in &cancelled {
                info!(
                    order_id = %order.order_id,
                    side = %order.side,
                    filled = %order.filled,
                    "Order cancelled on exchange"
                );
            }
            refresh_position(access, state).await;
            if !state.has_orders() {
                info!("All tracked orders cancelled");
            }
            state.set_process(ProcessState::Rebalancing);
            cancel_all_tracked(access, state).await;
            return Ok(TrackerOutcome::Cancelled(ids(&cancelled)));
        }

        if state.process() == ProcessState::WaitMatch {
            let Some(open) = state
                .orders()
                .iter()
                .find(|o| o.status == OrderStatus::Open)
                .cloned()
            else {
                return Ok(TrackerOutcome::Waiting);
            };

            let Some(price) = access.price().await? else {
                warn!("Invalid price, skipping drift check");
                return Ok(TrackerOutcome::Waiting);
            };

            let distance = (open.price - price).abs();
            if distance > price * DRIFT_THRESHOLD {
                info!(
                    order_id = %open.order_id,
                    order_price = %open.price,
                    %price,
                    "Market moved away from order, cancelling"
                );
                cancel_all_tracked(access, state).await;
                state.set_process(ProcessState::Rebalancing);
                return Ok(TrackerOutcome::Stale {
                    order_id: open.order_id,
                });
            }

            debug!(
                order_id = %open.order_id,
                order_price = %open.price,
                %price,
                "Waiting for fill"
            );
        }

        Ok(TrackerOutcome::Waiting)
    }

    async fn refresh_orders(&self, access: &MarketAccess, state: &mut BotState) -> GatewayResult<()> {
        for record in state.orders_mut() {
            match access.fetch_order(&record.order_id).await {
                Ok(order) => {
                    record.update_from(&order);
                    debug!(order_id = %record.order_id, status = %record.status, "Order status");
                }
                Err(GatewayError::OrderNotFound(msg)) => {
                    warn!(order_id = %record.order_id, %msg, "Tracked order not found");
                }
                Err(e) if e.is_rate_limited() || e.is_network() => return Err(e),
                Err(e) => {
                    error!(order_id = %record.order_id, error = %e, "Failed to fetch order");
                }
            }
        }
        Ok(())
    }
}

/// Re-read balance and position after a fill or cancellation.
async fn refresh_position(access: &MarketAccess, state: &mut BotState) {
    match access.position_size().await {
        Ok(size) => state.set_short_from_position_size(size),
        Err(e) => warn!(error = %e, "Unable to refresh position"),
    }
    match access.asset_balance().await {
        Ok(balance) => state.set_asset_balance(balance),
        Err(e) => warn!(error = %e, "Unable to refresh balance"),
    }

    let snapshot = state.position();
    info!(
        asset_balance = %snapshot.asset_balance,
        short_usd = %snapshot.short_usd,
        "Position refreshed"
    );
}

fn ids(orders: &[OrderRecord]) -> Vec<String> {
    orders.iter().map(|o| o.order_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;
    use crate::exchange::{OrderParams, OrderSide, PaperExchange, RetryPolicy};
    use crate::strategy::{HedgeRebalancer, RebalanceResult};
    use std::sync::Arc;
    use std::time::Duration;

    const BTC: &str = "BTC-PERPETUAL";

    async fn setup(short: Decimal) -> (Arc<PaperExchange>, MarketAccess, BotState) {
        let paper = Arc::new(PaperExchange::new("BTC", dec!(1)).with_price(dec!(50000)));
        paper.set_position(BTC, -short, dec!(50000)).await;
        let access = MarketAccess::new(paper.clone(), RetryPolicy::new(3, Duration::ZERO), BTC, "BTC");
        let mut state = BotState::new();
        state.set_asset_balance(dec!(1));
        state.set_short_from_position_size(-short);
        (paper, access, state)
    }

    async fn rebalance(access: &MarketAccess, state: &mut BotState) -> RebalanceResult {
        let config = BotConfig::default();
        HedgeRebalancer::new(&config).rebalance(access, state).await.unwrap()
    }

    #[tokio::test]
    async fn test_directional_fill_returns_to_rebalancing() {
        let (paper, access, mut state) = setup(dec!(24000)).await;
        rebalance(&access, &mut state).await;
        assert_eq!(state.process(), ProcessState::WaitMatch);

        paper.set_price(dec!(50001)).await;
        let outcome = OrderTracker::new().poll(&access, &mut state).await.unwrap();

        assert_eq!(outcome, TrackerOutcome::Filled(vec!["1".to_string()]));
        assert_eq!(state.process(), ProcessState::Rebalancing);
        assert!(!state.has_orders());
        assert_eq!(state.position().short_usd, dec!(25000));
    }

    #[tokio::test]
    async fn test_drift_cancels_directional_order() {
        let (paper, access, mut state) = setup(dec!(20000)).await;
        let record = access
            .submit(OrderSide::Sell, dec!(5000), dec!(50000), OrderParams::maker())
            .await
            .unwrap();
        state.track(record);
        state.set_process(ProcessState::WaitMatch);

        // 0.2% away, still below the resting sell
        paper.set_price(dec!(49900)).await;
        let outcome = OrderTracker::new().poll(&access, &mut state).await.unwrap();
        assert_eq!(
            outcome,
            TrackerOutcome::Stale {
                order_id: "1".to_string()
            }
        );
        assert_eq!(state.process(), ProcessState::Rebalancing);
        assert!(!state.has_orders());
        assert_eq!(paper.open_order_count().await, 0);
    }

    #[tokio::test]
    async fn test_drift_on_buy_above_threshold() {
        let (paper, access, mut state) = setup(dec!(30000)).await;
        let record = access
            .submit(OrderSide::Buy, dec!(5000), dec!(50000), OrderParams::maker_reduce_only())
            .await
            .unwrap();
        state.track(record);
        state.set_process(ProcessState::WaitMatch);

        paper.set_price(dec!(50100)).await;
        let outcome = OrderTracker::new().poll(&access, &mut state).await.unwrap();
        assert!(matches!(outcome, TrackerOutcome::Stale { .. }));
        assert_eq!(state.process(), ProcessState::Rebalancing);
    }

    #[tokio::test]
    async fn test_small_move_keeps_waiting() {
        let (paper, access, mut state) = setup(dec!(24000)).await;
        rebalance(&access, &mut state).await;

        paper.set_price(dec!(49990)).await;
        let outcome = OrderTracker::new().poll(&access, &mut state).await.unwrap();
        assert_eq!(outcome, TrackerOutcome::Waiting);
        assert_eq!(state.process(), ProcessState::WaitMatch);
        assert_eq!(state.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_bracket_fill_cancels_sibling() {
        let (paper, access, mut state) = setup(dec!(25000)).await;
        assert_eq!(rebalance(&access, &mut state).await, RebalanceResult::BracketPlaced);

        // Bracket has no drift check
        let outcome = OrderTracker::new().poll(&access, &mut state).await.unwrap();
        assert_eq!(outcome, TrackerOutcome::Waiting);
        assert_eq!(state.process(), ProcessState::WaitMatchPre);

        paper.set_price(dec!(52000)).await;
        let outcome = OrderTracker::new().poll(&access, &mut state).await.unwrap();
        assert_eq!(outcome, TrackerOutcome::Filled(vec!["1".to_string()]));
        assert_eq!(state.process(), ProcessState::Rebalancing);
        assert!(!state.has_orders());
        assert_eq!(paper.open_order_count().await, 0);
        assert_eq!(state.position().short_usd, dec!(25510));
    }

    #[tokio::test]
    async fn test_external_cancel_returns_to_rebalancing() {
        let (paper, access, mut state) = setup(dec!(25000)).await;
        rebalance(&access, &mut state).await;
        paper.set_order_status("2", "expired").await;

        let outcome = OrderTracker::new().poll(&access, &mut state).await.unwrap();
        assert_eq!(outcome, TrackerOutcome::Cancelled(vec!["2".to_string()]));
        assert_eq!(state.process(), ProcessState::Rebalancing);
        assert!(!state.has_orders());
        assert_eq!(paper.open_order_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_order_is_left_as_is() {
        let (paper, access, mut state) = setup(dec!(24000)).await;
        rebalance(&access, &mut state).await;
        paper.fail_next("fetch_order", GatewayError::OrderNotFound("1".into()));

        let outcome = OrderTracker::new().poll(&access, &mut state).await.unwrap();
        assert_eq!(outcome, TrackerOutcome::Waiting);
        assert_eq!(state.orders().len(), 1);
        assert_eq!(state.orders()[0].status, OrderStatus::Open);
        assert_eq!(state.process(), ProcessState::WaitMatch);
    }

    #[tokio::test]
    async fn test_rate_limit_propagates() {
        let (paper, access, mut state) = setup(dec!(24000)).await;
        rebalance(&access, &mut state).await;
        paper.fail_next("fetch_order", GatewayError::RateLimited("slow down".into()));

        let err = OrderTracker::new().poll(&access, &mut state).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(state.process(), ProcessState::WaitMatch);
    }
}
