//! Boundary bracket planning.
//!
//! While the short sits inside its tolerance band, a resting sell above and
//! a reduce-only buy below the market re-trigger rebalancing if price moves
//! far enough in either direction. The two legs are independent orders; the
//! tracker cancels the survivor once one of them fills.

use super::market::boundary_offsets;
use super::sweep::cancel_all_tracked;
use crate::config::BotConfig;
use crate::exchange::{GatewayResult, MarketAccess, OrderParams, OrderSide};
use crate::state::BotState;
use crate::utils::{round_down_to_lot, round_to_tick, round_up_to_lot};
use rust_decimal::Decimal;
use tracing::{error, info};

/// One resting leg of the bracket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketLeg {
    pub side: OrderSide,
    pub price: Decimal,
    pub contracts: Decimal,
}

/// Planned bracket around the current price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryPlan {
    pub upper: BracketLeg,
    pub lower: BracketLeg,
    pub down_pct: Decimal,
    pub up_pct: Decimal,
}

/// Planner verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryDecision {
    Place(BoundaryPlan),
    /// At least one side rounds below one lot; nothing is placed
    BelowLot {
        contracts_up: Decimal,
        contracts_down: Decimal,
    },
}

/// Inputs of the boundary computation.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryInputs {
    pub price: Decimal,
    pub asset_balance: Decimal,
    pub short_usd: Decimal,
    pub lot: Decimal,
    pub tick: Option<Decimal>,
}

/// Compute the bracket for the current position.
///
/// The upper delta is floored to the lot and the lower delta ceiled.
pub fn plan_boundary(config: &BotConfig, inputs: BoundaryInputs) -> BoundaryDecision {
    let (down_pct, up_pct) = boundary_offsets(config.rebalance_gap, config.short_target_ratio);
    let to_tick = |p: Decimal| match inputs.tick {
        Some(tick) => round_to_tick(p, tick),
        None => p,
    };

    let price_lower = to_tick(inputs.price * (Decimal::ONE + down_pct));
    let price_upper = to_tick(inputs.price * (Decimal::ONE + up_pct));

    let desired_up = inputs.asset_balance * price_upper * config.short_target_ratio;
    let desired_down = inputs.asset_balance * price_lower * config.short_target_ratio;

    let contracts_up = round_down_to_lot((desired_up - inputs.short_usd).abs(), inputs.lot);
    let contracts_down = round_up_to_lot((desired_down - inputs.short_usd).abs(), inputs.lot);

    if contracts_up < inputs.lot || contracts_down < inputs.lot {
        return BoundaryDecision::BelowLot {
            contracts_up,
            contracts_down,
        };
    }

    BoundaryDecision::Place(BoundaryPlan {
        upper: BracketLeg {
            side: OrderSide::Sell,
            price: price_upper,
            contracts: contracts_up,
        },
        lower: BracketLeg {
            side: OrderSide::Buy,
            price: price_lower,
            contracts: contracts_down,
        },
        down_pct,
        up_pct,
    })
}

/// Submit both legs and track them.
///
/// If the lower leg fails after the upper one went through, the tracked set
/// is swept before the error is returned, so no lone leg is left resting.
pub async fn place_boundary(
    access: &MarketAccess,
    state: &mut BotState,
    plan: &BoundaryPlan,
) -> GatewayResult<()> {
    let upper = access
        .submit(
            plan.upper.side,
            plan.upper.contracts,
            plan.upper.price,
            OrderParams::maker(),
        )
        .await?;
    info!(
        order_id = %upper.order_id,
        price = %plan.upper.price,
        contracts = %plan.upper.contracts,
        "Upper boundary SELL placed"
    );
    state.track(upper);

    match access
        .submit(
            plan.lower.side,
            plan.lower.contracts,
            plan.lower.price,
            OrderParams::maker_reduce_only(),
        )
        .await
    {
        Ok(lower) => {
            info!(
                order_id = %lower.order_id,
                price = %plan.lower.price,
                contracts = %plan.lower.contracts,
                "Lower boundary BUY placed"
            );
            state.track(lower);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Lower boundary order failed, withdrawing upper leg");
            cancel_all_tracked(access, state).await;
            Err(e)
        }
    }
}
