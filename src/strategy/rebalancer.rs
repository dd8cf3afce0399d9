//! Hedge rebalancing: keeps the short notional at its target share of the
//! portfolio value.

use super::boundary::{place_boundary, plan_boundary, BoundaryDecision, BoundaryInputs};
use super::market::{deviation, lot_size};
use crate::config::BotConfig;
use crate::exchange::{GatewayResult, MarketAccess, OrderParams, OrderSide};
use crate::state::{BotState, ProcessState};
use crate::utils::{round_to_lot, safe_div};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Market and position figures one decision is based on.
#[derive(Debug, Clone, Copy)]
pub struct RebalanceInputs {
    pub price: Decimal,
    pub asset_balance: Decimal,
    pub short_usd: Decimal,
    pub lot: Decimal,
}

/// Action to take for rebalancing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceAction {
    /// Short is outside the band: trade `contracts` toward the target
    Directional {
        side: OrderSide,
        contracts: Decimal,
        diff: Decimal,
        deviation: Decimal,
    },
    /// Correction would push the short beyond `max_leverage`
    LeverageExceeded {
        leverage: Decimal,
        deviation: Decimal,
    },
    /// Rounded correction is under one lot
    TooSmall { contracts: Decimal },
    /// Short is inside the band: rest a bracket instead
    Boundary { deviation: Decimal },
}

/// Result of one rebalancing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceResult {
    /// No usable price or quote this tick
    Skipped,
    LeverageExceeded,
    TooSmall,
    Directional { order_id: String },
    BracketPlaced,
    BracketBelowLot,
}

/// Decides and submits rebalancing orders under one parameter set.
pub struct HedgeRebalancer<'a> {
    config: &'a BotConfig,
}

impl<'a> HedgeRebalancer<'a> {
    pub fn new(config: &'a BotConfig) -> Self {
        Self { config }
    }

    /// Decide what the current figures call for.
    pub fn analyze(&self, inputs: &RebalanceInputs) -> RebalanceAction {
        let total_value = inputs.asset_balance * inputs.price;
        let desired_short = total_value * self.config.short_target_ratio;
        let dev = deviation(inputs.short_usd, desired_short, total_value);

        info!(
            price = %inputs.price,
            total_usd = %total_value,
            short_usd = %inputs.short_usd,
            desired_short = %desired_short,
            deviation = %dev,
            "Position check"
        );

        if dev.abs() <= self.config.rebalance_gap {
            return RebalanceAction::Boundary { deviation: dev };
        }

        let diff = desired_short - inputs.short_usd;
        let leverage = safe_div((inputs.short_usd + diff).abs(), total_value);
        if leverage > self.config.max_leverage {
            return RebalanceAction::LeverageExceeded {
                leverage,
                deviation: dev,
            };
        }

        let contracts = inputs.lot.max(round_to_lot(diff.abs(), inputs.lot));
        if contracts < inputs.lot {
            return RebalanceAction::TooSmall { contracts };
        }

        let side = if diff > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        RebalanceAction::Directional {
            side,
            contracts,
            diff,
            deviation: dev,
        }
    }

    /// Evaluate the position and act on it.
    ///
    /// Moves the state to `WaitMatch` after a directional order and to
    /// `WaitMatchPre` after a bracket; otherwise it stays `Rebalancing`.
    pub async fn rebalance(
        &self,
        access: &MarketAccess,
        state: &mut BotState,
    ) -> GatewayResult<RebalanceResult> {
        let Some(price) = access.price().await? else {
            warn!(instrument = %access.instrument(), "Invalid price, skipping tick");
            return Ok(RebalanceResult::Skipped);
        };

        let position = access.position().await?;
        let size = position.as_ref().map(|p| p.size).unwrap_or(Decimal::ZERO);
        state.set_short_from_position_size(size);

        let snapshot = state.position();
        let inputs = RebalanceInputs {
            price,
            asset_balance: snapshot.asset_balance,
            short_usd: snapshot.short_usd,
            lot: lot_size(access.market_info()),
        };

        match self.analyze(&inputs) {
            RebalanceAction::LeverageExceeded { leverage, deviation } => {
                warn!(
                    %leverage,
                    max_leverage = %self.config.max_leverage,
                    %deviation,
                    "Rebalance would exceed max leverage, waiting"
                );
                Ok(RebalanceResult::LeverageExceeded)
            }
            RebalanceAction::TooSmall { contracts } => {
                info!(%contracts, lot = %inputs.lot, "Rebalance amount below lot size");
                Ok(RebalanceResult::TooSmall)
            }
            RebalanceAction::Directional {
                side,
                contracts,
                diff,
                deviation,
            } => {
                let Some(limit) = access.maker_price(side).await? else {
                    warn!(%side, "Order book has no quote on the passive side, skipping tick");
                    return Ok(RebalanceResult::Skipped);
                };
                let params = match side {
                    OrderSide::Sell => OrderParams::maker(),
                    OrderSide::Buy => OrderParams::maker_reduce_only(),
                };

                info!(
                    %side,
                    %contracts,
                    price = %limit,
                    %diff,
                    %deviation,
                    "Executing directional rebalance"
                );
                let record = access.submit(side, contracts, limit, params).await?;
                let order_id = record.order_id.clone();
                state.track(record);
                state.set_process(ProcessState::WaitMatch);
                Ok(RebalanceResult::Directional { order_id })
            }
            RebalanceAction::Boundary { deviation } => {
                debug!(%deviation, "Within tolerance band, planning boundary orders");
                if let Some(p) = &position {
                    info!(
                        size = %p.size,
                        entry_price = %p.entry_price,
                        unrealized_pnl = %p.unrealized_pnl,
                        "Current position"
                    );
                }

                let boundary = BoundaryInputs {
                    price,
                    asset_balance: inputs.asset_balance,
                    short_usd: inputs.short_usd,
                    lot: inputs.lot,
                    tick: access.market_info().and_then(|m| m.tick_size),
                };
                match plan_boundary(self.config, boundary) {
                    BoundaryDecision::Place(plan) => {
                        info!(
                            lower = %plan.lower.price,
                            upper = %plan.upper.price,
                            down_pct = %plan.down_pct,
                            up_pct = %plan.up_pct,
                            "Placing boundary orders"
                        );
                        place_boundary(access, state, &plan).await?;
                        state.set_process(ProcessState::WaitMatchPre);
                        Ok(RebalanceResult::BracketPlaced)
                    }
                    BoundaryDecision::BelowLot {
                        contracts_up,
                        contracts_down,
                    } => {
                        info!(
                            %contracts_up,
                            %contracts_down,
                            lot = %inputs.lot,
                            "Boundary orders below lot size, not placing"
                        );
                        Ok(RebalanceResult::BracketBelowLot)
                    }
                }
            }
        }
    }
}
