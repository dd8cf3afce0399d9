//! The hedging control loop.
//!
//! [`HedgeBot`] owns the [`BotState`] and drives the rebalancer and the
//! order tracker on a fixed interval, one tick at a time.

use crate::config::{BotConfig, ConfigError, RuntimeConfig};
use crate::exchange::{GatewayError, MarketAccess};
use crate::state::{BotState, PositionSnapshot, ProcessState};
use crate::strategy::{cancel_all_tracked, HedgeRebalancer, OrderTracker, RebalanceResult, TrackerOutcome};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Errors surfaced by setup and ticks.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("instrument {0} is not listed on the exchange")]
    UnknownInstrument(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl BotError {
    /// Errors that must stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::Config(_) | BotError::UnknownInstrument(_))
    }
}

/// Cooperative shutdown flag set from a signal handler task.
#[derive(Debug, Default)]
pub struct Shutdown {
    triggered: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once [`Self::trigger`] has been called.
    pub async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub rebalance: Option<RebalanceResult>,
    pub tracker: Option<TrackerOutcome>,
}

/// Delta-hedging bot bound to one instrument.
pub struct HedgeBot {
    access: MarketAccess,
    state: BotState,
    config: BotConfig,
    runtime: RuntimeConfig,
    parameters_path: Option<PathBuf>,
    tracker: OrderTracker,
}

impl HedgeBot {
    pub fn new(access: MarketAccess, config: BotConfig, runtime: RuntimeConfig) -> Self {
        Self {
            access,
            state: BotState::new(),
            config,
            runtime,
            parameters_path: None,
            tracker: OrderTracker::new(),
        }
    }

    /// Re-read parameters from `path` at the start of every rebalancing tick.
    pub fn with_parameters_path(mut self, path: PathBuf) -> Self {
        self.parameters_path = Some(path);
        self
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Check the instrument, clear leftover orders and record the starting position.
    pub async fn setup(&mut self) -> Result<(), BotError> {
        self.config.validate()?;
        self.bind_market().await?;

        info!(instrument = %self.access.instrument(), "🧹 [SETUP] Clearing orders from previous runs");
        cancel_all_tracked(&self.access, &mut self.state).await;

        let balance = self.access.asset_balance().await?;
        let size = self.access.position_size().await?;
        let snapshot = PositionSnapshot {
            asset_balance: balance,
            short_usd: size.abs(),
        };
        self.state.set_initial_position(snapshot);

        info!(
            asset = %self.access.asset(),
            asset_balance = %snapshot.asset_balance,
            short_usd = %snapshot.short_usd,
            "📊 [SETUP] Initial position"
        );
        if !self.config.initial_asset.is_zero() && self.config.initial_asset != balance {
            warn!(
                configured = %self.config.initial_asset,
                exchange = %balance,
                "[SETUP] initial_asset differs from exchange balance, using exchange balance"
            );
        }
        Ok(())
    }

    async fn bind_market(&mut self) -> Result<(), BotError> {
        if !self.access.load_market().await? {
            return Err(BotError::UnknownInstrument(self.access.instrument().to_string()));
        }
        Ok(())
    }

    /// One control step.
    ///
    /// In `Rebalancing` leftover orders are settled first, then the
    /// parameters are reloaded and the rebalancer runs. Tracked orders are
    /// then polled regardless of state.
    pub async fn tick(&mut self) -> Result<TickReport, BotError> {
        let mut report = TickReport::default();

        if self.state.process() == ProcessState::Rebalancing {
            if self.state.has_orders() && !self.settle_leftovers(&mut report).await? {
                return Ok(report);
            }
            self.reload_parameters().await?;
            let rebalancer = HedgeRebalancer::new(&self.config);
            report.rebalance = Some(rebalancer.rebalance(&self.access, &mut self.state).await?);
        }

        if self.state.has_orders() {
            report.tracker = Some(self.tracker.poll(&self.access, &mut self.state).await?);
        }

        Ok(report)
    }

    /// Reconcile and cancel orders a failed sweep left behind. Returns
    /// `true` once the tracked set is empty.
    async fn settle_leftovers(&mut self, report: &mut TickReport) -> Result<bool, BotError> {
        report.tracker = Some(self.tracker.poll(&self.access, &mut self.state).await?);
        if self.state.has_orders() {
            self.cancel_all().await;
        }
        if self.state.has_orders() {
            warn!(
                tracked = self.state.orders().len(),
                "Previous orders still unresolved, skipping rebalance"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn reload_parameters(&mut self) -> Result<(), BotError> {
        let Some(path) = &self.parameters_path else {
            return Ok(());
        };
        let fresh = BotConfig::load_from(path)?;
        if fresh == self.config {
            return Ok(());
        }

        info!(
            symbol = %fresh.symbol_futures,
            rebalance_gap = %fresh.rebalance_gap,
            short_target_ratio = %fresh.short_target_ratio,
            interval_secs = fresh.interval_secs,
            max_leverage = %fresh.max_leverage,
            "🔄 Parameters updated"
        );

        let rebind = !self.access.is_bound_to(&fresh.symbol_futures);
        self.config = fresh;
        if rebind {
            self.access
                .rebind(self.config.symbol_futures.clone(), self.config.settle_asset());
            self.bind_market().await?;
            let balance = self.access.asset_balance().await?;
            self.state.set_asset_balance(balance);
        }
        Ok(())
    }

    /// Pause to apply after a failed tick, or `None` if the error is not a
    /// connectivity problem.
    pub fn cooldown_for(&self, err: &BotError) -> Option<Duration> {
        match err {
            BotError::Gateway(e) if e.is_rate_limited() => {
                Some(Duration::from_secs(self.runtime.rate_limit_cooldown_secs))
            }
            BotError::Gateway(e) if e.is_network() => {
                Some(Duration::from_secs(self.runtime.network_cooldown_secs))
            }
            _ => None,
        }
    }

    /// Best-effort sweep of every tracked order.
    pub async fn cancel_all(&mut self) {
        let report = cancel_all_tracked(&self.access, &mut self.state).await;
        if report.remaining > 0 {
            warn!(remaining = report.remaining, "Some orders could not be cancelled");
        }
    }

    /// Run until `shutdown` fires or a fatal error occurs. Orders are swept on the way out.
    pub async fn run(&mut self, shutdown: &Shutdown) -> Result<(), BotError> {
        info!(
            instrument = %self.access.instrument(),
            venue = %self.access.venue(),
            interval_secs = self.config.interval_secs,
            "🚀 Rebalancing bot started"
        );

        while !shutdown.is_triggered() {
            let pause = match self.tick().await {
                Ok(_) => self.config.interval(),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal error, stopping");
                    self.cancel_all().await;
                    return Err(e);
                }
                Err(e) => match self.cooldown_for(&e) {
                    Some(cooldown) => {
                        warn!(error = %e, cooldown_secs = cooldown.as_secs(), "Connectivity problem, cooling down");
                        cooldown
                    }
                    None => {
                        error!(error = %e, "Unexpected error during tick, cancelling orders");
                        self.cancel_all().await;
                        self.config.interval()
                    }
                },
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.wait() => {}
            }
        }

        info!("🛑 Bot stopped by user");
        self.cancel_all().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MarketInfo, OrderParams, OrderSide, PaperExchange, RetryPolicy};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const BTC: &str = "BTC-PERPETUAL";

    fn perpetual() -> MarketInfo {
        MarketInfo {
            is_contract: true,
            settle_asset: "BTC".to_string(),
            is_swap: true,
            min_amount: Some(dec!(10)),
            tick_size: Some(dec!(0.5)),
        }
    }

    fn paper() -> Arc<PaperExchange> {
        Arc::new(
            PaperExchange::new("BTC", dec!(1))
                .with_price(dec!(50000))
                .with_market(BTC, perpetual())
                .with_market("ETH-PERPETUAL", perpetual()),
        )
    }

    async fn bot_for(paper: Arc<PaperExchange>, short: Decimal) -> HedgeBot {
        if !short.is_zero() {
            paper.set_position(BTC, -short, dec!(50000)).await;
        }
        let access = MarketAccess::new(paper, RetryPolicy::new(3, Duration::ZERO), BTC, "BTC");
        HedgeBot::new(access, BotConfig::default(), RuntimeConfig::default())
    }

    #[tokio::test]
    async fn test_setup_records_initial_position() {
        let exchange = paper();
        let mut bot = bot_for(exchange, dec!(24000)).await;

        bot.setup().await.unwrap();
        assert_eq!(
            bot.state().initial_position(),
            PositionSnapshot {
                asset_balance: dec!(1),
                short_usd: dec!(24000),
            }
        );
        assert_eq!(bot.state().process(), ProcessState::Rebalancing);
    }

    #[tokio::test]
    async fn test_setup_rejects_unknown_instrument() {
        let exchange = Arc::new(PaperExchange::new("BTC", dec!(1)).with_price(dec!(50000)));
        let mut bot = bot_for(exchange, Decimal::ZERO).await;

        let err = bot.setup().await.unwrap_err();
        assert!(matches!(err, BotError::UnknownInstrument(ref s) if s == BTC));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_setup_sweeps_leftover_orders() {
        let exchange = paper();
        let mut bot = bot_for(exchange.clone(), dec!(25000)).await;
        let stale = MarketAccess::new(exchange.clone(), RetryPolicy::default(), BTC, "BTC");
        stale
            .submit(OrderSide::Sell, dec!(100), dec!(55000), OrderParams::maker())
            .await
            .unwrap();

        bot.setup().await.unwrap();
        assert_eq!(exchange.open_order_count().await, 0);
    }

    #[tokio::test]
    async fn test_tick_cycle_directional_then_fill() {
        let exchange = paper();
        let mut bot = bot_for(exchange.clone(), dec!(24000)).await;
        bot.setup().await.unwrap();

        let report = bot.tick().await.unwrap();
        assert!(matches!(report.rebalance, Some(RebalanceResult::Directional { .. })));
        assert_eq!(report.tracker, Some(TrackerOutcome::Waiting));
        assert_eq!(bot.state().process(), ProcessState::WaitMatch);

        exchange.set_price(dec!(50001)).await;
        let report = bot.tick().await.unwrap();
        assert_eq!(report.rebalance, None);
        assert!(matches!(report.tracker, Some(TrackerOutcome::Filled(_))));
        assert_eq!(bot.state().process(), ProcessState::Rebalancing);

        // Balanced now: next tick rests a bracket
        exchange.set_price(dec!(50000)).await;
        let report = bot.tick().await.unwrap();
        assert_eq!(report.rebalance, Some(RebalanceResult::BracketPlaced));
        assert_eq!(bot.state().process(), ProcessState::WaitMatchPre);
        assert_eq!(bot.state().orders().len(), 2);
    }

    #[tokio::test]
    async fn test_hot_reload_applies_and_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let exchange = paper();
        let bot = bot_for(exchange, dec!(25000)).await;
        let path = bot.config().save_snapshot(dir.path(), "run1").unwrap();
        let mut bot = bot.with_parameters_path(path.clone());
        bot.setup().await.unwrap();

        let edited = BotConfig {
            symbol_futures: "ETH-PERPETUAL".to_string(),
            max_leverage: dec!(2),
            ..BotConfig::default()
        };
        std::fs::write(&path, serde_json::to_string(&edited).unwrap()).unwrap();
        bot.tick().await.unwrap();
        assert_eq!(bot.config(), &edited);

        let broken = BotConfig {
            max_leverage: Decimal::ZERO,
            ..edited
        };
        std::fs::write(&path, serde_json::to_string(&broken).unwrap()).unwrap();
        let err = bot.tick().await.unwrap_err();
        assert!(matches!(err, BotError::Config(ConfigError::NonPositiveLeverage(_))));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_failed_drift_cancel_blocks_new_order() {
        let exchange = paper();
        let mut bot = bot_for(exchange.clone(), dec!(24000)).await;
        bot.setup().await.unwrap();

        let report = bot.tick().await.unwrap();
        assert!(matches!(report.rebalance, Some(RebalanceResult::Directional { .. })));

        exchange.set_price(dec!(49800)).await;
        exchange.fail_next("cancel_order", GatewayError::Rejected { code: 0, message: "busy".into() });
        let report = bot.tick().await.unwrap();
        assert_eq!(
            report.tracker,
            Some(TrackerOutcome::Stale {
                order_id: "1".to_string()
            })
        );
        assert_eq!(bot.state().process(), ProcessState::Rebalancing);
        assert_eq!(bot.state().orders().len(), 1);

        // Cancel fails again: no second order while the first is live
        exchange.fail_next("cancel_order", GatewayError::Rejected { code: 0, message: "busy".into() });
        let report = bot.tick().await.unwrap();
        assert_eq!(report.rebalance, None);
        assert_eq!(bot.state().orders().len(), 1);
        assert_eq!(exchange.open_order_count().await, 1);

        let report = bot.tick().await.unwrap();
        assert_eq!(
            report.rebalance,
            Some(RebalanceResult::Directional {
                order_id: "2".to_string()
            })
        );
        assert_eq!(bot.state().orders().len(), 1);
        assert_eq!(bot.state().orders()[0].order_id, "2");
        assert_eq!(exchange.open_order_count().await, 1);
        assert_eq!(exchange.orders().await[0].status, "cancelled");
    }

    #[tokio::test]
    async fn test_symbol_change_cancels_leftovers_on_old_instrument() {
        let dir = tempfile::tempdir().unwrap();
        let exchange = paper();
        let bot = bot_for(exchange.clone(), dec!(24000)).await;
        let path = bot.config().save_snapshot(dir.path(), "run2").unwrap();
        let mut bot = bot.with_parameters_path(path.clone());
        bot.setup().await.unwrap();
        bot.tick().await.unwrap();

        exchange.set_price(dec!(49800)).await;
        exchange.fail_next("cancel_order", GatewayError::Rejected { code: 0, message: "busy".into() });
        bot.tick().await.unwrap();
        assert_eq!(bot.state().orders().len(), 1);

        let edited = BotConfig {
            symbol_futures: "ETH-PERPETUAL".to_string(),
            ..BotConfig::default()
        };
        std::fs::write(&path, serde_json::to_string(&edited).unwrap()).unwrap();
        bot.tick().await.unwrap();

        assert_eq!(bot.config(), &edited);
        let btc_order = exchange.orders().await.into_iter().find(|o| o.id == "1").unwrap();
        assert_eq!(btc_order.instrument, BTC);
        assert_eq!(btc_order.status, "cancelled");
    }

    #[tokio::test]
    async fn test_cooldown_classification() {
        let exchange = paper();
        let bot = bot_for(exchange, Decimal::ZERO).await;

        let limited = BotError::Gateway(GatewayError::RateLimited("429".into()));
        let network = BotError::Gateway(GatewayError::RetriesExhausted {
            operation: "fetch_ticker".into(),
            attempts: 3,
            last: Box::new(GatewayError::Network("reset".into())),
        });
        let other = BotError::Gateway(GatewayError::InsufficientFunds("margin".into()));

        assert_eq!(bot.cooldown_for(&limited), Some(Duration::from_secs(60)));
        assert_eq!(bot.cooldown_for(&network), Some(Duration::from_secs(10)));
        assert_eq!(bot.cooldown_for(&other), None);
    }

    #[tokio::test]
    async fn test_shutdown_sweeps_orders() {
        let exchange = paper();
        let mut bot = bot_for(exchange.clone(), dec!(25000)).await;
        bot.setup().await.unwrap();
        bot.tick().await.unwrap();
        assert_eq!(exchange.open_order_count().await, 2);

        let shutdown = Shutdown::new();
        shutdown.trigger();
        bot.run(&shutdown).await.unwrap();

        assert!(!bot.state().has_orders());
        assert_eq!(exchange.open_order_count().await, 0);
    }

    #[tokio::test]
    async fn test_unexpected_error_sweeps_and_continues() {
        let exchange = paper();
        exchange.set_position(BTC, dec!(-25000), dec!(50000)).await;
        let access = MarketAccess::new(exchange.clone(), RetryPolicy::new(3, Duration::ZERO), BTC, "BTC");
        let config = BotConfig {
            interval_secs: 1,
            ..BotConfig::default()
        };
        let mut bot = HedgeBot::new(access, config, RuntimeConfig::default());
        bot.setup().await.unwrap();

        exchange.fail_next(
            "create_limit_order",
            GatewayError::InsufficientFunds("margin".into()),
        );
        let shutdown = Arc::new(Shutdown::new());
        let stopper = shutdown.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            stopper.trigger();
        });

        // First tick fails and is swept, the second rests a bracket
        bot.run(&shutdown).await.unwrap();
        handle.await.unwrap();
        assert!(!bot.state().has_orders());
        assert_eq!(exchange.open_order_count().await, 0);
        assert_eq!(exchange.orders().await.len(), 2);
    }
}
