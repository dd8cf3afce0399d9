//! Position and order state owned by the control loop.
//!
//! A single [`BotState`] aggregate is passed by reference to the rebalance
//! controller and order tracker. Nothing else mutates it; readers outside
//! the loop get a [`BotState::snapshot`] copy.

use crate::exchange::{ExchangeOrder, OrderSide};
use rust_decimal::Decimal;
use std::fmt;
use tracing::warn;

/// Controller phase. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Free to evaluate and act
    Rebalancing,
    /// One directional order outstanding
    WaitMatch,
    /// Boundary bracket pair outstanding
    WaitMatchPre,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Rebalancing => write!(f, "REBALANCING"),
            ProcessState::WaitMatch => write!(f, "WAIT_MATCH"),
            ProcessState::WaitMatchPre => write!(f, "WAIT_MATCH_PRE"),
        }
    }
}

/// Normalized order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Partial,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// Map an exchange-native status string.
    ///
    /// Unrecognized statuses map to `Cancelled`: an order we cannot
    /// classify is treated as no longer live.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "closed" | "filled" => OrderStatus::Filled,
            "open" | "new" => OrderStatus::Open,
            "partial" | "partially_filled" | "partially-filled" => OrderStatus::Partial,
            "canceled" | "cancelled" | "expired" | "rejected" => OrderStatus::Cancelled,
            _ => OrderStatus::Cancelled,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "OPEN"),
            OrderStatus::Partial => write!(f, "PARTIAL"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A tracked order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub order_id: String,
    pub side: OrderSide,
    /// Requested size in contracts
    pub amount: Decimal,
    /// Requested limit price
    pub price: Decimal,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub average_price: Option<Decimal>,
}

impl OrderRecord {
    /// Apply a freshly fetched exchange view of this order.
    pub fn update_from(&mut self, order: &ExchangeOrder) {
        self.status = OrderStatus::normalize(&order.status);
        self.filled = order.filled;
        self.average_price = order.average_price;
    }
}

impl From<&ExchangeOrder> for OrderRecord {
    fn from(order: &ExchangeOrder) -> Self {
        Self {
            order_id: order.id.clone(),
            side: order.side,
            amount: order.amount,
            price: order.price,
            status: OrderStatus::normalize(&order.status),
            filled: order.filled,
            average_price: order.average_price,
        }
    }
}

/// Cached balances. The gateway's position feed is ground truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionSnapshot {
    /// Spot asset balance
    pub asset_balance: Decimal,
    /// Absolute short notional in quote currency
    pub short_usd: Decimal,
}

/// Process-wide mutable state of the hedger.
#[derive(Debug, Clone)]
pub struct BotState {
    process: ProcessState,
    orders: Vec<OrderRecord>,
    initial: PositionSnapshot,
    position: PositionSnapshot,
}

/// Tracked orders beyond this count mean a bracket was doubled up.
const MAX_TRACKED_ORDERS: usize = 2;

impl Default for BotState {
    fn default() -> Self {
        Self::new()
    }
}

impl BotState {
    pub fn new() -> Self {
        Self {
            process: ProcessState::Rebalancing,
            orders: Vec::new(),
            initial: PositionSnapshot::default(),
            position: PositionSnapshot::default(),
        }
    }

    pub fn process(&self) -> ProcessState {
        self.process
    }

    pub fn set_process(&mut self, next: ProcessState) {
        self.process = next;
    }

    pub fn orders(&self) -> &[OrderRecord] {
        &self.orders
    }

    pub(crate) fn orders_mut(&mut self) -> &mut [OrderRecord] {
        &mut self.orders
    }

    pub fn has_orders(&self) -> bool {
        !self.orders.is_empty()
    }

    /// Start tracking an order. A record with the same id is replaced.
    pub fn track(&mut self, record: OrderRecord) {
        if let Some(existing) = self
            .orders
            .iter_mut()
            .find(|o| o.order_id == record.order_id)
        {
            *existing = record;
            return;
        }
        self.orders.push(record);
        if self.orders.len() > MAX_TRACKED_ORDERS {
            warn!(
                tracked = self.orders.len(),
                "More tracked orders than a bracket pair"
            );
        }
    }

    /// Remove and return every record with `status`, keeping the order of the rest.
    pub fn take_with_status(&mut self, status: OrderStatus) -> Vec<OrderRecord> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.orders)
            .into_iter()
            .partition(|o| o.status == status);
        self.orders = kept;
        taken
    }

    /// Replace the whole tracked set.
    pub fn replace_orders(&mut self, remaining: Vec<OrderRecord>) {
        self.orders = remaining;
    }

    pub fn position(&self) -> PositionSnapshot {
        self.position
    }

    pub fn initial_position(&self) -> PositionSnapshot {
        self.initial
    }

    /// Record the setup-time position as both initial and current.
    pub fn set_initial_position(&mut self, snapshot: PositionSnapshot) {
        self.initial = snapshot;
        self.position = snapshot;
    }

    pub fn set_asset_balance(&mut self, balance: Decimal) {
        self.position.asset_balance = balance;
    }

    /// Cache the absolute value of a gateway-reported position size.
    pub fn set_short_from_position_size(&mut self, size: Decimal) {
        self.position.short_usd = size.abs();
    }

    /// Copy for readers outside the control loop.
    pub fn snapshot(&self) -> BotState {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(id: &str, status: OrderStatus) -> OrderRecord {
        OrderRecord {
            order_id: id.to_string(),
            side: OrderSide::Sell,
            amount: dec!(10),
            price: dec!(50000),
            status,
            filled: Decimal::ZERO,
            average_price: None,
        }
    }

    #[test]
    fn test_status_normalization_table() {
        assert_eq!(OrderStatus::normalize("closed"), OrderStatus::Filled);
        assert_eq!(OrderStatus::normalize("FILLED"), OrderStatus::Filled);
        assert_eq!(OrderStatus::normalize("open"), OrderStatus::Open);
        assert_eq!(OrderStatus::normalize("new"), OrderStatus::Open);
        assert_eq!(OrderStatus::normalize("partially_filled"), OrderStatus::Partial);
        assert_eq!(OrderStatus::normalize("partially-filled"), OrderStatus::Partial);
        assert_eq!(OrderStatus::normalize("expired"), OrderStatus::Cancelled);
        assert_eq!(OrderStatus::normalize("rejected"), OrderStatus::Cancelled);
    }

    #[test]
    fn test_unknown_status_is_cancelled() {
        assert_eq!(OrderStatus::normalize("archived"), OrderStatus::Cancelled);
        assert_eq!(OrderStatus::normalize(""), OrderStatus::Cancelled);
    }

    #[test]
    fn test_track_is_unique_by_id() {
        let mut state = BotState::new();
        state.track(record("a", OrderStatus::Open));
        state.track(record("b", OrderStatus::Open));
        state.track(record("a", OrderStatus::Filled));

        assert_eq!(state.orders().len(), 2);
        assert_eq!(state.orders()[0].order_id, "a");
        assert_eq!(state.orders()[0].status, OrderStatus::Filled);
    }

    #[test]
    fn test_take_with_status_keeps_rest_in_order() {
        let mut state = BotState::new();
        state.track(record("a", OrderStatus::Open));
        state.track(record("b", OrderStatus::Filled));

        let filled = state.take_with_status(OrderStatus::Filled);
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].order_id, "b");
        assert_eq!(state.orders().len(), 1);
        assert_eq!(state.orders()[0].order_id, "a");
    }

    #[test]
    fn test_short_cache_is_absolute() {
        let mut state = BotState::new();
        state.set_short_from_position_size(dec!(-24000));
        assert_eq!(state.position().short_usd, dec!(24000));
        assert_eq!(state.process(), ProcessState::Rebalancing);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut state = BotState::new();
        state.track(record("a", OrderStatus::Open));
        let snapshot = state.snapshot();

        state.replace_orders(Vec::new());
        assert_eq!(snapshot.orders().len(), 1);
        assert!(!state.has_orders());
    }
}
