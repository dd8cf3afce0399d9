//! Cancellation sweep over the tracked order set.

use crate::exchange::MarketAccess;
use crate::state::{BotState, OrderRecord};
use tracing::{info, warn};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Ids confirmed cancelled and dropped from tracking
    pub cancelled: Vec<String>,
    /// Records still tracked after the sweep
    pub remaining: usize,
    /// Whether the defensive exchange-wide cancel was used
    pub exchange_wide: bool,
}

/// Cancel every tracked order.
///
/// With nothing tracked, an exchange-wide cancel for the instrument is
/// attempted instead; its failure is only logged. Orders whose cancel fails
/// or is not acknowledged as cancelled stay tracked for the next sweep.
pub async fn cancel_all_tracked(access: &MarketAccess, state: &mut BotState) -> SweepReport {
    if !state.has_orders() {
        if let Err(e) = access.cancel_all().await {
            warn!(instrument = %access.instrument(), error = %e, "Defensive cancel-all failed");
        }
        return SweepReport {
            exchange_wide: true,
            ..SweepReport::default()
        };
    }

    let mut cancelled = Vec::new();
    let mut remaining: Vec<OrderRecord> = Vec::new();

    for record in state.orders() {
        match access.cancel(&record.order_id).await {
            Ok(ack) if ack.is_cancelled() => {
                info!(order_id = %record.order_id, side = %record.side, "Order cancelled");
                cancelled.push(record.order_id.clone());
            }
            Ok(ack) => {
                warn!(
                    order_id = %record.order_id,
                    status = %ack.status,
                    "Cancel not acknowledged, keeping order tracked"
                );
                remaining.push(record.clone());
            }
            Err(e) => {
                warn!(order_id = %record.order_id, error = %e, "Cancel failed, will retry");
                remaining.push(record.clone());
            }
        }
    }

    let report = SweepReport {
        cancelled,
        remaining: remaining.len(),
        exchange_wide: false,
    };
    state.replace_orders(remaining);
    report
}
