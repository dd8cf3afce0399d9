//! Hedging strategy implementation.
//!
//! Contains the core logic for:
//! - Deviation and boundary arithmetic
//! - Directional rebalancing toward the target short
//! - Boundary bracket orders while the short is inside its band
//! - Order lifecycle reconciliation and cancellation sweeps

mod boundary;
mod market;
mod rebalancer;
mod sweep;
mod tracker;

pub use boundary::{
    place_boundary, plan_boundary, BoundaryDecision, BoundaryInputs, BoundaryPlan, BracketLeg,
};
pub use market::{boundary_offsets, deviation, lot_size, FALLBACK_LOT_SIZE};
pub use rebalancer::{HedgeRebalancer, RebalanceAction, RebalanceInputs, RebalanceResult};
pub use sweep::{cancel_all_tracked, SweepReport};
pub use tracker::{OrderTracker, TrackerOutcome, DRIFT_THRESHOLD};
