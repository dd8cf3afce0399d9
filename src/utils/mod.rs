//! Shared utilities.

pub mod decimal;

pub use decimal::{round_down_to_lot, round_to_lot, round_to_tick, round_up_to_lot, safe_div};
