//! # Delta Hedger
//!
//! Keeps a short perpetual position at a target fraction of the value of a
//! spot holding, rebalancing on Deribit with post-only limit orders.
//!
//! ## Architecture
//!
//! - `config`: Configuration management, validation and parameter snapshots
//! - `exchange`: Gateway trait, Deribit REST client, paper venue, retry policy
//! - `state`: Process state, tracked orders and cached position
//! - `strategy`: Rebalance decisions, boundary brackets, order tracking
//! - `bot`: The fixed-interval control loop
//! - `utils`: Shared utilities and decimal arithmetic

pub mod bot;
pub mod config;
pub mod exchange;
pub mod state;
pub mod strategy;
pub mod utils;

pub use bot::{BotError, HedgeBot, Shutdown};
pub use config::Config;
