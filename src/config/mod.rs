//! Configuration management for the delta hedger.
//!
//! Loads settings from environment variables and config files. The
//! hedging parameters ([`BotConfig`]) are additionally snapshotted per run
//! and re-read from that snapshot on every rebalancing tick, so they can be
//! edited while the bot is running.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Invalid or unreadable hedging parameters. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_leverage must be greater than 0 (got {0})")]
    NonPositiveLeverage(Decimal),

    #[error("short_target_ratio must be between 0.05 and 0.95 (got {0})")]
    RatioOutOfRange(Decimal),

    #[error("rebalance_gap must be greater than 0 (got {0})")]
    NonPositiveGap(Decimal),

    #[error("interval_secs must be greater than 0")]
    NonPositiveInterval,

    #[error("rebalance_gap {gap} leaves no tolerance band for short_target_ratio {ratio}")]
    DegenerateBand { gap: Decimal, ratio: Decimal },

    #[error("failed to load parameters from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("failed to write parameter snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize parameters: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange API credentials
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Hedging parameters
    #[serde(default)]
    pub bot: BotConfig,
    /// Loop, retry and snapshot settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// API key (client id) for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
}

/// Hedging parameters, validated before every use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Derivative instrument carrying the short, e.g. "BTC-PERPETUAL"
    #[serde(default = "default_symbol_futures")]
    pub symbol_futures: String,
    /// Tolerated deviation of the short from target, as a fraction of portfolio value
    #[serde(default = "default_rebalance_gap")]
    pub rebalance_gap: Decimal,
    /// Target short notional as a fraction of portfolio value (0.05-0.95)
    #[serde(default = "default_short_target_ratio")]
    pub short_target_ratio: Decimal,
    /// Polling interval of the control loop
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum short notional as a multiple of portfolio value
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Decimal,
    /// Expected spot holding; informational, the exchange balance is authoritative
    #[serde(default)]
    pub initial_asset: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory receiving the per-run parameter snapshot
    #[serde(default = "default_parameters_dir")]
    pub parameters_dir: PathBuf,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Pause after a network failure escapes a tick
    #[serde(default = "default_network_cooldown_secs")]
    pub network_cooldown_secs: u64,
    /// Pause after the exchange rate-limits us
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
}

// Default value functions
fn default_symbol_futures() -> String {
    "BTC-PERPETUAL".to_string()
}

fn default_rebalance_gap() -> Decimal {
    dec!(0.01)
}

fn default_short_target_ratio() -> Decimal {
    dec!(0.5)
}

fn default_interval_secs() -> u64 {
    5
}

fn default_max_leverage() -> Decimal {
    dec!(1.0)
}

fn default_parameters_dir() -> PathBuf {
    PathBuf::from("CONFIG_PARAMETERS")
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_network_cooldown_secs() -> u64 {
    10
}

fn default_rate_limit_cooldown_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from environment variables and config files.
    ///
    /// `path` overrides the default optional `config.*` file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("config").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("HEDGER").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bot.validate()
    }
}

impl BotConfig {
    /// Check parameter bounds. Checked in the order leverage, ratio, gap,
    /// interval, band.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_leverage <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveLeverage(self.max_leverage));
        }
        if self.short_target_ratio < dec!(0.05) || self.short_target_ratio > dec!(0.95) {
            return Err(ConfigError::RatioOutOfRange(self.short_target_ratio));
        }
        if self.rebalance_gap <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveGap(self.rebalance_gap));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::NonPositiveInterval);
        }
        if Decimal::ONE - self.short_target_ratio <= self.rebalance_gap {
            return Err(ConfigError::DegenerateBand {
                gap: self.rebalance_gap,
                ratio: self.short_target_ratio,
            });
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Spot asset hedged by the instrument.
    ///
    /// "BTC/USD:BTC" settles in the suffix; "BTC-PERPETUAL" names it first.
    pub fn settle_asset(&self) -> String {
        let symbol = self.symbol_futures.as_str();
        let asset = match symbol.rsplit_once(':') {
            Some((_, settle)) => settle,
            None => symbol.split(['-', '/', '_']).next().unwrap_or(symbol),
        };
        asset.to_ascii_uppercase()
    }

    /// Read and validate parameters from a file (any format the `config`
    /// crate recognises by extension).
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let parsed: BotConfig = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|source| ConfigError::Load {
                path: path.to_path_buf(),
                source,
            })?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Write these parameters to `<dir>/rebalance_parameters_<run_key>.json`.
    pub fn save_snapshot(&self, dir: &Path, run_key: &str) -> Result<PathBuf, ConfigError> {
        let path = dir.join(format!("rebalance_parameters_{}.json", run_key));
        let body = serde_json::to_string_pretty(self)?;

        std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(&path, body))
            .map_err(|source| ConfigError::Snapshot {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig {
                api_key: String::new(),
                secret_key: String::new(),
                testnet: true,
            },
            bot: BotConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol_futures: default_symbol_futures(),
            rebalance_gap: default_rebalance_gap(),
            short_target_ratio: default_short_target_ratio(),
            interval_secs: default_interval_secs(),
            max_leverage: default_max_leverage(),
            initial_asset: Decimal::ZERO,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parameters_dir: default_parameters_dir(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            network_cooldown_secs: default_network_cooldown_secs(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
        }
    }
}
