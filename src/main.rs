//! Delta Hedger - Main Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use delta_hedger::config::Config;
use delta_hedger::exchange::{
    perpetual_instruments, DeribitClient, ExchangeGateway, MarketAccess, PaperExchange,
    RetryPolicy,
};
use delta_hedger::{HedgeBot, Shutdown};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument, Level};
use tracing_subscriber::EnvFilter;

/// Delta Hedger CLI
#[derive(Parser)]
#[command(name = "delta-hedger")]
#[command(version, about = "Delta-hedging rebalance controller for Deribit perpetuals")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rebalancing loop
    Run {
        /// Configuration file (defaults to ./config.*)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Trade against the in-memory paper venue with live market data
        #[arg(long)]
        paper: bool,

        /// Spot balance of the paper account
        #[arg(long, default_value = "1")]
        paper_balance: Decimal,
    },

    /// List perpetual instruments available for hedging
    Markets {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Load and validate the configuration, then exit
    CheckConfig {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    match cli.command.unwrap_or(Commands::Run {
        config: None,
        paper: false,
        paper_balance: Decimal::ONE,
    }) {
        Commands::Run {
            config,
            paper,
            paper_balance,
        } => run(config.as_deref(), paper, paper_balance).await,
        Commands::Markets { config } => list_markets(config.as_deref()).await,
        Commands::CheckConfig { config } => check_config(config.as_deref()),
    }
}

async fn run(path: Option<&std::path::Path>, paper: bool, paper_balance: Decimal) -> Result<()> {
    let config = Config::load(path)?;
    config.validate().context("Invalid hedging parameters")?;

    let run_key = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let span = tracing::info_span!("hedger", key = %run_key);

    async move {
        info!("Delta Hedger v{} starting", env!("CARGO_PKG_VERSION"));
        log_config(&config);

        let snapshot = config
            .bot
            .save_snapshot(&config.runtime.parameters_dir, &run_key)
            .context("Failed to write parameter snapshot")?;
        info!(path = %snapshot.display(), "📝 Parameters saved");

        let deribit: Arc<dyn ExchangeGateway> = Arc::new(DeribitClient::new(&config.exchange)?);
        let gateway: Arc<dyn ExchangeGateway> = if paper {
            info!(balance = %paper_balance, "📝 PAPER TRADING MODE - orders are simulated");
            Arc::new(
                PaperExchange::new(&config.bot.settle_asset(), paper_balance)
                    .with_market_feed(deribit),
            )
        } else {
            if config.exchange.api_key.is_empty() {
                warn!("No API key configured, private calls will be rejected");
            }
            warn!(testnet = config.exchange.testnet, "⚠️  LIVE TRADING MODE");
            deribit
        };

        let retry = RetryPolicy::new(
            config.runtime.retry_max_attempts,
            Duration::from_secs(config.runtime.retry_delay_secs),
        );
        let access = MarketAccess::new(
            gateway,
            retry,
            config.bot.symbol_futures.clone(),
            config.bot.settle_asset(),
        );
        let mut bot = HedgeBot::new(access, config.bot.clone(), config.runtime.clone())
            .with_parameters_path(snapshot);

        let shutdown = Arc::new(Shutdown::new());
        let signal = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("🛑 Shutdown signal received");
            signal.trigger();
        });

        if let Err(e) = bot.setup().await {
            error!(error = %e, "Setup failed");
            return Err(e.into());
        }

        bot.run(&shutdown).await?;
        info!("👋 Delta Hedger shutdown complete");
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await
}

async fn list_markets(path: Option<&std::path::Path>) -> Result<()> {
    let config = Config::load(path)?;
    let client = DeribitClient::new(&config.exchange)?;
    let markets = client
        .load_markets()
        .await
        .context("Failed to load markets")?;

    let symbols = perpetual_instruments(&markets);
    info!(count = symbols.len(), "Perpetual instruments");
    for symbol in symbols {
        let market = &markets[&symbol];
        println!(
            "{:<24} settle={:<5} lot={:<8} tick={}",
            symbol,
            market.settle_asset,
            market.min_amount.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            market.tick_size.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
    Ok(())
}

fn check_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = Config::load(path)?;
    config.validate().context("Invalid hedging parameters")?;
    log_config(&config);
    info!("✅ Configuration is valid");
    Ok(())
}

/// Initialize logging to stdout and a daily-rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "rebalance.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("delta_hedger=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Instrument: {}", config.bot.symbol_futures);
    info!("   Asset: {}", config.bot.settle_asset());
    info!("   Rebalance Gap: {}", config.bot.rebalance_gap);
    info!("   Short Target Ratio: {}", config.bot.short_target_ratio);
    info!("   Interval: {}s", config.bot.interval_secs);
    info!("   Max Leverage: {}x", config.bot.max_leverage);
    info!("   Initial Asset: {}", config.bot.initial_asset);
    info!("   Testnet: {}", config.exchange.testnet);
}
