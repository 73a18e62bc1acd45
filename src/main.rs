//! Ladder accumulation bot
//!
//! Buys instruments flagged by a screener signal: one anchor purchase per
//! eligibility episode, then larger lots as the price falls through drop
//! tiers measured from the anchor.

mod api;
mod bot;
mod db;
mod error;
mod models;
mod retry;
mod trading;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::FmtSubscriber;

use crate::api::{ChartinkClient, VortexClient};
use crate::bot::{Bot, BotConfig, PassMode};
use crate::db::Database;
use crate::trading::TradingConfig;

/// Tiered accumulation bot CLI.
#[derive(Parser)]
#[command(name = "ladderbot")]
#[command(about = "Accumulate screener-flagged instruments on price drops", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./ladderbot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// TOML file overriding the default trading configuration
    #[arg(short, long, env = "LADDERBOT_CONFIG")]
    config: Option<String>,

    /// Evaluate and budget orders without placing them
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update eligibility from the screener signal only
    Classify,

    /// Place anchor and ladder orders for eligible instruments only
    Accumulate,

    /// Full pass: check credentials and funds, classify, then accumulate
    Run,

    /// Add or reconfigure an instrument
    Add {
        /// Instrument code as reported by the screener (e.g. SBIN)
        name: String,

        /// Broker instrument token
        #[arg(short, long)]
        token: String,

        /// Units bought by the anchor purchase
        #[arg(long, default_value = "1")]
        default_qty: u32,

        /// Units per lot for drop-tier purchases
        #[arg(long, default_value = "1")]
        additional_qty: u32,
    },

    /// List all instruments
    List,

    /// Show recent journaled orders
    Orders {
        /// Number of orders to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(log_level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => TradingConfig::load(path)?,
        None => TradingConfig::default(),
    };

    let db = Database::new(&cli.database).await?;

    match cli.command {
        Commands::Classify => run_pass(PassMode::Classify, config, db, cli.dry_run).await?,
        Commands::Accumulate => run_pass(PassMode::Accumulate, config, db, cli.dry_run).await?,
        Commands::Run => run_pass(PassMode::Full, config, db, cli.dry_run).await?,

        Commands::Add {
            name,
            token,
            default_qty,
            additional_qty,
        } => {
            let name = name.trim().to_string();
            info!(instrument = %name, token = %token, "Configuring instrument");

            db.configure(&name, token.trim(), default_qty, additional_qty, Utc::now())
                .await?;

            let record = db
                .get(&name)
                .await?
                .context("Instrument missing after configure")?;
            println!(
                "{}: token {}, default qty {}, additional qty {} ({})",
                record.instrument_name,
                record.broker_token.as_deref().unwrap_or("-"),
                record.default_quantity,
                record.additional_quantity,
                record.eligibility_status
            );
        }

        Commands::List => {
            let records = db.get_all().await?;

            if records.is_empty() {
                println!("No instruments yet. Run 'ladderbot classify' or 'ladderbot add <name>'.");
                return Ok(());
            }

            println!(
                "\n{:<16} {:<10} {:<10} {:>12} {:>6} {:>8} {:>8} {:<20}",
                "INSTRUMENT", "TOKEN", "STATUS", "BASE", "DAY1", "DEFAULT", "EXTRA", "UPDATED"
            );
            println!("{}", "-".repeat(98));

            for r in records {
                println!(
                    "{:<16} {:<10} {:<10} {:>12} {:>6} {:>8} {:>8} {:<20}",
                    truncate(&r.instrument_name, 16),
                    r.broker_token.as_deref().unwrap_or("-"),
                    r.eligibility_status,
                    r.base_value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string()),
                    if r.first_day_processed { "yes" } else { "no" },
                    r.default_quantity,
                    r.additional_quantity,
                    r.last_updated.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        Commands::Orders { limit } => {
            let orders = db.recent_orders(limit).await?;

            if orders.is_empty() {
                println!("No orders journaled yet.");
                return Ok(());
            }

            println!(
                "\n{:<20} {:<14} {:<8} {:>6} {:>4} {:>12} {:<12} {:>10}",
                "TIME", "INSTRUMENT", "PURPOSE", "QTY", "X", "EST. COST", "STATUS", "PRICE"
            );
            println!("{}", "-".repeat(94));

            for o in orders {
                println!(
                    "{:<20} {:<14} {:<8} {:>6} {:>4} {:>12} {:<12} {:>10}",
                    o.created_at.format("%Y-%m-%d %H:%M:%S"),
                    truncate(&o.instrument_name, 14),
                    o.purpose,
                    o.quantity,
                    o.multiplier,
                    o.estimated_cost,
                    o.status,
                    o.executed_price.as_deref().unwrap_or("-")
                );
            }
        }

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_pass(mode: PassMode, config: TradingConfig, db: Database, dry_run: bool) -> Result<()> {
    let broker = Arc::new(VortexClient::from_env(config.orders.clone())?);
    let feed = Arc::new(ChartinkClient::new()?);
    let bot = Bot::new(BotConfig { trading: config, dry_run }, db, broker, feed);

    let report = bot.run_pass(mode).await?;
    println!("\n{}", report);
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("SBIN", 16), "SBIN");
        assert_eq!(truncate("BAJAJ-AUTO-LIMITED", 10), "BAJAJ-A...");
        // Cuts on character boundaries, not bytes
        assert_eq!(truncate("ÉCLAIRÉ-INDUSTRIES", 10), "ÉCLAIRÉ...");
    }
}
