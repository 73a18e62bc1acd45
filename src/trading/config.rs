//! Trading configuration.

use std::fs;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

use super::ladder::Tier;

/// Screener clause selecting instruments whose RSI sits below its EMA on the
/// daily or weekly timeframe.
pub const DEFAULT_SIGNAL_CONDITION: &str = "( {166311} ( latest rsi(65) < latest ema(rsi(65),35) or weekly rsi(65) < weekly ema(rsi(65),35) ) )";

/// Configuration for the accumulation loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Condition expression sent to the signal feed
    pub signal_condition: String,

    /// Drop tiers; evaluated from the highest threshold down
    pub tiers: Vec<Tier>,

    /// Fixed order parameters sent to the broker
    pub orders: OrderSettings,

    /// Retry budgets per collaborator call
    pub retry: RetrySettings,

    /// Order status polling after an accepted placement
    pub status_poll: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderSettings {
    pub exchange: String,
    pub product: String,
    pub variety: String,
    pub validity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub signal_feed: RetryPolicy,
    pub placement: RetryPolicy,
    pub quote: RetryPolicy,
    pub funds: RetryPolicy,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            signal_condition: DEFAULT_SIGNAL_CONDITION.to_string(),
            tiers: vec![
                Tier::new(dec!(3), 3),
                Tier::new(dec!(2), 2),
                Tier::new(dec!(1), 1),
            ],
            orders: OrderSettings::default(),
            retry: RetrySettings::default(),
            status_poll: RetryPolicy::new(6, 5_000),
        }
    }
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            exchange: "NSE_EQ".to_string(),
            product: "MTF".to_string(),
            variety: "RL-MKT".to_string(), // Regular market order
            validity: "DAY".to_string(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            signal_feed: RetryPolicy::new(3, 10_000),
            placement: RetryPolicy::new(3, 5_000),
            quote: RetryPolicy::new(3, 5_000),
            funds: RetryPolicy::new(5, 5_000),
        }
    }
}

impl TradingConfig {
    /// Load from a TOML file; omitted keys keep their defaults.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: TradingConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            anyhow::bail!("at least one drop tier is required");
        }
        for tier in &self.tiers {
            if tier.threshold_pct <= Decimal::ZERO {
                anyhow::bail!("tier threshold must be positive, got {}", tier.threshold_pct);
            }
            if tier.multiplier == 0 {
                anyhow::bail!("tier multiplier must be at least 1 (threshold {})", tier.threshold_pct);
            }
        }
        Ok(())
    }
}
