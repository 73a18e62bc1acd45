//! Accumulation logic: classification, tier decisions, execution, funds.

mod classifier;
mod config;
mod executor;
mod funds;
mod ladder;

pub use classifier::{ClassificationReport, SignalClassifier};
pub use config::{OrderSettings, TradingConfig};
pub use executor::OrderExecutor;
pub use funds::FundsGuard;
pub use ladder::{Decision, Plan, Purpose, SkipReason, TierTable};
