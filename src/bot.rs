//! Bot runner: one pass of classify, decide, execute and commit.
//!
//! A pass is strictly sequential. Every instrument is its own unit of work;
//! its failures become an [`InstrumentOutcome`] and the pass moves on. Only
//! authentication failures and an unreadable signal set or funds balance
//! abort the whole pass.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::api::{Broker, SignalFeed};
use crate::db::{Database, NewJournalEntry};
use crate::error::{GatewayError, PassError, StoreError};
use crate::models::{ExecutionOutcome, InstrumentRecord, OrderRequest, OrderSide};
use crate::retry::retry;
use crate::trading::{
    ClassificationReport, Decision, FundsGuard, OrderExecutor, Plan, Purpose, SignalClassifier,
    SkipReason, TierTable, TradingConfig,
};

/// Bot configuration.
#[derive(Debug, Clone, Default)]
pub struct BotConfig {
    pub trading: TradingConfig,

    /// Evaluate and budget every decision without calling the order endpoint
    pub dry_run: bool,
}

/// Which stages a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    Classify,
    Accumulate,
    Full,
}

impl PassMode {
    fn classifies(&self) -> bool {
        matches!(self, PassMode::Classify | PassMode::Full)
    }

    fn accumulates(&self) -> bool {
        matches!(self, PassMode::Accumulate | PassMode::Full)
    }
}

/// What happened to one instrument during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentOutcome {
    Skipped(SkipReason),
    QuoteUnavailable(String),
    Held { drop_pct: Decimal },
    InsufficientFunds { estimated_cost: Decimal, remaining: Decimal },
    Simulated { purpose: Purpose, quantity: u32, estimated_cost: Decimal },
    Anchored { order_id: String, price: Decimal, quantity: u32 },
    Laddered { order_id: String, price: Decimal, quantity: u32, multiplier: u32 },
    /// Order filled but another run had already set the anchor
    AnchorConflict { order_id: String, price: Decimal },
    Rejected { order_id: Option<String>, reason: String },
    Unconfirmed { order_id: String },
    /// Broker answered the placement but no order id could be read
    Unacknowledged { reason: String },
    PlacementFailed(String),
    StoreFailed(String),
}

impl InstrumentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            InstrumentOutcome::Skipped(_) => "skipped",
            InstrumentOutcome::QuoteUnavailable(_) => "no quote",
            InstrumentOutcome::Held { .. } => "held",
            InstrumentOutcome::InsufficientFunds { .. } => "insufficient funds",
            InstrumentOutcome::Simulated { .. } => "simulated",
            InstrumentOutcome::Anchored { .. } => "anchored",
            InstrumentOutcome::Laddered { .. } => "ordered",
            InstrumentOutcome::AnchorConflict { .. } => "anchor conflict",
            InstrumentOutcome::Rejected { .. } => "rejected",
            InstrumentOutcome::Unconfirmed { .. } => "unconfirmed",
            InstrumentOutcome::Unacknowledged { .. } => "unacknowledged",
            InstrumentOutcome::PlacementFailed(_) => "placement failed",
            InstrumentOutcome::StoreFailed(_) => "store failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            InstrumentOutcome::QuoteUnavailable(_)
                | InstrumentOutcome::Rejected { .. }
                | InstrumentOutcome::Unconfirmed { .. }
                | InstrumentOutcome::Unacknowledged { .. }
                | InstrumentOutcome::PlacementFailed(_)
                | InstrumentOutcome::StoreFailed(_)
        )
    }
}

impl fmt::Display for InstrumentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentOutcome::Skipped(reason) => write!(f, "skipped ({reason})"),
            InstrumentOutcome::QuoteUnavailable(e) => write!(f, "no quote ({e})"),
            InstrumentOutcome::Held { drop_pct } => write!(f, "held (drop {:.2}%)", drop_pct),
            InstrumentOutcome::InsufficientFunds { estimated_cost, remaining } => {
                write!(f, "insufficient funds (needs {:.2}, has {:.2})", estimated_cost, remaining)
            }
            InstrumentOutcome::Simulated { purpose, quantity, estimated_cost } => {
                write!(f, "would buy {} ({}, {:.2})", quantity, purpose.as_str(), estimated_cost)
            }
            InstrumentOutcome::Anchored { order_id, price, quantity } => {
                write!(f, "anchored {} @ {} [{}]", quantity, price, order_id)
            }
            InstrumentOutcome::Laddered { order_id, price, quantity, multiplier } => {
                write!(f, "bought {} (x{}) @ {} [{}]", quantity, multiplier, price, order_id)
            }
            InstrumentOutcome::AnchorConflict { order_id, price } => {
                write!(f, "filled @ {} but anchor already set [{}]", price, order_id)
            }
            InstrumentOutcome::Rejected { order_id, reason } => match order_id {
                Some(id) => write!(f, "rejected: {} [{}]", reason, id),
                None => write!(f, "rejected: {}", reason),
            },
            InstrumentOutcome::Unconfirmed { order_id } => write!(f, "unconfirmed [{}]", order_id),
            InstrumentOutcome::Unacknowledged { reason } => write!(f, "unacknowledged ({reason})"),
            InstrumentOutcome::PlacementFailed(e) => write!(f, "placement failed ({e})"),
            InstrumentOutcome::StoreFailed(e) => write!(f, "store failed ({e})"),
        }
    }
}

/// Summary of one pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub run_id: String,
    pub dry_run: bool,
    pub classification: Option<ClassificationReport>,
    pub opening_budget: Option<Decimal>,
    pub closing_budget: Option<Decimal>,
    pub outcomes: Vec<(String, InstrumentOutcome)>,
}

impl PassReport {
    fn new(run_id: String, dry_run: bool) -> Self {
        Self {
            run_id,
            dry_run,
            classification: None,
            opening_budget: None,
            closing_budget: None,
            outcomes: Vec::new(),
        }
    }

    pub fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.label() == label).count()
    }

    #[cfg(test)]
    pub fn outcome(&self, name: &str) -> Option<&InstrumentOutcome> {
        self.outcomes.iter().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_failure()).count()
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Pass {} ===", self.run_id)?;
        if let Some(c) = &self.classification {
            writeln!(f, "Classification:  {}", c)?;
        }
        if let Some(opening) = self.opening_budget {
            writeln!(f, "Opening Budget:  {:.2}", opening)?;
        }
        if let Some(closing) = self.closing_budget {
            writeln!(f, "Closing Budget:  {:.2}", closing)?;
        }
        for (name, outcome) in &self.outcomes {
            writeln!(f, "  {:<16} {}", name, outcome)?;
        }
        if !self.outcomes.is_empty() {
            writeln!(
                f,
                "Instruments:     {} (Anchored: {}, Ordered: {}, Held: {}, Failed: {})",
                self.outcomes.len(),
                self.count("anchored"),
                self.count("ordered"),
                self.count("held"),
                self.failures()
            )?;
        }
        if self.dry_run {
            writeln!(f, "Mode:            Dry Run")?;
        }
        Ok(())
    }
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    db: Database,
    broker: Arc<dyn Broker>,
    classifier: SignalClassifier,
    executor: OrderExecutor,
    tiers: TierTable,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        db: Database,
        broker: Arc<dyn Broker>,
        feed: Arc<dyn SignalFeed>,
    ) -> Self {
        let trading = &config.trading;
        let classifier = SignalClassifier::new(
            feed,
            db.clone(),
            trading.signal_condition.clone(),
            trading.retry.signal_feed,
        );
        let executor = OrderExecutor::new(broker.clone(), trading.retry.placement, trading.status_poll);
        let tiers = TierTable::new(&trading.tiers);

        Self { config, db, broker, classifier, executor, tiers }
    }

    /// Run one pass under a fresh run id.
    pub async fn run_pass(&self, mode: PassMode) -> Result<PassReport, PassError> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pass", run_id = %run_id);

        async move {
            info!(mode = ?mode, dry_run = self.config.dry_run, "Starting pass");
            let mut report = PassReport::new(run_id.clone(), self.config.dry_run);

            // Reading funds first doubles as the credentials check, so an
            // expired session aborts before classification writes anything.
            let funds = if mode.accumulates() {
                Some(self.read_funds().await?)
            } else {
                None
            };

            if mode.classifies() {
                report.classification = Some(self.classifier.classify().await?);
            }

            if let Some(available) = funds {
                let mut guard = FundsGuard::new(available);
                report.opening_budget = Some(guard.opening());
                self.accumulate(&run_id, &mut guard, &mut report).await?;
                report.closing_budget = Some(guard.remaining());
            }

            info!(
                instruments = report.outcomes.len(),
                failures = report.failures(),
                "Pass complete"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn read_funds(&self) -> Result<Decimal, PassError> {
        let broker: &dyn Broker = self.broker.as_ref();
        let funds = retry(
            &self.config.trading.retry.funds,
            "available_funds",
            GatewayError::is_retryable,
            move || broker.available_funds(),
        )
        .await
        .map_err(|e| match e {
            GatewayError::Authentication(msg) => PassError::Authentication(msg),
            other => PassError::FundsUnavailable(other.to_string()),
        })?;

        info!(available = %funds, "Available funds");
        Ok(funds)
    }

    async fn accumulate(
        &self,
        run_id: &str,
        guard: &mut FundsGuard,
        report: &mut PassReport,
    ) -> Result<(), PassError> {
        let records = self.db.get_all().await?;

        for record in &records {
            let outcome = self.process_instrument(run_id, record, guard).await?;
            report.outcomes.push((record.instrument_name.clone(), outcome));
        }

        Ok(())
    }

    /// Decide, execute and commit for one instrument. Errors are reserved
    /// for failures that must abort the pass.
    async fn process_instrument(
        &self,
        run_id: &str,
        record: &InstrumentRecord,
        guard: &mut FundsGuard,
    ) -> Result<InstrumentOutcome, PassError> {
        let name = record.instrument_name.as_str();

        let plan = Plan::for_record(record);
        if let Plan::Skip(reason) = plan {
            debug!(instrument = %name, reason = %reason, "No automatic action");
            return Ok(InstrumentOutcome::Skipped(reason));
        }
        let token = record.broker_token.clone().unwrap_or_default();

        let price = match self.quote(&token).await {
            Ok(p) => p,
            Err(GatewayError::Authentication(msg)) => return Err(PassError::Authentication(msg)),
            Err(e) => {
                warn!(instrument = %name, error = %e, "Quote unavailable, skipping");
                return Ok(InstrumentOutcome::QuoteUnavailable(e.to_string()));
            }
        };

        let (purpose, quantity, estimated_cost) = match plan.resolve(price, &self.tiers) {
            Some(Decision::Buy { purpose, quantity, estimated_cost, .. }) => {
                (purpose, quantity, estimated_cost)
            }
            Some(Decision::Hold { drop_pct }) => {
                info!(instrument = %name, price = %price, drop_pct = %drop_pct.round_dp(2), "No tier reached");
                return Ok(InstrumentOutcome::Held { drop_pct });
            }
            None => return Ok(InstrumentOutcome::Skipped(SkipReason::Ineligible)),
        };

        if !guard.can_afford(estimated_cost) {
            info!(
                instrument = %name,
                estimated_cost = %estimated_cost,
                remaining = %guard.remaining(),
                "Insufficient funds, skipping"
            );
            return Ok(InstrumentOutcome::InsufficientFunds {
                estimated_cost,
                remaining: guard.remaining(),
            });
        }

        let journal = JournalDraft {
            run_id,
            instrument_name: name,
            broker_token: &token,
            quantity,
            purpose,
            estimated_cost,
        };

        if self.config.dry_run {
            guard.deduct(estimated_cost);
            info!(
                instrument = %name,
                purpose = purpose.as_str(),
                quantity,
                price = %price,
                estimated_cost = %estimated_cost,
                "Dry run: would place order"
            );
            self.journal(&journal, None, "simulated", None, None).await;
            return Ok(InstrumentOutcome::Simulated { purpose, quantity, estimated_cost });
        }

        let request = OrderRequest {
            token: token.clone(),
            symbol: name.to_string(),
            quantity,
            side: OrderSide::Buy,
        };

        let ack = match self.executor.place(&request).await {
            Ok(ack) => ack,
            Err(GatewayError::Rejected(reason)) => {
                warn!(instrument = %name, reason = %reason, "Order rejected");
                self.journal(&journal, None, "rejected", None, Some(reason.as_str())).await;
                return Ok(InstrumentOutcome::Rejected { order_id: None, reason });
            }
            Err(GatewayError::Ambiguous(reason)) => {
                // The order may be live; keep the reservation and leave the anchor alone.
                guard.deduct(estimated_cost);
                warn!(instrument = %name, reason = %reason, "Order state unknown after placement");
                self.journal(&journal, None, "unconfirmed", None, Some(reason.as_str())).await;
                return Ok(InstrumentOutcome::Unacknowledged { reason });
            }
            Err(GatewayError::Authentication(msg)) => return Err(PassError::Authentication(msg)),
            Err(e) => {
                warn!(instrument = %name, error = %e, "Order placement failed");
                return Ok(InstrumentOutcome::PlacementFailed(e.to_string()));
            }
        };

        // The broker's balance lags; reserve locally as soon as it accepts.
        guard.deduct(estimated_cost);

        let execution = match self.executor.confirm(&ack.order_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.journal(&journal, Some(ack.order_id.as_str()), "unconfirmed", None, Some(e.to_string().as_str()))
                    .await;
                return Err(PassError::Authentication(e.to_string()));
            }
        };

        let outcome = match &execution {
            ExecutionOutcome::Executed { order_id, price: fill } => {
                self.journal(&journal, Some(order_id.as_str()), execution.journal_status(), Some(*fill), None)
                    .await;
                match purpose {
                    Purpose::Anchor => self.commit_anchor(name, order_id, *fill, quantity).await,
                    Purpose::Ladder { multiplier, drop_pct } => {
                        info!(
                            instrument = %name,
                            order_id = %order_id,
                            quantity,
                            multiplier,
                            drop_pct = %drop_pct.round_dp(2),
                            price = %fill,
                            "Ladder order executed"
                        );
                        InstrumentOutcome::Laddered {
                            order_id: order_id.clone(),
                            price: *fill,
                            quantity,
                            multiplier,
                        }
                    }
                }
            }
            ExecutionOutcome::Rejected { order_id, reason } => {
                warn!(instrument = %name, order_id = %order_id, reason = %reason, "Order rejected");
                self.journal(&journal, Some(order_id.as_str()), execution.journal_status(), None, Some(reason.as_str()))
                    .await;
                InstrumentOutcome::Rejected { order_id: Some(order_id.clone()), reason: reason.clone() }
            }
            ExecutionOutcome::Unconfirmed { order_id } => {
                warn!(instrument = %name, order_id = %order_id, "Order not confirmed within poll budget");
                self.journal(&journal, Some(order_id.as_str()), execution.journal_status(), None, None)
                    .await;
                InstrumentOutcome::Unconfirmed { order_id: order_id.clone() }
            }
        };

        Ok(outcome)
    }

    async fn quote(&self, token: &str) -> Result<Decimal, GatewayError> {
        let broker: &dyn Broker = self.broker.as_ref();
        retry(
            &self.config.trading.retry.quote,
            "quote",
            GatewayError::is_retryable,
            move || broker.quote(token),
        )
        .await
    }

    async fn commit_anchor(
        &self,
        name: &str,
        order_id: &str,
        price: Decimal,
        quantity: u32,
    ) -> InstrumentOutcome {
        match self.db.commit_anchor(name, price, Utc::now()).await {
            Ok(()) => {
                info!(instrument = %name, order_id = %order_id, price = %price, quantity, "Anchor set");
                InstrumentOutcome::Anchored { order_id: order_id.to_string(), price, quantity }
            }
            Err(StoreError::Conflict(_)) => {
                warn!(
                    instrument = %name,
                    order_id = %order_id,
                    price = %price,
                    "Anchor already committed elsewhere, keeping existing value"
                );
                InstrumentOutcome::AnchorConflict { order_id: order_id.to_string(), price }
            }
            Err(e) => {
                error!(instrument = %name, order_id = %order_id, error = %e, "Failed to commit anchor");
                InstrumentOutcome::StoreFailed(e.to_string())
            }
        }
    }

    async fn journal(
        &self,
        draft: &JournalDraft<'_>,
        order_id: Option<&str>,
        status: &str,
        executed_price: Option<Decimal>,
        detail: Option<&str>,
    ) {
        let entry = NewJournalEntry {
            run_id: draft.run_id,
            order_id,
            instrument_name: draft.instrument_name,
            broker_token: draft.broker_token,
            side: OrderSide::Buy.as_str(),
            quantity: draft.quantity,
            purpose: draft.purpose.as_str(),
            multiplier: draft.purpose.multiplier(),
            estimated_cost: draft.estimated_cost,
            status,
            executed_price,
            detail,
        };

        if let Err(e) = self.db.record_order(&entry, Utc::now()).await {
            error!(instrument = %draft.instrument_name, error = %e, "Failed to journal order");
        }
    }
}

/// Fields shared by every journal row of one decision.
struct JournalDraft<'a> {
    run_id: &'a str,
    instrument_name: &'a str,
    broker_token: &'a str,
    quantity: u32,
    purpose: Purpose,
    estimated_cost: Decimal,
}
