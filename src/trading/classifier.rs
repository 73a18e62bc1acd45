//! Signal classifier: turns the signal set into eligibility transitions.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::SignalFeed;
use crate::db::{Database, Expected, RecordUpdate};
use crate::error::{GatewayError, PassError, StoreError};
use crate::models::{EligibilityStatus, InstrumentRecord};
use crate::retry::{retry, RetryPolicy};

/// Eligibility change for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Seen for the first time; created eligible with a fresh episode
    Discovered,

    /// Ineligible and back in the signal set; a new episode starts
    Activated,

    /// Still in the signal set; only `last_updated` moves
    Refreshed,

    /// Dropped out of the signal set; the episode ends and the anchor clears
    Deactivated,

    /// Absent and already ineligible
    Unchanged,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transition::Discovered => "discovered",
            Transition::Activated => "activated",
            Transition::Refreshed => "refreshed",
            Transition::Deactivated => "deactivated",
            Transition::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// Transition per instrument, ordered by name. New signal codes with no
/// record come out as [`Transition::Discovered`].
pub fn plan_transitions(
    signal: &HashSet<String>,
    records: &[InstrumentRecord],
) -> Vec<(String, Transition)> {
    let known: HashSet<&str> = records.iter().map(|r| r.instrument_name.as_str()).collect();

    let mut transitions: Vec<(String, Transition)> = records
        .iter()
        .map(|record| {
            let listed = signal.contains(&record.instrument_name);
            let transition = match (listed, record.eligibility_status) {
                (true, EligibilityStatus::Ineligible) => Transition::Activated,
                (true, EligibilityStatus::Eligible) => Transition::Refreshed,
                (false, EligibilityStatus::Eligible) => Transition::Deactivated,
                (false, EligibilityStatus::Ineligible) => Transition::Unchanged,
            };
            (record.instrument_name.clone(), transition)
        })
        .collect();

    transitions.extend(
        signal
            .iter()
            .filter(|code| !known.contains(code.as_str()))
            .map(|code| (code.clone(), Transition::Discovered)),
    );

    transitions.sort_by(|a, b| a.0.cmp(&b.0));
    transitions
}

/// Counts per transition for one classification run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationReport {
    pub signal_size: usize,
    pub discovered: usize,
    pub activated: usize,
    pub refreshed: usize,
    pub deactivated: usize,
    pub unchanged: usize,
    /// Rows that changed underneath us between read and write
    pub conflicts: usize,
}

impl ClassificationReport {
    fn count(&mut self, transition: Transition) {
        match transition {
            Transition::Discovered => self.discovered += 1,
            Transition::Activated => self.activated += 1,
            Transition::Refreshed => self.refreshed += 1,
            Transition::Deactivated => self.deactivated += 1,
            Transition::Unchanged => self.unchanged += 1,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signal: {} | Discovered: {} | Activated: {} | Refreshed: {} | Deactivated: {} | Conflicts: {}",
            self.signal_size,
            self.discovered,
            self.activated,
            self.refreshed,
            self.deactivated,
            self.conflicts
        )
    }
}

/// Applies signal-set membership to the eligibility store.
pub struct SignalClassifier {
    feed: Arc<dyn SignalFeed>,
    db: Database,
    condition: String,
    policy: RetryPolicy,
}

impl SignalClassifier {
    pub fn new(feed: Arc<dyn SignalFeed>, db: Database, condition: String, policy: RetryPolicy) -> Self {
        Self { feed, db, condition, policy }
    }

    /// Fetch the signal set with retries. Nothing is written when this fails.
    pub async fn fetch_signal(&self) -> Result<HashSet<String>, PassError> {
        let feed: &dyn SignalFeed = self.feed.as_ref();
        let condition = self.condition.as_str();

        retry(&self.policy, "fetch_signal_set", GatewayError::is_retryable, move || {
            feed.fetch_signal_set(condition)
        })
        .await
        .map_err(|e| match e {
            GatewayError::Authentication(msg) => PassError::Authentication(msg),
            other => PassError::SignalUnavailable(other.to_string()),
        })
    }

    /// Fetch the signal set and apply it.
    pub async fn classify(&self) -> Result<ClassificationReport, PassError> {
        let signal = self.fetch_signal().await?;
        self.apply(&signal).await
    }

    /// Apply a fetched signal set to every record.
    pub async fn apply(&self, signal: &HashSet<String>) -> Result<ClassificationReport, PassError> {
        let records = self.db.get_all().await?;
        let mut report = ClassificationReport {
            signal_size: signal.len(),
            ..Default::default()
        };

        for (name, transition) in plan_transitions(signal, &records) {
            match self.apply_one(&name, transition).await {
                Ok(()) => {
                    report.count(transition);
                    match transition {
                        Transition::Activated | Transition::Deactivated | Transition::Discovered => {
                            info!(instrument = %name, transition = %transition, "Eligibility changed");
                        }
                        _ => debug!(instrument = %name, transition = %transition, "Eligibility checked"),
                    }
                }
                Err(StoreError::Conflict(_)) => {
                    // Another run got there first; the next pass re-reads it.
                    report.conflicts += 1;
                    warn!(instrument = %name, transition = %transition, "Record changed during classification");
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!("{}", report);
        Ok(report)
    }

    async fn apply_one(&self, name: &str, transition: Transition) -> Result<(), StoreError> {
        let now = Utc::now();
        match transition {
            Transition::Discovered => {
                if !self.db.insert_if_absent(&InstrumentRecord::discovered(name, now)).await? {
                    return Err(StoreError::Conflict(name.to_string()));
                }
                Ok(())
            }
            Transition::Activated => {
                self.db
                    .update(
                        name,
                        &RecordUpdate::start_episode(),
                        &Expected::status(EligibilityStatus::Ineligible),
                        now,
                    )
                    .await
            }
            Transition::Refreshed => {
                self.db
                    .update(
                        name,
                        &RecordUpdate::touch(),
                        &Expected::status(EligibilityStatus::Eligible),
                        now,
                    )
                    .await
            }
            Transition::Deactivated => {
                self.db
                    .update(
                        name,
                        &RecordUpdate::end_episode(),
                        &Expected::status(EligibilityStatus::Eligible),
                        now,
                    )
                    .await
            }
            Transition::Unchanged => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{count, MockFeed};
    use rust_decimal_macros::dec;

    fn signal(codes: &[&str]) -> HashSet<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    async fn setup(feed: MockFeed) -> (Arc<MockFeed>, Database, SignalClassifier) {
        let db = Database::in_memory().await.unwrap();
        let feed = Arc::new(feed);
        let classifier = SignalClassifier::new(
            feed.clone(),
            db.clone(),
            "( {166311} ( latest close > 0 ) )".to_string(),
            RetryPolicy::immediate(3),
        );
        (feed, db, classifier)
    }

    async fn anchor(db: &Database, name: &str) {
        db.configure(name, "3045", 5, 10, Utc::now()).await.unwrap();
        db.update(
            name,
            &RecordUpdate::start_episode(),
            &Expected::status(EligibilityStatus::Ineligible),
            Utc::now(),
        )
        .await
        .unwrap();
        db.commit_anchor(name, dec!(780.05), Utc::now()).await.unwrap();
    }

    #[test]
    fn test_plan_transitions() {
        let now = Utc::now();
        let mut eligible = InstrumentRecord::discovered("INFY", now);
        eligible.first_day_processed = true;
        eligible.base_value = Some(dec!(1500));
        let mut ineligible = InstrumentRecord::discovered("SBIN", now);
        ineligible.eligibility_status = EligibilityStatus::Ineligible;
        let mut dropped = InstrumentRecord::discovered("TCS", now);
        dropped.eligibility_status = EligibilityStatus::Ineligible;

        let plan = plan_transitions(
            &signal(&["INFY", "SBIN", "WIPRO"]),
            &[eligible, ineligible, dropped],
        );

        assert_eq!(
            plan,
            vec![
                ("INFY".to_string(), Transition::Refreshed),
                ("SBIN".to_string(), Transition::Activated),
                ("TCS".to_string(), Transition::Unchanged),
                ("WIPRO".to_string(), Transition::Discovered),
            ]
        );
    }

    #[tokio::test]
    async fn test_absent_instrument_loses_anchor() {
        let (feed, db, classifier) = setup(MockFeed::with_signal(&["INFY"])).await;
        anchor(&db, "SBIN").await;

        let report = classifier.classify().await.unwrap();
        assert_eq!(report.deactivated, 1);
        assert_eq!(report.discovered, 1);
        assert_eq!(count(&feed.calls), 1);

        let sbin = db.get("SBIN").await.unwrap().unwrap();
        assert_eq!(sbin.eligibility_status, EligibilityStatus::Ineligible);
        assert_eq!(sbin.base_value, None);
        assert!(!sbin.first_day_processed);
        assert_eq!(sbin.default_quantity, 5);

        let infy = db.get("INFY").await.unwrap().unwrap();
        assert!(infy.is_eligible());
        assert!(!infy.first_day_processed);
    }

    #[tokio::test]
    async fn test_reactivation_starts_fresh_episode() {
        let (feed, db, classifier) = setup(MockFeed::with_signal(&[])).await;
        anchor(&db, "SBIN").await;

        classifier.classify().await.unwrap();
        feed.set_signal(&["SBIN"]);
        let report = classifier.classify().await.unwrap();
        assert_eq!(report.activated, 1);

        let sbin = db.get("SBIN").await.unwrap().unwrap();
        assert!(sbin.is_eligible());
        assert_eq!(sbin.base_value, None);
        assert!(!sbin.first_day_processed);
    }

    #[tokio::test]
    async fn test_classification_is_idempotent() {
        let (_feed, db, classifier) = setup(MockFeed::with_signal(&["SBIN", "INFY"])).await;
        anchor(&db, "SBIN").await;
        db.configure("TCS", "11536", 1, 1, Utc::now()).await.unwrap();

        classifier.classify().await.unwrap();
        let first = db.get_all().await.unwrap();

        let report = classifier.classify().await.unwrap();
        let second = db.get_all().await.unwrap();

        assert_eq!(report.discovered + report.activated + report.deactivated, 0);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.instrument_name, b.instrument_name);
            assert_eq!(a.eligibility_status, b.eligibility_status);
            assert_eq!(a.base_value, b.base_value);
            assert_eq!(a.first_day_processed, b.first_day_processed);
        }
        assert_eq!(
            db.get("SBIN").await.unwrap().unwrap().base_value,
            Some(dec!(780.05))
        );
    }

    #[tokio::test]
    async fn test_unavailable_feed_mutates_nothing() {
        let feed = MockFeed::with_signal(&["INFY"]);
        for _ in 0..3 {
            feed.push_result(Err(GatewayError::Transient("connection reset".into())));
        }
        let (feed, db, classifier) = setup(feed).await;
        anchor(&db, "SBIN").await;
        let before = db.get_all().await.unwrap();

        let result = classifier.classify().await;
        assert!(matches!(result, Err(PassError::SignalUnavailable(_))));
        assert_eq!(count(&feed.calls), 3);

        let after = db.get_all().await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_recovers_within_retry_budget() {
        let feed = MockFeed::with_signal(&["SBIN"]);
        feed.push_result(Err(GatewayError::Transient("timeout".into())));
        let (feed, db, classifier) = setup(feed).await;

        let report = classifier.classify().await.unwrap();
        assert_eq!(report.discovered, 1);
        assert_eq!(count(&feed.calls), 2);
        assert!(db.get("SBIN").await.unwrap().is_some());
    }
}
