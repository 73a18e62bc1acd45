//! Instrument record: the durable accumulation state of one tradable instrument.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whether the signal feed currently qualifies an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EligibilityStatus {
    Eligible,
    Ineligible,
}

impl EligibilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EligibilityStatus::Eligible => "Eligible",
            EligibilityStatus::Ineligible => "Ineligible",
        }
    }
}

impl fmt::Display for EligibilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EligibilityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Eligible" => Ok(Self::Eligible),
            "Ineligible" => Ok(Self::Ineligible),
            other => Err(format!("unknown eligibility status '{}'", other)),
        }
    }
}

/// Accumulation state for one instrument, keyed by `instrument_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    /// Exchange symbol, the identity key
    pub instrument_name: String,

    pub eligibility_status: EligibilityStatus,

    /// Anchor price of the current eligibility episode
    pub base_value: Option<Decimal>,

    /// True once the anchor purchase executed for the current episode
    pub first_day_processed: bool,

    /// Anchor purchase size, 0 disables the anchor purchase
    pub default_quantity: u32,

    /// Lot size per drop tier, 0 disables ladder buys
    pub additional_quantity: u32,

    /// Broker instrument token, unknown until configured
    pub broker_token: Option<String>,

    pub last_updated: DateTime<Utc>,
}

impl InstrumentRecord {
    /// A record first observed by the classifier: a fresh eligible episode
    /// with no automatic purchases configured yet.
    pub fn discovered(name: &str, now: DateTime<Utc>) -> Self {
        Self {
            instrument_name: name.to_string(),
            eligibility_status: EligibilityStatus::Eligible,
            base_value: None,
            first_day_processed: false,
            default_quantity: 0,
            additional_quantity: 0,
            broker_token: None,
            last_updated: now,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.eligibility_status == EligibilityStatus::Eligible
    }

    /// Check the record invariants:
    /// - `first_day_processed` implies a `base_value`, whatever the eligibility
    /// - `base_value` is set iff the record is eligible and anchored
    /// - an anchored record has a strictly positive `base_value`
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.first_day_processed && self.base_value.is_none() {
            return Err(format!(
                "{}: first day processed without base value",
                self.instrument_name
            ));
        }

        let anchored = self.is_eligible() && self.first_day_processed;
        match (anchored, self.base_value) {
            (true, Some(v)) if v > Decimal::ZERO => Ok(()),
            (true, Some(v)) => Err(format!(
                "{}: base value {} must be positive",
                self.instrument_name, v
            )),
            (true, None) => Err(format!(
                "{}: anchored record without base value",
                self.instrument_name
            )),
            (false, Some(v)) => Err(format!(
                "{}: base value {} set outside an anchored episode",
                self.instrument_name, v
            )),
            (false, None) => Ok(()),
        }
    }
}
