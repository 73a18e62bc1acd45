//! Tiered decision engine: anchor purchases and drop-ladder buys.
//!
//! A record is first turned into a [`Plan`] (no I/O), then the plan is
//! resolved against a live quote into a [`Decision`].

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::InstrumentRecord;

/// A (threshold, multiplier) rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    /// Minimum percentage drop from the anchor, inclusive
    pub threshold_pct: Decimal,

    /// Lots of `additional_quantity` bought when this tier fires
    pub multiplier: u32,
}

impl Tier {
    pub const fn new(threshold_pct: Decimal, multiplier: u32) -> Self {
        Self { threshold_pct, multiplier }
    }
}

/// Tiers ordered from the highest threshold down; first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    tiers: Vec<Tier>,
}

impl TierTable {
    pub fn new(tiers: &[Tier]) -> Self {
        let mut tiers = tiers.to_vec();
        tiers.sort_by(|a, b| b.threshold_pct.cmp(&a.threshold_pct));
        Self { tiers }
    }

    pub fn select(&self, drop_pct: Decimal) -> Option<Tier> {
        self.tiers.iter().copied().find(|t| drop_pct >= t.threshold_pct)
    }
}

/// `(base - price) / base * 100`. Negative when the price rose.
pub fn percentage_drop(base_value: Decimal, price: Decimal) -> Decimal {
    if base_value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (base_value - price) / base_value * dec!(100)
}

/// Why a record takes no automatic action this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Ineligible,
    NoBrokerToken,
    ZeroDefaultQuantity,
    ZeroAdditionalQuantity,
    InvalidBaseValue,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::Ineligible => "ineligible",
            SkipReason::NoBrokerToken => "no broker token",
            SkipReason::ZeroDefaultQuantity => "default quantity is 0",
            SkipReason::ZeroAdditionalQuantity => "additional quantity is 0",
            SkipReason::InvalidBaseValue => "base value missing or not positive",
        };
        f.write_str(reason)
    }
}

/// What a record calls for, before looking at the market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// First purchase of the episode
    Anchor { quantity: u32 },

    /// Buy `multiplier × additional_quantity` if the price fell far enough
    Ladder { base_value: Decimal, additional_quantity: u32 },

    Skip(SkipReason),
}

/// Why an order is being placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Anchor,
    Ladder { multiplier: u32, drop_pct: Decimal },
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Anchor => "anchor",
            Purpose::Ladder { .. } => "ladder",
        }
    }

    pub fn multiplier(&self) -> u32 {
        match self {
            Purpose::Anchor => 1,
            Purpose::Ladder { multiplier, .. } => *multiplier,
        }
    }
}

/// A plan resolved against the current price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Buy {
        purpose: Purpose,
        quantity: u32,
        price: Decimal,
        estimated_cost: Decimal,
    },

    /// No tier fired. A normal outcome, not an error.
    Hold { drop_pct: Decimal },
}

impl Plan {
    pub fn for_record(record: &InstrumentRecord) -> Plan {
        if !record.is_eligible() {
            return Plan::Skip(SkipReason::Ineligible);
        }
        if record.broker_token.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Plan::Skip(SkipReason::NoBrokerToken);
        }

        if !record.first_day_processed {
            if record.default_quantity == 0 {
                return Plan::Skip(SkipReason::ZeroDefaultQuantity);
            }
            return Plan::Anchor { quantity: record.default_quantity };
        }

        let base_value = match record.base_value {
            Some(v) if v > Decimal::ZERO => v,
            _ => return Plan::Skip(SkipReason::InvalidBaseValue),
        };
        if record.additional_quantity == 0 {
            return Plan::Skip(SkipReason::ZeroAdditionalQuantity);
        }

        Plan::Ladder { base_value, additional_quantity: record.additional_quantity }
    }

    /// Resolve against `price`. `None` for [`Plan::Skip`].
    pub fn resolve(&self, price: Decimal, tiers: &TierTable) -> Option<Decision> {
        match *self {
            Plan::Skip(_) => None,
            Plan::Anchor { quantity } => Some(Decision::Buy {
                purpose: Purpose::Anchor,
                quantity,
                price,
                estimated_cost: Decimal::from(quantity) * price,
            }),
            Plan::Ladder { base_value, additional_quantity } => {
                let drop_pct = percentage_drop(base_value, price);
                let Some(tier) = tiers.select(drop_pct) else {
                    return Some(Decision::Hold { drop_pct });
                };

                let quantity = tier.multiplier.saturating_mul(additional_quantity);
                Some(Decision::Buy {
                    purpose: Purpose::Ladder { multiplier: tier.multiplier, drop_pct },
                    quantity,
                    price,
                    estimated_cost: Decimal::from(quantity) * price,
                })
            }
        }
    }
}
