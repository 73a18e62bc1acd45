//! Order model: requests sent to the broker and what came back.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
        }
    }
}

/// A market order for a whole number of units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub token: String,
    pub symbol: String,
    pub quantity: u32,
    pub side: OrderSide,
}

/// Broker acknowledgement of a placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: String,
}

/// Status of an order as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    /// Accepted but not yet terminal
    Pending,

    /// Not in the order book yet (listing lag), treated like `Pending`
    NotListed,

    Executed { price: Decimal },

    /// Rejected by the exchange or cancelled administratively
    Rejected { reason: String },
}

/// Final result of executing one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Executed { order_id: String, price: Decimal },

    /// Accepted, then rejected or cancelled by the exchange
    Rejected { order_id: String, reason: String },

    /// Poll budget exhausted while the order was still pending
    Unconfirmed { order_id: String },
}

impl ExecutionOutcome {
    pub fn journal_status(&self) -> &'static str {
        match self {
            ExecutionOutcome::Executed { .. } => "executed",
            ExecutionOutcome::Rejected { .. } => "rejected",
            ExecutionOutcome::Unconfirmed { .. } => "unconfirmed",
        }
    }
}
