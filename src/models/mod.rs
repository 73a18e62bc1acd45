//! Data models for instruments and orders.

mod instrument;
mod order;

pub use instrument::{EligibilityStatus, InstrumentRecord};
pub use order::{ExecutionOutcome, OrderAck, OrderRequest, OrderSide, OrderStatus};
