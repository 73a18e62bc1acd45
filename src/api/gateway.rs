//! Seams to the external collaborators consumed by the accumulation loop.

use std::collections::HashSet;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::GatewayError;
use crate::models::{OrderAck, OrderRequest, OrderStatus};

/// Trading API: quotes, funds, order placement and status.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Last traded price for a broker instrument token.
    async fn quote(&self, token: &str) -> Result<Decimal, GatewayError>;

    /// Capital currently available for new orders.
    async fn available_funds(&self) -> Result<Decimal, GatewayError>;

    /// Submit a market order. An explicit refusal is `GatewayError::Rejected`.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError>;

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, GatewayError>;
}

/// Source of the boolean signal set that decides eligibility.
#[async_trait]
pub trait SignalFeed: Send + Sync {
    /// Instrument codes matching `condition` right now.
    async fn fetch_signal_set(&self, condition: &str) -> Result<HashSet<String>, GatewayError>;
}
