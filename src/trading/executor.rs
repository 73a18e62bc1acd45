//! Order executor: retried placement, then bounded status polling.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::api::Broker;
use crate::error::GatewayError;
use crate::models::{ExecutionOutcome, OrderAck, OrderRequest, OrderStatus};
use crate::retry::{retry, RetryPolicy};

pub struct OrderExecutor {
    broker: Arc<dyn Broker>,
    placement: RetryPolicy,
    poll: RetryPolicy,
}

impl OrderExecutor {
    pub fn new(broker: Arc<dyn Broker>, placement: RetryPolicy, poll: RetryPolicy) -> Self {
        Self { broker, placement, poll }
    }

    /// Submit an order, retrying only transient failures. A broker rejection
    /// comes back on the first attempt as `GatewayError::Rejected`, and an
    /// unreadable success reply as `GatewayError::Ambiguous`.
    pub async fn place(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let broker: &dyn Broker = self.broker.as_ref();

        let ack = retry(&self.placement, "place_order", GatewayError::is_retryable, move || {
            broker.place_order(request)
        })
        .await?;

        info!(
            symbol = %request.symbol,
            order_id = %ack.order_id,
            quantity = request.quantity,
            side = request.side.as_str(),
            "Order accepted"
        );
        Ok(ack)
    }

    /// Poll until the order reaches a terminal state or the poll budget runs
    /// out. Only an authentication failure is returned as an error.
    pub async fn confirm(&self, order_id: &str) -> Result<ExecutionOutcome, GatewayError> {
        let attempts = self.poll.attempts();

        for attempt in 1..=attempts {
            sleep(self.poll.delay()).await;

            match self.broker.order_status(order_id).await {
                Ok(OrderStatus::Executed { price }) => {
                    return Ok(ExecutionOutcome::Executed {
                        order_id: order_id.to_string(),
                        price,
                    });
                }
                Ok(OrderStatus::Rejected { reason }) => {
                    return Ok(ExecutionOutcome::Rejected {
                        order_id: order_id.to_string(),
                        reason,
                    });
                }
                Ok(status @ (OrderStatus::Pending | OrderStatus::NotListed)) => {
                    debug!(order_id = %order_id, attempt, attempts, status = ?status, "Order not final yet");
                }
                Err(e) if e.is_authentication() => return Err(e),
                Err(e) => {
                    warn!(order_id = %order_id, attempt, attempts, error = %e, "Order status check failed");
                }
            }
        }

        Ok(ExecutionOutcome::Unconfirmed { order_id: order_id.to_string() })
    }
}
