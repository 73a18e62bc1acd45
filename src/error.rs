//! Error taxonomy for the accumulation loop.
//!
//! Three layers:
//! - [`GatewayError`] for failures reported by external collaborators
//!   (broker API, signal feed).
//! - [`StoreError`] for the eligibility store.
//! - [`PassError`] for failures that abort an entire pass.
//!
//! Per-instrument failures never become a `PassError`; the coordinator turns
//! them into a logged outcome and moves on.

use rust_decimal::Decimal;
use thiserror::Error;

/// Failure reported by the broker or the signal feed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Network or HTTP-level failure. The only retryable kind.
    #[error("transient I/O failure: {0}")]
    Transient(String),

    /// Credentials were refused. Fatal for the whole pass.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The broker explicitly refused an order.
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// The requested data does not exist or is unusable (e.g. zero LTP).
    #[error("data unavailable: {0}")]
    Unavailable(String),

    /// The broker answered a placement with a success status but the reply
    /// could not be read. The order may be live and must not be resent.
    #[error("placement outcome unknown: {0}")]
    Ambiguous(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, GatewayError::Authentication(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(s) if s.as_u16() == 401 || s.as_u16() == 403 => {
                GatewayError::Authentication(err.to_string())
            }
            _ => GatewayError::Transient(err.to_string()),
        }
    }
}

/// Failure of an eligibility store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The guarded field no longer holds the expected value.
    #[error("conditional update conflict on {0}")]
    Conflict(String),

    #[error("instrument not found: {0}")]
    NotFound(String),

    /// A write to `base_value` was attempted without a guard.
    #[error("refusing unguarded base value write on {0}")]
    UnguardedBaseValue(String),

    /// Anchors must be strictly positive.
    #[error("invalid anchor price {price} for {name}")]
    InvalidAnchor { name: String, price: Decimal },

    /// A stored row could not be decoded into a record.
    #[error("corrupt row for {name}: {reason}")]
    Corrupt { name: String, reason: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Failure that aborts a pass.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("authentication failed, pass aborted: {0}")]
    Authentication(String),

    #[error("signal feed unavailable after retries: {0}")]
    SignalUnavailable(String),

    #[error("available funds could not be read: {0}")]
    FundsUnavailable(String),

    #[error("eligibility store failure: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(GatewayError::Transient("timeout".into()).is_retryable());
        assert!(!GatewayError::Rejected("margin".into()).is_retryable());
        assert!(!GatewayError::Authentication("expired".into()).is_retryable());
        assert!(!GatewayError::Unavailable("ltp 0".into()).is_retryable());
        assert!(!GatewayError::Ambiguous("no order id".into()).is_retryable());
    }
}
