//! Request and response payloads for the Vortex trading API and the
//! Chartink screener.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Common response envelope of the Vortex API.
#[derive(Debug, Clone, Deserialize)]
pub struct VortexEnvelope<T> {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> VortexEnvelope<T> {
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }
}

/// Body of `POST /trading/orders/regular`.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderBody<'a> {
    pub exchange: &'a str,
    pub token: i64,
    pub transaction_type: &'a str,
    pub product: &'a str,
    pub variety: &'a str,
    pub quantity: u32,
    pub price: f64,
    pub trigger_price: f64,
    pub disclosed_quantity: u32,
    pub validity: &'a str,
    pub validity_days: u32,
    pub is_amo: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderData {
    #[serde(rename = "orderId")]
    pub order_id: String,
}

/// One state transition from the order history endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderHistoryEntry {
    pub status: String,
    #[serde(default)]
    pub order_price: Option<Decimal>,
    #[serde(default)]
    pub average_price: Option<Decimal>,
    #[serde(default)]
    pub status_message: Option<String>,
}

impl OrderHistoryEntry {
    /// Fill price: average price when reported, else order price.
    pub fn fill_price(&self) -> Option<Decimal> {
        self.average_price
            .filter(|p| *p > Decimal::ZERO)
            .or(self.order_price.filter(|p| *p > Decimal::ZERO))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteEntry {
    #[serde(default)]
    pub last_trade_price: Decimal,
}

pub type QuoteData = HashMap<String, QuoteEntry>;

#[derive(Debug, Clone, Deserialize)]
pub struct FundsResponse {
    #[serde(default)]
    pub nse: Option<FundsSegment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundsSegment {
    #[serde(default)]
    pub net_available: Decimal,
}

/// Chartink `screener/process` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanResponse {
    #[serde(default)]
    pub data: Vec<ScanRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanRow {
    pub nsecode: String,
}
