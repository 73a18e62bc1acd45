//! Rupeezy Vortex client: quotes, funds, order placement and order history.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::GatewayError;
use crate::models::{OrderAck, OrderRequest, OrderStatus};
use crate::trading::OrderSettings;

use super::gateway::Broker;
use super::types::*;

pub const VORTEX_BASE_URL: &str = "https://vortex-api.rupeezy.in/v2";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the Vortex trading API.
pub struct VortexClient {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: String,
    orders: OrderSettings,
}

impl VortexClient {
    pub fn new(api_key: &str, access_token: &str, orders: OrderSettings) -> Result<Self> {
        Self::with_base_url(VORTEX_BASE_URL.to_string(), api_key, access_token, orders)
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(
        base_url: String,
        api_key: &str,
        access_token: &str,
        orders: OrderSettings,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: access_token.to_string(),
            orders,
        })
    }

    /// Build from `RUPEEZY_API_KEY`, `RUPEEZY_ACCESS_TOKEN` and optionally
    /// `RUPEEZY_BASE_URL`.
    pub fn from_env(orders: OrderSettings) -> Result<Self> {
        let api_key = env::var("RUPEEZY_API_KEY").context("RUPEEZY_API_KEY not set")?;
        let access_token =
            env::var("RUPEEZY_ACCESS_TOKEN").context("RUPEEZY_ACCESS_TOKEN not set")?;
        let base_url = env::var("RUPEEZY_BASE_URL").unwrap_or_else(|_| VORTEX_BASE_URL.to_string());

        Self::with_base_url(base_url, &api_key, &access_token, orders)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .bearer_auth(&self.access_token)
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response, GatewayError> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &format!("{what}: {status} - {body}")))
    }

    async fn parse<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, GatewayError> {
        response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("failed to parse {what} response: {e}")))
    }
}

/// Map a non-success HTTP status onto the gateway error taxonomy.
fn classify_status(status: StatusCode, detail: &str) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GatewayError::Authentication(detail.to_string())
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            GatewayError::Transient(detail.to_string())
        }
        s if s.is_server_error() => GatewayError::Transient(detail.to_string()),
        _ => GatewayError::Rejected(detail.to_string()),
    }
}

/// Translate the latest order history entry into an [`OrderStatus`].
fn status_from_history(entries: &[OrderHistoryEntry]) -> OrderStatus {
    // The endpoint lists transitions oldest first.
    let Some(latest) = entries.last() else {
        return OrderStatus::NotListed;
    };

    match latest.status.to_ascii_uppercase().as_str() {
        "EXECUTED" | "COMPLETE" | "COMPLETED" => match latest.fill_price() {
            Some(price) => OrderStatus::Executed { price },
            None => OrderStatus::Pending,
        },
        "REJECTED" | "CANCELLED" | "CANCELED" => OrderStatus::Rejected {
            reason: latest
                .status_message
                .clone()
                .unwrap_or_else(|| latest.status.clone()),
        },
        _ => OrderStatus::Pending,
    }
}

/// Interpret a 2xx placement reply. A success without an order id leaves the
/// order state unknown.
fn ack_from_reply(envelope: VortexEnvelope<PlaceOrderData>) -> Result<OrderAck, GatewayError> {
    if !envelope.is_success() {
        return Err(GatewayError::Rejected(
            envelope.message.unwrap_or_else(|| "order not accepted".to_string()),
        ));
    }

    envelope
        .data
        .map(|d| OrderAck { order_id: d.order_id })
        .ok_or_else(|| GatewayError::Ambiguous("order accepted without an order id".to_string()))
}

/// Quotes are tick-rounded to two decimals; a zero LTP means no usable price.
fn normalize_quote(token: &str, ltp: Decimal) -> Result<Decimal, GatewayError> {
    let price = ltp.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if price <= Decimal::ZERO {
        return Err(GatewayError::Unavailable(format!("no last traded price for token {token}")));
    }
    Ok(price)
}

#[async_trait]
impl Broker for VortexClient {
    async fn quote(&self, token: &str) -> Result<Decimal, GatewayError> {
        let key = format!("{}-{}", self.orders.exchange, token);
        let url = format!("{}/data/quote", self.base_url);
        debug!(instrument = %key, "Fetching quote");

        let request = self.client.get(&url).query(&[("q", key.as_str()), ("mode", "ltp")]);
        let response = self.send(request, "quote").await.map_err(|e| match e {
            GatewayError::Rejected(detail) => GatewayError::Unavailable(detail),
            other => other,
        })?;

        let envelope: VortexEnvelope<QuoteData> = Self::parse(response, "quote").await?;
        let entry = envelope
            .data
            .and_then(|mut data| data.remove(&key))
            .ok_or_else(|| GatewayError::Unavailable(format!("quote missing for {key}")))?;

        normalize_quote(token, entry.last_trade_price)
    }

    async fn available_funds(&self) -> Result<Decimal, GatewayError> {
        let url = format!("{}/user/funds", self.base_url);
        let response = self.send(self.client.get(&url), "funds").await?;
        let funds: FundsResponse = Self::parse(response, "funds").await?;

        Ok(funds.nse.map(|s| s.net_available).unwrap_or(Decimal::ZERO))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let token: i64 = request.token.trim().parse().map_err(|_| {
            GatewayError::Rejected(format!(
                "broker token {:?} for {} is not numeric",
                request.token, request.symbol
            ))
        })?;

        let body = PlaceOrderBody {
            exchange: &self.orders.exchange,
            token,
            transaction_type: request.side.as_str(),
            product: &self.orders.product,
            variety: &self.orders.variety,
            quantity: request.quantity,
            price: 0.0,
            trigger_price: 0.0,
            disclosed_quantity: 0,
            validity: &self.orders.validity,
            validity_days: 1,
            is_amo: false,
        };

        debug!(symbol = %request.symbol, token, quantity = request.quantity, "Placing order");

        let url = format!("{}/trading/orders/regular", self.base_url);
        let response = self.send(self.client.post(&url).json(&body), "place order").await?;

        // Past this point the broker has answered 2xx; nothing below may be retried.
        let envelope: VortexEnvelope<PlaceOrderData> = response
            .json()
            .await
            .map_err(|e| GatewayError::Ambiguous(format!("unreadable place order reply: {e}")))?;

        ack_from_reply(envelope)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, GatewayError> {
        let url = format!("{}/trading/orders/{}", self.base_url, order_id);
        let response = self.authorized(self.client.get(&url)).send().await?;
        let status = response.status();
        // Fresh orders can take a moment to appear in the order book.
        if status == StatusCode::NOT_FOUND {
            return Ok(OrderStatus::NotListed);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &format!("order history: {status} - {body}")));
        }

        let envelope: VortexEnvelope<Vec<OrderHistoryEntry>> =
            Self::parse(response, "order history").await?;

        Ok(status_from_history(envelope.data.as_deref().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use rust_decimal_macros::dec;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::models::OrderSide;
    use crate::retry::RetryPolicy;
    use crate::testing::count;
    use crate::trading::OrderExecutor;

    /// Local HTTP server answering every request with `200` and `body`.
    /// Returns its base URL and a request counter.
    async fn serve_ok(body: &'static str) -> (String, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicU32::new(0));

        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    read_request(&mut socket).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    let reply = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(reply.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (base_url, hits)
    }

    /// Read one request: headers, then `content-length` bytes of body.
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    async fn place_against(body: &'static str) -> (Result<OrderAck, GatewayError>, u32) {
        let (base_url, posts) = serve_ok(body).await;
        let client =
            VortexClient::with_base_url(base_url, "key", "token", OrderSettings::default()).unwrap();
        let executor =
            OrderExecutor::new(Arc::new(client), RetryPolicy::immediate(3), RetryPolicy::immediate(1));

        let request = OrderRequest {
            token: "3045".into(),
            symbol: "SBIN".into(),
            quantity: 10,
            side: OrderSide::Buy,
        };
        let result = executor.place(&request).await;
        (result, count(&posts))
    }

    #[tokio::test]
    async fn test_accepted_without_order_id_is_sent_once() {
        let (result, posts) = place_against(r#"{"status":"success","data":null}"#).await;

        assert_eq!(
            result,
            Err(GatewayError::Ambiguous("order accepted without an order id".into()))
        );
        assert_eq!(posts, 1);
    }

    #[tokio::test]
    async fn test_unreadable_placement_reply_is_sent_once() {
        let (result, posts) = place_against("<html>order received</html>").await;

        assert!(matches!(result, Err(GatewayError::Ambiguous(_))));
        assert_eq!(posts, 1);
    }

    #[tokio::test]
    async fn test_accepted_placement_returns_order_id() {
        let (result, posts) =
            place_against(r#"{"status":"success","data":{"orderId":"NXAAE00012345"}}"#).await;

        assert_eq!(result, Ok(OrderAck { order_id: "NXAAE00012345".into() }));
        assert_eq!(posts, 1);
    }

    #[test]
    fn test_ack_from_reply() {
        let refused = VortexEnvelope::<PlaceOrderData> {
            status: "error".into(),
            message: Some("RMS: margin exceeds".into()),
            data: None,
        };
        assert_eq!(
            ack_from_reply(refused),
            Err(GatewayError::Rejected("RMS: margin exceeds".into()))
        );

        let no_id = VortexEnvelope::<PlaceOrderData> {
            status: "success".into(),
            message: None,
            data: None,
        };
        assert!(matches!(ack_from_reply(no_id), Err(GatewayError::Ambiguous(_))));
    }

    fn entry(status: &str, avg: Option<Decimal>, msg: Option<&str>) -> OrderHistoryEntry {
        OrderHistoryEntry {
            status: status.into(),
            order_price: None,
            average_price: avg,
            status_message: msg.map(String::from),
        }
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::UNAUTHORIZED, "").is_authentication());
        assert!(classify_status(StatusCode::FORBIDDEN, "").is_authentication());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, "margin"),
            GatewayError::Rejected("margin".into())
        );
    }

    #[test]
    fn test_status_from_history() {
        assert_eq!(status_from_history(&[]), OrderStatus::NotListed);
        assert_eq!(
            status_from_history(&[entry("OPEN", None, None), entry("EXECUTED", Some(dec!(780.05)), None)]),
            OrderStatus::Executed { price: dec!(780.05) }
        );
        // Executed without a price is not usable yet.
        assert_eq!(status_from_history(&[entry("EXECUTED", None, None)]), OrderStatus::Pending);
        assert_eq!(
            status_from_history(&[entry("REJECTED", None, Some("RMS: margin exceeds"))]),
            OrderStatus::Rejected { reason: "RMS: margin exceeds".into() }
        );
        assert_eq!(status_from_history(&[entry("PENDING", None, None)]), OrderStatus::Pending);
    }

    #[test]
    fn test_normalize_quote() {
        assert_eq!(normalize_quote("3045", dec!(812.455)).unwrap(), dec!(812.46));
        assert_eq!(normalize_quote("3045", dec!(812.4)).unwrap(), dec!(812.40));
        assert!(matches!(normalize_quote("3045", Decimal::ZERO), Err(GatewayError::Unavailable(_))));
    }
}
