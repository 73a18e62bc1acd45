//! Scripted stand-ins for the broker and signal feed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::api::{Broker, SignalFeed};
use crate::error::GatewayError;
use crate::models::{OrderAck, OrderRequest, OrderStatus};

/// Broker with per-token quotes and scripted responses.
///
/// Placements that are not scripted are accepted with ids `ORD-1`, `ORD-2`,
/// and so on. Status queries that are not scripted report the order as
/// executed at the token's current quote.
#[derive(Default)]
pub struct MockBroker {
    quotes: Mutex<HashMap<String, Result<Decimal, GatewayError>>>,
    funds: Mutex<VecDeque<Result<Decimal, GatewayError>>>,
    default_funds: Mutex<Decimal>,
    placements: Mutex<VecDeque<Result<OrderAck, GatewayError>>>,
    statuses: Mutex<HashMap<String, VecDeque<Result<OrderStatus, GatewayError>>>>,
    order_tokens: Mutex<HashMap<String, String>>,
    pub placed: Mutex<Vec<OrderRequest>>,
    pub quote_calls: AtomicU32,
    pub funds_calls: AtomicU32,
    pub place_calls: AtomicU32,
    pub status_calls: AtomicU32,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_funds(self, funds: Decimal) -> Self {
        *self.default_funds.lock().unwrap() = funds;
        self
    }

    pub fn set_quote(&self, token: &str, price: Decimal) {
        self.quotes.lock().unwrap().insert(token.to_string(), Ok(price));
    }

    pub fn fail_quote(&self, token: &str, error: GatewayError) {
        self.quotes.lock().unwrap().insert(token.to_string(), Err(error));
    }

    pub fn push_funds(&self, result: Result<Decimal, GatewayError>) {
        self.funds.lock().unwrap().push_back(result);
    }

    pub fn push_placement(&self, result: Result<OrderAck, GatewayError>) {
        self.placements.lock().unwrap().push_back(result);
    }

    pub fn push_status(&self, order_id: &str, result: Result<OrderStatus, GatewayError>) {
        self.statuses
            .lock()
            .unwrap()
            .entry(order_id.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn placed_quantities(&self) -> Vec<(String, u32)> {
        self.placed
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.symbol.clone(), r.quantity))
            .collect()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn quote(&self, token: &str) -> Result<Decimal, GatewayError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        self.quotes
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .unwrap_or_else(|| Err(GatewayError::Unavailable(format!("no quote for {token}"))))
    }

    async fn available_funds(&self) -> Result<Decimal, GatewayError> {
        self.funds_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.funds.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(*self.default_funds.lock().unwrap())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let n = self.place_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self
            .placements
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(OrderAck { order_id: format!("ORD-{n}") }));

        if let Ok(ack) = &result {
            self.placed.lock().unwrap().push(request.clone());
            self.order_tokens
                .lock()
                .unwrap()
                .insert(ack.order_id.clone(), request.token.clone());
        }
        result
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self
            .statuses
            .lock()
            .unwrap()
            .get_mut(order_id)
            .and_then(|q| q.pop_front())
        {
            return scripted;
        }

        let token = self.order_tokens.lock().unwrap().get(order_id).cloned();
        let Some(token) = token else {
            return Ok(OrderStatus::NotListed);
        };
        match self.quotes.lock().unwrap().get(&token) {
            Some(Ok(price)) => Ok(OrderStatus::Executed { price: *price }),
            _ => Ok(OrderStatus::Pending),
        }
    }
}

/// Signal feed returning a fixed set unless failures are scripted first.
#[derive(Default)]
pub struct MockFeed {
    signal: Mutex<HashSet<String>>,
    scripted: Mutex<VecDeque<Result<HashSet<String>, GatewayError>>>,
    pub calls: AtomicU32,
}

impl MockFeed {
    pub fn with_signal(codes: &[&str]) -> Self {
        let feed = Self::default();
        feed.set_signal(codes);
        feed
    }

    pub fn set_signal(&self, codes: &[&str]) {
        *self.signal.lock().unwrap() = codes.iter().map(|c| c.to_string()).collect();
    }

    pub fn push_result(&self, result: Result<HashSet<String>, GatewayError>) {
        self.scripted.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl SignalFeed for MockFeed {
    async fn fetch_signal_set(&self, _condition: &str) -> Result<HashSet<String>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.scripted.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(self.signal.lock().unwrap().clone())
    }
}

/// Current value of a call counter.
pub fn count(counter: &AtomicU32) -> u32 {
    counter.load(Ordering::SeqCst)
}
