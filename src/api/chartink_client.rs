//! Chartink screener client. Produces the signal set from a scan clause.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::debug;

use crate::error::GatewayError;

use super::gateway::SignalFeed;
use super::types::ScanResponse;

const CHARTINK_BASE: &str = "https://chartink.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Scrapes the screener page for a CSRF token, then posts the scan clause.
pub struct ChartinkClient {
    client: Client,
    base_url: String,
    csrf_pattern: Regex,
}

impl ChartinkClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(CHARTINK_BASE.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        let csrf_pattern = Regex::new(r#"<meta\s+name="csrf-token"\s+content="([^"]+)""#)
            .context("Invalid CSRF pattern")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            csrf_pattern,
        })
    }

    fn extract_csrf(&self, page: &str) -> Option<String> {
        self.csrf_pattern
            .captures(page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    async fn csrf_token(&self) -> Result<String, GatewayError> {
        let url = format!("{}/screener/", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::Transient(format!(
                "screener page returned {}",
                response.status()
            )));
        }

        let page = response.text().await?;
        self.extract_csrf(&page)
            .ok_or_else(|| GatewayError::Transient("csrf token not found on screener page".to_string()))
    }
}

/// Trimmed, non-empty codes from a scan response.
fn signal_set(scan: ScanResponse) -> HashSet<String> {
    scan.data
        .into_iter()
        .map(|row| row.nsecode.trim().to_string())
        .filter(|code| !code.is_empty())
        .collect()
}

#[async_trait]
impl SignalFeed for ChartinkClient {
    async fn fetch_signal_set(&self, condition: &str) -> Result<HashSet<String>, GatewayError> {
        let token = self.csrf_token().await?;

        let url = format!("{}/screener/process", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-csrf-token", token)
            .form(&[("scan_clause", condition)])
            .send()
            .await?;

        // The screener has no credentials; every failure is worth another try.
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Transient(format!("scan failed: {status} - {body}")));
        }

        let scan: ScanResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("failed to parse scan response: {e}")))?;

        let signals = signal_set(scan);
        debug!(count = signals.len(), "Fetched signal set");
        Ok(signals)
    }
}
