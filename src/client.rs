//! HTTP client for provider product feeds
//!
//! One GET per provider per cycle against `{base_url}/products`, with a
//! per-request timeout and a bounded linear-backoff retry. A failure here is
//! scoped to the one provider; the aggregator keeps processing the others.

use std::time::Duration;

use serde_json::Value;

use crate::error::{Result, SyncError};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(1000);

/// Client for fetching raw provider payloads
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    max_attempts: u32,
    backoff: Duration,
}

impl ProviderClient {
    /// Build a client with the given per-request timeout and the default
    /// retry policy (3 attempts, linear backoff starting at 1s)
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_retry(timeout, DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF)
    }

    /// Build a client with an explicit retry policy
    pub fn with_retry(timeout: Duration, max_attempts: u32, backoff: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            max_attempts: max_attempts.max(1),
            backoff,
        })
    }

    /// Fetch the raw product list from a provider.
    ///
    /// Retries on network errors and non-2xx responses with linear backoff
    /// (attempt number times the base delay). Returns the last error once
    /// attempts are exhausted.
    pub async fn fetch_products(&self, base_url: &str) -> Result<Value> {
        let url = format!("{}/products", base_url.trim_end_matches('/'));

        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match self.try_fetch(&url).await {
                Ok(payload) => return Ok(payload),
                Err(e) => {
                    log::warn!(
                        "Fetch attempt {}/{} for {} failed: {}",
                        attempt,
                        self.max_attempts,
                        url,
                        e
                    );
                    last_err = Some(e);
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        // max_attempts >= 1, so at least one error was recorded
        Err(last_err.expect("at least one fetch attempt"))
    }

    async fn try_fetch(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .header("User-Agent", "catalog_sync/1.0")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::HttpStatus(response.status()));
        }

        Ok(response.json().await?)
    }
}
