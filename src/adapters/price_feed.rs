//! Price Oracle Client
//!
//! Fetches spot prices from a CoinGecko-compatible simple-price endpoint.
//! The settlement oracle is the only consumer; it talks through the
//! `PriceSource` trait so ground-truth checks can be tested against a mock.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::config::OracleConfig;
use crate::error::{QuarryError, Result};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn price_usd(&self, asset_id: &str) -> Result<Decimal>;
}

pub struct HttpPriceFeed {
    http: Client,
    endpoint: String,
    /// Unix millis of the last successful fetch, for health reporting
    last_success_ms: AtomicI64,
}

impl HttpPriceFeed {
    pub fn new(cfg: &OracleConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .user_agent(concat!("quarry/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.price_endpoint.clone(),
            last_success_ms: AtomicI64::new(0),
        })
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        match self.last_success_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }
}

#[async_trait]
impl PriceSource for HttpPriceFeed {
    async fn price_usd(&self, asset_id: &str) -> Result<Decimal> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("ids", asset_id), ("vs_currencies", "usd")])
            .send()
            .await
            .map_err(|e| QuarryError::PriceUnavailable {
                asset: asset_id.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuarryError::PriceUnavailable {
                asset: asset_id.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let quotes: HashMap<String, HashMap<String, Decimal>> =
            response
                .json()
                .await
                .map_err(|e| QuarryError::PriceUnavailable {
                    asset: asset_id.to_string(),
                    reason: format!("invalid quote body: {e}"),
                })?;

        let price = quotes
            .get(asset_id)
            .and_then(|by_ccy| by_ccy.get("usd"))
            .copied()
            .ok_or_else(|| QuarryError::PriceUnavailable {
                asset: asset_id.to_string(),
                reason: "asset missing from quote response".into(),
            })?;

        self.last_success_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        debug!(asset = asset_id, %price, "price fetched");
        Ok(price)
    }
}
