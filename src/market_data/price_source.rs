// =============================================================================
// Price-bar source — daily bars per security over HTTP
// =============================================================================
//
// The source serves one JSON file per security at `{base}/stocks/{id}/all.json`
// containing every daily row ever recorded:
//
//   [["20240102", 104, 107, 103, 106, 1200], ...]
//
// Some files wrap the rows as `{ "data": [...] }`. Rows are sorted by date
// before filtering; duplicates are left for validation to reject.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, instrument, warn};

use crate::error::FetchError;
use crate::types::DailyBar;

/// Anything that can supply daily bars for a security.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Bars dated strictly after `since` (all bars when `None`), ascending.
    /// An empty vec means "no new data".
    async fn fetch_daily_bars(&self, security: &str, since: Option<NaiveDate>) -> Result<Vec<DailyBar>, FetchError>;
}

/// [`PriceSource`] backed by static JSON files served over HTTP.
#[derive(Clone)]
pub struct HttpPriceSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPriceSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, "HttpPriceSource initialised");
        Ok(Self { base_url, client })
    }

    pub fn url_for(&self, security: &str) -> String {
        format!("{}/stocks/{}/all.json", self.base_url, security)
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    #[instrument(skip(self), name = "price_source::fetch_daily_bars")]
    async fn fetch_daily_bars(&self, security: &str, since: Option<NaiveDate>) -> Result<Vec<DailyBar>, FetchError> {
        let url = self.url_for(security);

        let resp = self.client.get(&url).send().await.map_err(|source| FetchError::Http {
            security: security.to_string(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                security: security.to_string(),
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(|source| FetchError::Http {
            security: security.to_string(),
            source,
        })?;

        let bars = parse_bars(security, &body, since)?;
        debug!(security, count = bars.len(), ?since, "daily bars fetched");
        Ok(bars)
    }
}

/// Parse an `all.json` payload and keep bars strictly after `since`.
pub fn parse_bars(security: &str, body: &serde_json::Value, since: Option<NaiveDate>) -> Result<Vec<DailyBar>, FetchError> {
    let rows = body
        .as_array()
        .or_else(|| body.get("data").and_then(|d| d.as_array()))
        .ok_or_else(|| FetchError::Malformed {
            security: security.to_string(),
            reason: "payload is neither an array nor {\"data\": [...]}".to_string(),
        })?;

    let mut bars = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        match DailyBar::from_row(row) {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                warn!(security, index, error = %e, "unparseable bar row");
                return Err(FetchError::Malformed {
                    security: security.to_string(),
                    reason: format!("row {index}: {e:#}"),
                });
            }
        }
    }

    bars.sort_by_key(|b| b.date);
    if let Some(since) = since {
        bars.retain(|b| b.date > since);
    }
    Ok(bars)
}
