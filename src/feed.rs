//! Feed poller - fetches the current alert snapshot over HTTP.
//!
//! # Example
//!
//! ```rust,ignore
//! use siren::feed::FeedPoller;
//! use std::time::Duration;
//!
//! let poller = FeedPoller::new("https://www.oref.org.il/WarningMessages/History/AlertsHistory.json")
//!     .with_timeout(Duration::from_secs(10))
//!     .with_header("Referer", "https://www.oref.org.il/");
//! let events = poller.fetch().await?;
//! ```

use crate::event::AlertEvent;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default timeout for feed requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of body characters kept in a decode error
const BODY_SNIPPET_LEN: usize = 200;

/// Errors that can occur while fetching the feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Connection refused, timeout, DNS failure or non-success status
    #[error("feed request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response was not a JSON array of alert records
    #[error("feed response is not a JSON array of alerts: {source} (body: {body})")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

/// Anything that can produce the current alert snapshot.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Fetch every alert currently published.
    async fn fetch(&self) -> Result<Vec<AlertEvent>, FeedError>;
}

/// HTTP poller for a JSON alert feed.
#[derive(Debug, Clone)]
pub struct FeedPoller {
    url: String,
    client: Client,
    timeout: Duration,
    headers: Vec<(String, String)>,
}

impl FeedPoller {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            headers: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a static request header (some feeds require `Referer` or
    /// `X-Requested-With`)
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertSource for FeedPoller {
    async fn fetch(&self) -> Result<Vec<AlertEvent>, FeedError> {
        let mut request = self.client.get(&self.url).timeout(self.timeout);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?.error_for_status()?;
        let body = response.text().await?;

        let events = decode_snapshot(&body)?;
        debug!(url = %self.url, count = events.len(), "Feed fetched");
        Ok(events)
    }
}

/// Decode a feed body into alert records.
///
/// A leading byte-order mark is ignored and a blank body is an empty
/// snapshot. Only a body that is not a JSON array is an error; array
/// elements that are not alert records are skipped with a warning.
pub fn decode_snapshot(body: &str) -> Result<Vec<AlertEvent>, FeedError> {
    let body = body.trim_start_matches('\u{feff}').trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let records: Vec<Value> = serde_json::from_str(body).map_err(|source| FeedError::Decode {
        source,
        body: body.chars().take(BODY_SNIPPET_LEN).collect(),
    })?;

    let total = records.len();
    let events: Vec<AlertEvent> = records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match serde_json::from_value(record) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(index = index, error = %e, "Skipping malformed alert record");
                None
            }
        })
        .collect();

    if events.len() < total {
        warn!(
            skipped = total - events.len(),
            total = total,
            "Feed snapshot contained malformed records"
        );
    }

    Ok(events)
}
