//! Webhook Effect - one HTTP request per accepted alert.
//!
//! The request shape follows the configured method and `Content-Type`:
//!
//! ```text
//! Method                     | Content-Type           | Alert fields go to
//! ---------------------------|------------------------|-------------------
//! GET, HEAD, DELETE, OPTIONS | any                    | query string
//! anything else              | JSON media type        | JSON body
//! anything else              | anything else          | form-encoded body
//! ```
//!
//! Static parameters always go to the query string. `Content-Type` defaults
//! to `application/json` when no header sets it.
//!
//! # Example
//!
//! ```rust,ignore
//! use siren::effects::WebhookEffect;
//! use std::time::Duration;
//!
//! let effect = WebhookEffect::new("https://maker.ifttt.com/trigger/alert/with/key/...")
//!     .with_method("GET")
//!     .with_param("source", "siren")
//!     .with_timeout(Duration::from_secs(10));
//! ```

use super::{Effect, EffectError, EffectResult};
use crate::event::AlertEvent;
use crate::media::is_json_content_type;
use async_trait::async_trait;
use reqwest::{Client, Method, Request};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

/// Default timeout for webhook requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Content type assumed when none is configured
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Methods that carry alert fields in the query string instead of a body
fn is_bodyless(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::DELETE, Method::OPTIONS].contains(method)
}

/// An effect that sends each alert to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookEffect {
    /// Target URL for the webhook
    url: String,

    /// HTTP client (reused for connection pooling)
    client: Client,

    /// HTTP method, case-insensitive
    method: String,

    /// Static request headers
    headers: Vec<(String, String)>,

    /// Static query parameters
    params: Vec<(String, String)>,

    /// Request timeout
    timeout: Duration,
}

impl WebhookEffect {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            method: "POST".to_string(),
            headers: Vec::new(),
            params: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The effective `Content-Type`
    fn content_type(&self) -> &str {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// Build the request for one alert
    fn build_request(&self, event: &AlertEvent) -> Result<Request, EffectError> {
        let method = Method::from_bytes(self.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| EffectError::InvalidRequest(format!("bad method '{}'", self.method)))?;

        let mut builder = self
            .client
            .request(method.clone(), &self.url)
            .timeout(self.timeout);

        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let has_content_type = self
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        if !has_content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, DEFAULT_CONTENT_TYPE);
        }
        let content_type = self.content_type();

        let mut query = self.params.clone();
        if is_bodyless(&method) {
            for (key, value) in event.form_fields() {
                match query.iter_mut().find(|(k, _)| *k == key) {
                    Some(existing) => existing.1 = value,
                    None => query.push((key, value)),
                }
            }
        } else if is_json_content_type(content_type) {
            builder = builder.json(&Value::Object(event.to_object()));
        } else {
            builder = builder.form(&event.form_fields());
        }

        if !query.is_empty() {
            builder = builder.query(&query);
        }

        builder
            .build()
            .map_err(|e| EffectError::InvalidRequest(e.to_string()))
    }

    /// Send one alert
    async fn deliver(&self, event: &AlertEvent) -> Result<u16, EffectError> {
        let request = self.build_request(event)?;

        debug!(
            url = %self.url,
            method = %request.method(),
            alert_date = %event.alert_date,
            "Sending webhook"
        );

        let response = self.client.execute(request).await?;
        let status = response.status();

        if status.is_success() {
            info!(
                url = %self.url,
                status = %status,
                alert_date = %event.alert_date,
                "Webhook delivered successfully"
            );
            Ok(status.as_u16())
        } else {
            error!(
                url = %self.url,
                status = %status,
                alert_date = %event.alert_date,
                "Webhook delivery failed"
            );
            Err(EffectError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl Effect for WebhookEffect {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn execute(&self, events: &[AlertEvent]) -> Result<EffectResult, EffectError> {
        let mut first_error = None;
        let mut statuses = Vec::with_capacity(events.len());

        for event in events {
            match self.deliver(event).await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(EffectResult::with_metadata(
            self.name(),
            format!("Webhook delivered {} alert(s) to {}", statuses.len(), self.url),
            json!({
                "url": self.url,
                "method": self.method.to_ascii_uppercase(),
                "statuses": statuses,
            }),
        ))
    }
}
