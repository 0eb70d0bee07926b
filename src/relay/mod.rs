//! Queue relay: a small authenticated HTTP front end to a message queue.
//!
//! Producers `POST /write` and consumers `GET /read`. The handler works on a
//! transport-neutral [`RelayRequest`] and keeps no state between calls; the
//! axum surface in [`http`] only converts requests and responses.
//!
//! ```text
//! request ──► authorize ──► diagnostics? ──► decode body ──► challenge?
//!                                                              │
//!                        ┌─────────────────────────────────────┘
//!                        ▼
//!               GET /read   → depth (count mode) or batch (list mode)
//!               POST /write → enqueue, "ok"
//!               otherwise   → 404
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use siren::relay::{RelayHandler, RelayOptions, RelayRequest};
//! use siren::relay::queue::MemoryQueue;
//! use std::sync::Arc;
//!
//! let handler = RelayHandler::new(RelayOptions::default(), Arc::new(MemoryQueue::new()));
//! let response = handler.handle(RelayRequest::new("GET", "/read")).await;
//! ```

pub mod body;
pub mod http;
pub mod queue;

use queue::{QueueConnector, QueueError, QueueMessage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BATCH_LIMIT: usize = 10;

/// An inbound request, independent of the HTTP server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub method: String,
    pub path: String,

    /// Header names are lowercased
    pub headers: BTreeMap<String, String>,

    pub query: BTreeMap<String, String>,

    pub body: Option<String>,

    /// Whether `body` is base64 text of the real bytes
    pub is_base64_encoded: bool,
}

impl RelayRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// The handler's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl RelayResponse {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        let body = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }
}

/// Relay behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// Shared secret; `None` (or empty) authorizes nothing
    pub api_key: Option<String>,
    pub skip_authorization: bool,
    pub allow_diagnostics: bool,

    /// `/read` answers with the queue depth and drains the queue
    pub return_only_message_count: bool,

    /// List mode returns envelopes instead of bodies
    pub return_full_message: bool,

    /// List mode leaves messages in the queue
    pub preserve_messages: bool,
    pub batch_limit: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            skip_authorization: false,
            allow_diagnostics: false,
            return_only_message_count: true,
            return_full_message: false,
            preserve_messages: false,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }
}

/// Stateless request handler in front of a queue.
#[derive(Clone)]
pub struct RelayHandler {
    options: RelayOptions,
    connector: Arc<dyn QueueConnector>,
}

impl RelayHandler {
    pub fn new(options: RelayOptions, connector: Arc<dyn QueueConnector>) -> Self {
        Self { options, connector }
    }

    /// Handle one request.
    pub async fn handle(&self, request: RelayRequest) -> RelayResponse {
        if !self.options.skip_authorization && !self.is_authorized(&request) {
            warn!(
                method = %request.method,
                path = %request.path,
                "Unauthorized relay request"
            );
            return RelayResponse::text(401, "unauthorized");
        }

        let path = request.path.to_ascii_lowercase();
        let method = request.method.to_ascii_uppercase();

        if self.options.allow_diagnostics && path == "/diagnostics" {
            debug!("Serving diagnostics");
            return RelayResponse::json(200, &diagnostics(&request));
        }

        let message = body::decode_body(&request);

        if method == "POST" && is_truthy(message.get("challenge")) {
            info!("Answering challenge handshake");
            return RelayResponse::json(200, &message);
        }

        let outcome = match (method.as_str(), path.as_str()) {
            ("GET", "/read") => self.read().await,
            ("POST", "/write") => self.write(&message).await,
            _ => {
                debug!(method = %method, path = %path, "No relay route");
                return RelayResponse::text(404, "not found");
            }
        };

        outcome.unwrap_or_else(|e| {
            error!(error = %e, method = %method, path = %path, "Queue operation failed");
            RelayResponse::json(502, &json!({ "error": e.to_string() }))
        })
    }

    fn is_authorized(&self, request: &RelayRequest) -> bool {
        let Some(secret) = self.options.api_key.as_deref().filter(|s| !s.is_empty()) else {
            return false;
        };

        let header_matches = request.header("authorization").is_some_and(|value| {
            let parts: Vec<&str> = value.split_whitespace().collect();
            parts.len() == 2 && secret_matches(parts[1], secret)
        });

        header_matches
            || request
                .query
                .get("key")
                .is_some_and(|key| secret_matches(key, secret))
    }

    async fn read(&self) -> Result<RelayResponse, QueueError> {
        let mut queue = self.connector.connect().await?;

        if self.options.return_only_message_count {
            let depth = queue.depth().await?;
            if depth > 0 {
                queue.purge().await?;
            }
            info!(depth = depth, "Relay read (count)");
            return Ok(RelayResponse::json(200, &json!(depth)));
        }

        let delete = !self.options.preserve_messages;
        let limit = self.options.batch_limit;
        let messages = queue.receive(limit, delete).await?;

        if delete && limit > 0 && messages.len() >= limit {
            if let Err(e) = queue.purge().await {
                warn!(error = %e, "Failed to purge remaining messages after full batch");
            }
        }

        info!(count = messages.len(), deleted = delete, "Relay read (list)");

        let items: Vec<Value> = messages
            .into_iter()
            .map(|message| self.render_message(message))
            .collect::<Result<_, _>>()?;
        Ok(RelayResponse::json(200, &Value::Array(items)))
    }

    fn render_message(&self, message: QueueMessage) -> Result<Value, QueueError> {
        if self.options.return_full_message {
            return Ok(serde_json::to_value(message)?);
        }
        Ok(serde_json::from_str(&message.body).unwrap_or(Value::String(message.body)))
    }

    async fn write(&self, message: &Value) -> Result<RelayResponse, QueueError> {
        let mut queue = self.connector.connect().await?;
        let stored = queue.send(&message.to_string()).await?;
        info!(id = %stored.id, "Relay write");
        Ok(RelayResponse::text(200, "ok"))
    }
}

/// Constant-time credential check. Both sides are compared as SHA-256
/// digests, so the time taken depends on neither their length nor the
/// position of the first mismatch.
fn secret_matches(presented: &str, secret: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let secret = Sha256::digest(secret.as_bytes());
    presented
        .iter()
        .zip(secret.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// JSON truthiness: null, false, 0, "" and empty containers are false.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn diagnostics(request: &RelayRequest) -> Value {
    let environ: Map<String, Value> = std::env::vars_os()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                Value::String(v.to_string_lossy().into_owned()),
            )
        })
        .collect();

    let mut value = serde_json::to_value(request).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut value {
        map.insert("environ".to_string(), Value::Object(environ));
    }
    value
}
