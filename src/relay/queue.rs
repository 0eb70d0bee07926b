//! Queue backends for the relay.
//!
//! Messages are stored as JSON envelopes in FIFO order. The Redis backend
//! keeps them in a list (`RPUSH` to write, `LPOP`/`LRANGE` to read); the
//! memory backend is a shared `VecDeque` for single-process use and tests.
//! `LPOP` with a count requires Redis 6.2 or later.
//!
//! ```rust,ignore
//! use siren::relay::queue::{QueueConnector, RedisConnector};
//!
//! let connector = RedisConnector::new("redis://localhost:6379", "siren:relay")?;
//! let mut queue = connector.connect().await?;
//! queue.send(r#"{"x":1}"#).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::{cmd, RedisError};
use deadpool_redis::{Config, Pool, PoolError, Runtime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Errors raised by a queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection failed: {0}")]
    Connection(String),

    #[error("queue command failed: {0}")]
    Command(#[from] RedisError),

    #[error("failed to encode queue message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<PoolError> for QueueError {
    fn from(e: PoolError) -> Self {
        QueueError::Connection(e.to_string())
    }
}

/// One stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Assigned on enqueue; empty for entries written by foreign producers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// The enqueued text, verbatim
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl QueueMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body: body.into(),
            enqueued_at: Some(Utc::now()),
        }
    }

    /// Decode a stored entry. Anything that is not an envelope is taken as
    /// a bare body.
    pub fn from_stored(raw: String) -> Self {
        match serde_json::from_str::<QueueMessage>(&raw) {
            Ok(message) => message,
            Err(_) => Self {
                id: String::new(),
                body: raw,
                enqueued_at: None,
            },
        }
    }
}

/// Operations the relay needs from a queue.
#[async_trait]
pub trait QueueBackend: Send {
    /// Append a message, returning the stored envelope
    async fn send(&mut self, body: &str) -> Result<QueueMessage, QueueError>;

    /// Approximate number of queued messages
    async fn depth(&mut self) -> Result<u64, QueueError>;

    /// Drop every queued message
    async fn purge(&mut self) -> Result<(), QueueError>;

    /// Take up to `max` messages from the head of the queue, removing them
    /// when `delete` is set.
    async fn receive(&mut self, max: usize, delete: bool) -> Result<Vec<QueueMessage>, QueueError>;
}

/// Opens a queue handle for one request.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn QueueBackend>, QueueError>;
}

/// Redis list backend, one pooled connection per request.
#[derive(Clone)]
pub struct RedisConnector {
    pool: Pool,
    key: String,
}

impl RedisConnector {
    /// Create the pool. No connection is made until the first request.
    pub fn new(url: &str, key: impl Into<String>) -> Result<Self, QueueError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            key: key.into(),
        })
    }
}

#[async_trait]
impl QueueConnector for RedisConnector {
    async fn connect(&self) -> Result<Box<dyn QueueBackend>, QueueError> {
        let conn = self.pool.get().await.map_err(|e| {
            error!(error = %e, "Failed to get Redis connection for relay queue");
            QueueError::from(e)
        })?;

        Ok(Box::new(RedisQueue {
            conn,
            key: self.key.clone(),
        }))
    }
}

struct RedisQueue {
    conn: deadpool_redis::Connection,
    key: String,
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn send(&mut self, body: &str) -> Result<QueueMessage, QueueError> {
        let message = QueueMessage::new(body);
        let encoded = serde_json::to_string(&message)?;

        let len: u64 = cmd("RPUSH")
            .arg(&self.key)
            .arg(encoded)
            .query_async(&mut self.conn)
            .await?;

        debug!(key = %self.key, id = %message.id, depth = len, "Message enqueued");
        Ok(message)
    }

    async fn depth(&mut self) -> Result<u64, QueueError> {
        let len: u64 = cmd("LLEN")
            .arg(&self.key)
            .query_async(&mut self.conn)
            .await?;
        Ok(len)
    }

    async fn purge(&mut self) -> Result<(), QueueError> {
        let removed: u64 = cmd("DEL")
            .arg(&self.key)
            .query_async(&mut self.conn)
            .await?;
        debug!(key = %self.key, removed = removed, "Queue purged");
        Ok(())
    }

    async fn receive(&mut self, max: usize, delete: bool) -> Result<Vec<QueueMessage>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let raw: Vec<String> = if delete {
            // LPOP with a count replies nil on an empty list
            let popped: Option<Vec<String>> = cmd("LPOP")
                .arg(&self.key)
                .arg(max)
                .query_async(&mut self.conn)
                .await?;
            popped.unwrap_or_default()
        } else {
            cmd("LRANGE")
                .arg(&self.key)
                .arg(0)
                .arg(max as i64 - 1)
                .query_async(&mut self.conn)
                .await?
        };

        Ok(raw.into_iter().map(QueueMessage::from_stored).collect())
    }
}

/// In-process queue. Clones share the same messages.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    messages: Arc<Mutex<VecDeque<QueueMessage>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl QueueConnector for MemoryQueue {
    async fn connect(&self) -> Result<Box<dyn QueueBackend>, QueueError> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn send(&mut self, body: &str) -> Result<QueueMessage, QueueError> {
        let message = QueueMessage::new(body);
        self.messages.lock().push_back(message.clone());
        Ok(message)
    }

    async fn depth(&mut self) -> Result<u64, QueueError> {
        Ok(self.messages.lock().len() as u64)
    }

    async fn purge(&mut self) -> Result<(), QueueError> {
        let mut messages = self.messages.lock();
        if !messages.is_empty() {
            warn!(dropped = messages.len(), "Purging in-memory queue");
        }
        messages.clear();
        Ok(())
    }

    async fn receive(&mut self, max: usize, delete: bool) -> Result<Vec<QueueMessage>, QueueError> {
        let mut messages = self.messages.lock();
        let take = max.min(messages.len());
        if delete {
            Ok(messages.drain(..take).collect())
        } else {
            Ok(messages.iter().take(take).cloned().collect())
        }
    }
}
