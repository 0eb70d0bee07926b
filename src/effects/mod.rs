//! Sinks for accepted alerts.
//!
//! Effects are actions triggered for alerts that passed the filter. The
//! [`Effect`] trait defines the interface every sink implements.
//!
//! ## Built-in Effects
//!
//! - [`LogEffect`]: Structured logging of each alert
//! - [`WebhookEffect`]: One HTTP request per alert, body shaped by content type
//! - [`SignalEffect`]: Pulse a pin on a Firmata board once per cycle
//!
//! ## Creating Custom Effects
//!
//! ```rust,ignore
//! use siren::{AlertEvent, Effect, EffectResult, EffectError};
//! use async_trait::async_trait;
//!
//! struct MyEffect;
//!
//! #[async_trait]
//! impl Effect for MyEffect {
//!     fn name(&self) -> &str {
//!         "my-effect"
//!     }
//!
//!     async fn execute(&self, events: &[AlertEvent]) -> Result<EffectResult, EffectError> {
//!         Ok(EffectResult::success(self.name(), "Did the thing"))
//!     }
//! }
//! ```

pub mod firmata;
pub mod log;
pub mod signal;
pub mod webhook;

use crate::event::AlertEvent;
use async_trait::async_trait;
use thiserror::Error;

pub use log::LogEffect;
pub use signal::SignalEffect;
pub use webhook::WebhookEffect;

/// Errors that can occur during effect execution.
#[derive(Error, Debug)]
pub enum EffectError {
    /// HTTP transport failure (connection, timeout, DNS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The receiver answered with a non-success status
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    /// The configured request could not be built
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No serial port matched a known controller
    #[error("signal device not found")]
    DeviceNotFound,

    /// Serial port I/O failed
    #[error("device I/O error: {0}")]
    Device(String),

    /// Generic effect failure
    #[error("effect failed: {0}")]
    Failed(String),
}

impl From<serialport::Error> for EffectError {
    fn from(e: serialport::Error) -> Self {
        EffectError::Device(e.to_string())
    }
}

impl From<std::io::Error> for EffectError {
    fn from(e: std::io::Error) -> Self {
        EffectError::Device(e.to_string())
    }
}

/// How often the router invokes an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Once for every accepted alert, with a one-element slice
    PerEvent,
    /// Once per poll cycle with at least one accepted alert, with the batch
    PerCycle,
}

/// Result of a successful effect execution.
#[derive(Debug, Clone)]
pub struct EffectResult {
    /// Name of the effect that produced this result
    pub effect_name: String,

    /// Human-readable message describing what happened
    pub message: String,

    /// Optional metadata from the effect execution
    pub metadata: Option<serde_json::Value>,
}

impl EffectResult {
    pub fn success(effect_name: &str, message: impl Into<String>) -> Self {
        Self {
            effect_name: effect_name.to_string(),
            message: message.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(
        effect_name: &str,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            effect_name: effect_name.to_string(),
            message: message.into(),
            metadata: Some(metadata),
        }
    }
}

/// The core Effect trait.
///
/// Effects must be `Send + Sync` to be shared behind `Arc` by the router.
#[async_trait]
pub trait Effect: Send + Sync {
    /// Returns the unique name of this effect (e.g., "log", "webhook", "signal")
    fn name(&self) -> &str;

    /// Invocation cadence; per alert unless overridden.
    fn cadence(&self) -> Cadence {
        Cadence::PerEvent
    }

    /// Execute the effect for the given alerts.
    ///
    /// Per-event effects receive exactly one alert.
    async fn execute(&self, events: &[AlertEvent]) -> Result<EffectResult, EffectError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TestEffect;

    #[async_trait]
    impl Effect for TestEffect {
        fn name(&self) -> &str {
            "test"
        }

        async fn execute(&self, events: &[AlertEvent]) -> Result<EffectResult, EffectError> {
            Ok(EffectResult::success("test", format!("{} alerts", events.len())))
        }
    }

    #[tokio::test]
    async fn test_default_cadence_is_per_event() {
        let effect = TestEffect;
        assert_eq!(effect.cadence(), Cadence::PerEvent);
        let result = effect
            .execute(&[AlertEvent::new("2024-01-01 00:00:00", "Haifa")])
            .await
            .unwrap();
        assert_eq!(result.message, "1 alerts");
    }

    #[test]
    fn test_effect_result() {
        let result = EffectResult::success("test", "Done");
        assert_eq!(result.effect_name, "test");
        assert_eq!(result.message, "Done");
        assert!(result.metadata.is_none());

        let result_with_meta = EffectResult::with_metadata("test", "Done", json!({"count": 42}));
        assert!(result_with_meta.metadata.is_some());
    }

    #[test]
    fn test_error_display() {
        let err = EffectError::Status {
            url: "https://hooks.example/x".into(),
            status: 502,
        };
        assert_eq!(err.to_string(), "https://hooks.example/x returned status 502");
        assert_eq!(EffectError::DeviceNotFound.to_string(), "signal device not found");
    }
}
