//! Log Effect - structured logging of accepted alerts.
//!
//! ```rust,ignore
//! use siren::effects::LogEffect;
//!
//! let effect = LogEffect::with_prefix("alerts");
//! ```

use super::{Effect, EffectError, EffectResult};
use crate::event::AlertEvent;
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use tracing::info;

/// An effect that writes every accepted alert to the log.
#[derive(Debug, Clone)]
pub struct LogEffect {
    prefix: String,
}

impl LogEffect {
    pub fn new() -> Self {
        Self {
            prefix: "alert".to_string(),
        }
    }

    /// The prefix appears in each log line, useful to tell several
    /// watchers apart in shared logs.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LogEffect {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Effect for LogEffect {
    fn name(&self) -> &str {
        "log"
    }

    async fn execute(&self, events: &[AlertEvent]) -> Result<EffectResult, EffectError> {
        for event in events {
            let title = event
                .extra
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("alert");

            info!(
                prefix = %self.prefix,
                alert_date = %event.alert_date,
                fingerprint = %Fingerprint::of(event),
                payload = %event.payload_text(),
                "[{}] {}: {}",
                self.prefix,
                title,
                event.payload_text()
            );
        }

        Ok(EffectResult::success(
            self.name(),
            format!("Logged {} alert(s) with prefix '{}'", events.len(), self.prefix),
        ))
    }
}
