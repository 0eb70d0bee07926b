//! Filter engine - narrows a feed snapshot to alerts worth dispatching.
//!
//! An alert is accepted when all of the following hold, checked in order:
//!
//! 1. `now - alertDate <= max_age` (whole seconds; future-dated alerts have a
//!    negative age and count as recent)
//! 2. the configured location, if any, appears in the alert payload
//! 3. its fingerprint is not in the ledger
//!
//! Accepted fingerprints go into the ledger immediately, before any sink
//! runs, so a failed dispatch is never retried on the next cycle.

use crate::event::AlertEvent;
use crate::fingerprint::Fingerprint;
use crate::ledger::Ledger;
use chrono::NaiveDateTime;
use tracing::{debug, warn};

/// Default recency window in seconds
pub const DEFAULT_MAX_AGE_SECONDS: i64 = 300;

/// Recency, location and dedup filter.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    location: Option<String>,
    max_age_seconds: i64,
}

impl FilterEngine {
    pub fn new(max_age_seconds: i64) -> Self {
        Self {
            location: None,
            max_age_seconds,
        }
    }

    /// Only accept alerts whose payload contains `location`. An empty string
    /// leaves the filter unset.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        let location = location.into();
        self.location = if location.is_empty() { None } else { Some(location) };
        self
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn max_age_seconds(&self) -> i64 {
        self.max_age_seconds
    }

    /// Select the alerts to dispatch and record them in `ledger`.
    ///
    /// `now` is local wall-clock time, the same clock `alertDate` uses.
    pub fn accept(
        &self,
        events: Vec<AlertEvent>,
        ledger: &mut Ledger,
        now: NaiveDateTime,
    ) -> Vec<AlertEvent> {
        let mut accepted = Vec::new();

        for event in events {
            let timestamp = match event.timestamp() {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(error = %e, "Skipping alert with unparseable timestamp");
                    continue;
                }
            };

            let age = (now - timestamp).num_seconds();
            if age > self.max_age_seconds {
                continue;
            }

            if let Some(location) = &self.location {
                if !event.payload_text().contains(location.as_str()) {
                    continue;
                }
            }

            let fingerprint = Fingerprint::of(&event);
            if !ledger.insert(fingerprint.clone()) {
                continue;
            }

            debug!(
                fingerprint = %fingerprint,
                alert_date = %event.alert_date,
                age_seconds = age,
                "Alert accepted"
            );
            accepted.push(event);
        }

        accepted
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE_SECONDS)
    }
}
