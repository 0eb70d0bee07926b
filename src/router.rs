//! Dispatch Router - fans accepted alerts out to every registered sink.
//!
//! # Execution Order
//!
//! Effects run sequentially in registration order:
//!
//! ```text
//! accepted = [a1, a2]
//!     │
//!     ▼
//! ┌─────────────────────────────────────┐
//! │            ROUTER                   │
//! │                                     │
//! │  log      (per event)  a1, a2       │
//! │  webhook  (per event)  a1, a2       │
//! │  signal   (per cycle)  [a1, a2]     │
//! └─────────────────────────────────────┘
//! ```
//!
//! A failing effect never stops the others. Every outcome is collected in
//! the [`DispatchReport`].
//!
//! # Example
//!
//! ```rust,ignore
//! use siren::Router;
//! use siren::effects::{LogEffect, WebhookEffect};
//! use std::sync::Arc;
//!
//! let mut router = Router::new();
//! router.register(Arc::new(LogEffect::new()));
//! router.register(Arc::new(WebhookEffect::new("https://example.com/hook")));
//! let report = router.dispatch(&accepted).await;
//! ```

use crate::effects::{Cadence, Effect, EffectError, EffectResult};
use crate::event::AlertEvent;
use std::slice;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during routing.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("effect '{effect_name}' failed for alert at {alert_date}: {source}")]
    EventFailed {
        effect_name: String,
        alert_date: String,
        #[source]
        source: EffectError,
    },

    #[error("effect '{effect_name}' failed for batch of {batch_size}: {source}")]
    BatchFailed {
        effect_name: String,
        batch_size: usize,
        #[source]
        source: EffectError,
    },
}

impl RouterError {
    pub fn effect_name(&self) -> &str {
        match self {
            RouterError::EventFailed { effect_name, .. }
            | RouterError::BatchFailed { effect_name, .. } => effect_name,
        }
    }
}

/// Result of dispatching one batch of alerts.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Number of alerts dispatched
    pub alerts: usize,

    /// Number of effect invocations
    pub effects_executed: usize,

    /// Results from successful effect executions
    pub results: Vec<EffectResult>,

    /// Errors from failed effect executions
    pub errors: Vec<RouterError>,
}

impl DispatchReport {
    /// Returns true if all effects executed successfully
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.errors.len()
    }
}

/// Sequential fan-out of alerts to effects.
pub struct Router {
    effects: Vec<Arc<dyn Effect>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            effects: Vec::new(),
        }
    }

    /// Register an effect. Effects run in registration order.
    pub fn register(&mut self, effect: Arc<dyn Effect>) {
        debug!(
            effect_name = %effect.name(),
            cadence = ?effect.cadence(),
            "Registering effect"
        );
        self.effects.push(effect);
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    pub fn effect_names(&self) -> Vec<&str> {
        self.effects.iter().map(|e| e.name()).collect()
    }

    /// Dispatch accepted alerts to every effect.
    ///
    /// An empty batch invokes nothing, per-cycle effects included.
    pub async fn dispatch(&self, events: &[AlertEvent]) -> DispatchReport {
        let mut report = DispatchReport {
            alerts: events.len(),
            ..Default::default()
        };

        if events.is_empty() {
            return report;
        }

        if self.effects.is_empty() {
            warn!(alerts = events.len(), "No effects registered, alerts dropped");
            return report;
        }

        info!(
            alerts = events.len(),
            effects = ?self.effect_names(),
            "Dispatching {} alert(s)",
            events.len()
        );

        for effect in &self.effects {
            match effect.cadence() {
                Cadence::PerEvent => {
                    for event in events {
                        report.effects_executed += 1;
                        match effect.execute(slice::from_ref(event)).await {
                            Ok(result) => {
                                debug!(
                                    effect_name = %effect.name(),
                                    message = %result.message,
                                    "Effect executed successfully"
                                );
                                report.results.push(result);
                            }
                            Err(e) => {
                                let error = RouterError::EventFailed {
                                    effect_name: effect.name().to_string(),
                                    alert_date: event.alert_date.clone(),
                                    source: e,
                                };
                                warn!(error = %error, "Effect execution failed");
                                report.errors.push(error);
                            }
                        }
                    }
                }
                Cadence::PerCycle => {
                    report.effects_executed += 1;
                    match effect.execute(events).await {
                        Ok(result) => {
                            debug!(
                                effect_name = %effect.name(),
                                message = %result.message,
                                "Effect executed successfully"
                            );
                            report.results.push(result);
                        }
                        Err(e) => {
                            let error = RouterError::BatchFailed {
                                effect_name: effect.name().to_string(),
                                batch_size: events.len(),
                                source: e,
                            };
                            warn!(error = %error, "Effect execution failed");
                            report.errors.push(error);
                        }
                    }
                }
            }
        }

        if report.is_success() {
            info!(
                alerts = report.alerts,
                effects_executed = report.effects_executed,
                "Alerts dispatched successfully"
            );
        } else {
            warn!(
                alerts = report.alerts,
                effects_executed = report.effects_executed,
                failures = report.failure_count(),
                "Alerts dispatched with failures"
            );
        }

        report
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every batch it receives; fails on alerts whose payload is "boom".
    struct RecordingEffect {
        name: &'static str,
        cadence: Cadence,
        calls: Mutex<Vec<usize>>,
    }

    impl RecordingEffect {
        fn new(name: &'static str, cadence: Cadence) -> Arc<Self> {
            Arc::new(Self {
                name,
                cadence,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Effect for RecordingEffect {
        fn name(&self) -> &str {
            self.name
        }

        fn cadence(&self) -> Cadence {
            self.cadence
        }

        async fn execute(&self, events: &[AlertEvent]) -> Result<EffectResult, EffectError> {
            self.calls.lock().push(events.len());
            if events.iter().any(|e| e.payload_text() == "boom") {
                return Err(EffectError::Failed("boom".into()));
            }
            Ok(EffectResult::success(self.name, "ok"))
        }
    }

    fn alerts(payloads: &[&str]) -> Vec<AlertEvent> {
        payloads
            .iter()
            .map(|p| AlertEvent::new("2024-04-14 01:42:10", *p))
            .collect()
    }

    #[tokio::test]
    async fn test_per_event_and_per_cycle() {
        let per_event = RecordingEffect::new("hook", Cadence::PerEvent);
        let per_cycle = RecordingEffect::new("signal", Cadence::PerCycle);

        let mut router = Router::new();
        router.register(per_event.clone());
        router.register(per_cycle.clone());

        let report = router.dispatch(&alerts(&["Haifa", "Acre", "Tyre"])).await;

        assert!(report.is_success());
        assert_eq!(report.alerts, 3);
        assert_eq!(report.effects_executed, 4);
        assert_eq!(*per_event.calls.lock(), vec![1, 1, 1]);
        assert_eq!(*per_cycle.calls.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_others() {
        let first = RecordingEffect::new("hook", Cadence::PerEvent);
        let second = RecordingEffect::new("log", Cadence::PerEvent);

        let mut router = Router::new();
        router.register(first.clone());
        router.register(second.clone());

        let report = router.dispatch(&alerts(&["boom", "Acre"])).await;

        assert_eq!(report.failure_count(), 2);
        assert_eq!(report.results.len(), 2);
        assert_eq!(*first.calls.lock(), vec![1, 1]);
        assert_eq!(*second.calls.lock(), vec![1, 1]);
        assert!(matches!(
            &report.errors[0],
            RouterError::EventFailed { effect_name, .. } if effect_name == "hook"
        ));
    }

    #[tokio::test]
    async fn test_batch_failure_recorded() {
        let per_cycle = RecordingEffect::new("signal", Cadence::PerCycle);
        let mut router = Router::new();
        router.register(per_cycle);

        let report = router.dispatch(&alerts(&["Haifa", "boom"])).await;
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.errors[0].effect_name(), "signal");
        assert!(matches!(
            report.errors[0],
            RouterError::BatchFailed { batch_size: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_batch_invokes_nothing() {
        let per_cycle = RecordingEffect::new("signal", Cadence::PerCycle);
        let mut router = Router::new();
        router.register(per_cycle.clone());

        let report = router.dispatch(&[]).await;
        assert_eq!(report.effects_executed, 0);
        assert!(per_cycle.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_effects() {
        let router = Router::new();
        let report = router.dispatch(&alerts(&["Haifa"])).await;
        assert!(report.is_success());
        assert_eq!(report.effects_executed, 0);
    }

    #[test]
    fn test_effect_names() {
        let mut router = Router::new();
        router.register(RecordingEffect::new("log", Cadence::PerEvent));
        router.register(RecordingEffect::new("signal", Cadence::PerCycle));
        assert_eq!(router.effect_count(), 2);
        assert_eq!(router.effect_names(), vec!["log", "signal"]);
    }
}
