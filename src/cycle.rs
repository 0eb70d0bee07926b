//! The poll loop: fetch, filter, persist, dispatch, sleep.
//!
//! Cycles never overlap. A feed failure counts as an empty snapshot and
//! sink failures are reported but never stop the loop; only a failed ledger
//! save ends it. Shutdown is observed while sleeping between cycles, so an
//! in-flight cycle always runs to completion.

use crate::feed::AlertSource;
use crate::filter::FilterEngine;
use crate::ledger::{Ledger, LedgerError, LedgerStore};
use crate::router::{DispatchReport, Router};
use crate::shutdown::ShutdownSignal;
use chrono::{Local, NaiveDateTime};
use std::time::Duration;
use tracing::{error, info, warn};

/// Summary of one cycle.
#[derive(Debug)]
pub struct CycleReport {
    /// Alerts in the feed snapshot (0 when the fetch failed)
    pub fetched: usize,

    /// Whether the fetch failed
    pub fetch_failed: bool,

    /// Alerts that passed the filter
    pub accepted: usize,

    /// Sink outcomes
    pub dispatch: DispatchReport,
}

/// Owns the ledger and everything one cycle needs.
pub struct PollCycle<S> {
    source: S,
    filter: FilterEngine,
    router: Router,
    store: LedgerStore,
    ledger: Ledger,
}

impl<S: AlertSource> PollCycle<S> {
    /// Build a cycle, loading the ledger from `store`.
    pub fn new(source: S, filter: FilterEngine, router: Router, store: LedgerStore) -> Self {
        let ledger = store.load();
        Self {
            source,
            filter,
            router,
            store,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run one cycle with the local clock.
    pub async fn run_once(&mut self) -> Result<CycleReport, LedgerError> {
        self.run_at(Local::now().naive_local()).await
    }

    /// Run one cycle as of `now`.
    pub async fn run_at(&mut self, now: NaiveDateTime) -> Result<CycleReport, LedgerError> {
        let (events, fetch_failed) = match self.source.fetch().await {
            Ok(events) => (events, false),
            Err(e) => {
                error!(error = %e, "Error while fetching alerts, treating as empty");
                (Vec::new(), true)
            }
        };
        let fetched = events.len();
        info!("Found {} raw alerts in live feed", fetched);

        let accepted = self.filter.accept(events, &mut self.ledger, now);
        info!("There are {} alerts to handle", accepted.len());

        self.store.save(&self.ledger)?;

        let dispatch = self.router.dispatch(&accepted).await;

        Ok(CycleReport {
            fetched,
            fetch_failed,
            accepted: accepted.len(),
            dispatch,
        })
    }

    /// Run cycles every `interval` until `shutdown` fires or the ledger
    /// cannot be saved.
    pub async fn run(
        &mut self,
        interval: Duration,
        shutdown: &ShutdownSignal,
    ) -> Result<(), LedgerError> {
        let mut shutdown_receiver = shutdown.subscribe();
        let mut cycles: u64 = 0;

        loop {
            let report = self.run_once().await?;
            cycles += 1;

            if !report.dispatch.is_success() {
                warn!(
                    cycle = cycles,
                    failures = report.dispatch.failure_count(),
                    "Cycle finished with sink failures"
                );
            }

            tokio::select! {
                _ = shutdown_receiver.recv() => {
                    info!(cycles = cycles, ledger = self.ledger.len(), "Poller stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{Cadence, Effect, EffectError, EffectResult};
    use crate::event::{AlertEvent, ALERT_DATE_FORMAT};
    use crate::feed::FeedError;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 14)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn alert(secs_ago: i64, data: &str) -> AlertEvent {
        let ts = now() - chrono::Duration::seconds(secs_ago);
        AlertEvent::new(ts.format(ALERT_DATE_FORMAT).to_string(), data)
    }

    /// Serves a fixed snapshot, or fails when `None`.
    struct StaticSource(Mutex<Option<Vec<AlertEvent>>>);

    #[async_trait]
    impl AlertSource for StaticSource {
        async fn fetch(&self) -> Result<Vec<AlertEvent>, FeedError> {
            match self.0.lock().clone() {
                Some(events) => Ok(events),
                None => Err(FeedError::Decode {
                    source: serde_json::from_str::<serde_json::Value>("<").unwrap_err(),
                    body: "<".into(),
                }),
            }
        }
    }

    struct Counting {
        seen: Mutex<usize>,
        fail: bool,
    }

    #[async_trait]
    impl Effect for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn cadence(&self) -> Cadence {
            Cadence::PerEvent
        }

        async fn execute(&self, events: &[AlertEvent]) -> Result<EffectResult, EffectError> {
            *self.seen.lock() += events.len();
            if self.fail {
                return Err(EffectError::Failed("receiver down".into()));
            }
            Ok(EffectResult::success("counting", "ok"))
        }
    }

    fn router_with(effect: Arc<Counting>) -> Router {
        let mut router = Router::new();
        router.register(effect);
        router
    }

    #[tokio::test]
    async fn test_cycle_dispatches_new_alerts_once() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("history.txt"));
        let effect = Arc::new(Counting {
            seen: Mutex::new(0),
            fail: false,
        });
        let source = StaticSource(Mutex::new(Some(vec![alert(5, "Haifa"), alert(900, "Acre")])));

        let mut cycle = PollCycle::new(
            source,
            FilterEngine::new(300),
            router_with(effect.clone()),
            store.clone(),
        );

        let first = cycle.run_at(now()).await.unwrap();
        assert_eq!(first.fetched, 2);
        assert_eq!(first.accepted, 1);
        assert!(first.dispatch.is_success());

        let second = cycle.run_at(now()).await.unwrap();
        assert_eq!(second.accepted, 0);
        assert_eq!(*effect.seen.lock(), 1);

        // Persisted after the cycle
        assert_eq!(store.load().len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_survives_restart() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("history.txt"));
        let snapshot = vec![alert(5, "Haifa")];

        let effect = Arc::new(Counting {
            seen: Mutex::new(0),
            fail: false,
        });
        let mut cycle = PollCycle::new(
            StaticSource(Mutex::new(Some(snapshot.clone()))),
            FilterEngine::new(300),
            router_with(effect.clone()),
            store.clone(),
        );
        cycle.run_at(now()).await.unwrap();

        let mut restarted = PollCycle::new(
            StaticSource(Mutex::new(Some(snapshot))),
            FilterEngine::new(300),
            router_with(effect.clone()),
            store,
        );
        assert_eq!(restarted.ledger().len(), 1);
        let report = restarted.run_at(now()).await.unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(*effect.seen.lock(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_empty_cycle() {
        let dir = tempdir().unwrap();
        let effect = Arc::new(Counting {
            seen: Mutex::new(0),
            fail: false,
        });
        let mut cycle = PollCycle::new(
            StaticSource(Mutex::new(None)),
            FilterEngine::new(300),
            router_with(effect.clone()),
            LedgerStore::new(dir.path().join("history.txt")),
        );

        let report = cycle.run_at(now()).await.unwrap();
        assert!(report.fetch_failed);
        assert_eq!(report.fetched, 0);
        assert_eq!(*effect.seen.lock(), 0);
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_not_retried() {
        let dir = tempdir().unwrap();
        let effect = Arc::new(Counting {
            seen: Mutex::new(0),
            fail: true,
        });
        let mut cycle = PollCycle::new(
            StaticSource(Mutex::new(Some(vec![alert(5, "Haifa")]))),
            FilterEngine::new(300),
            router_with(effect.clone()),
            LedgerStore::new(dir.path().join("history.txt")),
        );

        let first = cycle.run_at(now()).await.unwrap();
        assert_eq!(first.dispatch.failure_count(), 1);

        let second = cycle.run_at(now()).await.unwrap();
        assert_eq!(second.accepted, 0);
        assert_eq!(*effect.seen.lock(), 1);
    }

    #[tokio::test]
    async fn test_save_failure_is_fatal() {
        let dir = tempdir().unwrap();
        // The ledger path is an existing directory, so the rename fails
        let path = dir.path().join("history.txt");
        std::fs::create_dir(&path).unwrap();
        let mut cycle = PollCycle::new(
            StaticSource(Mutex::new(Some(Vec::new()))),
            FilterEngine::new(300),
            Router::new(),
            LedgerStore::new(path),
        );
        assert!(cycle.run_at(now()).await.is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempdir().unwrap();
        let mut cycle = PollCycle::new(
            StaticSource(Mutex::new(Some(Vec::new()))),
            FilterEngine::new(300),
            Router::new(),
            LedgerStore::new(dir.path().join("history.txt")),
        );

        let shutdown = ShutdownSignal::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            cycle.run(Duration::from_secs(3600), &shutdown),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
