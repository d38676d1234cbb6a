use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use error_stack::Report;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::evaluator::{self, Evaluation};
use crate::model::{Alert, AlertStatus};
use crate::notifier::Notifier;
use crate::source::PriceSource;
use crate::store::AlertStore;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Sleep between cycles.
    pub interval: Duration,
    /// Stop after this many cycles; `None` runs until cancelled.
    pub max_iterations: Option<u64>,
    /// Bounded wait for a single quote fetch.
    pub fetch_timeout: Duration,
}

/// Drives the fetch → evaluate → persist → notify cycle over the store.
///
/// Each iteration runs to completion; the cancellation token is only
/// observed during the inter-iteration sleep, so a cycle is all-or-nothing
/// with respect to persistence.
pub struct Monitor {
    store: Arc<AlertStore>,
    source: Arc<dyn PriceSource>,
    notifier: Arc<dyn Notifier>,
    options: MonitorOptions,
}

impl Monitor {
    pub fn new(
        store: Arc<AlertStore>,
        source: Arc<dyn PriceSource>,
        notifier: Arc<dyn Notifier>,
        options: MonitorOptions,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            options,
        }
    }

    /// Run cycles until the iteration budget is exhausted or `cancel` fires.
    /// The only fatal error is a store failure; fetch and notify problems
    /// are contained within the cycle that saw them.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), Report<StoreError>> {
        let mut iteration: u64 = 0;
        loop {
            iteration += 1;
            self.run_cycle(iteration).await?;

            if let Some(max) = self.options.max_iterations {
                if iteration >= max {
                    info!(iterations = iteration, "iteration budget exhausted, monitor stopping");
                    return Ok(());
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("stop requested, monitor exiting");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.options.interval) => {}
            }
        }
    }

    async fn run_cycle(&self, iteration: u64) -> Result<(), Report<StoreError>> {
        let alerts = self.store.load()?;
        let active: Vec<Alert> = alerts
            .into_iter()
            .filter(|a| a.status == AlertStatus::Active)
            .collect();

        if active.is_empty() {
            info!(iteration, "no active alerts to check");
            return Ok(());
        }

        let tickers: BTreeSet<String> = active.iter().map(|a| a.ticker.clone()).collect();
        let prices = self.fetch_prices(&tickers).await;
        let fetch_failures = tickers.len() - prices.len();

        let now = Utc::now();
        let mut evaluated = Vec::new();
        let mut fired = Vec::new();
        for alert in active {
            let Some(&price) = prices.get(&alert.ticker) else {
                continue;
            };
            let Evaluation { alert, fired: hit } = evaluator::evaluate(alert, price, now);
            if hit {
                fired.push((alert.clone(), price));
            }
            evaluated.push(alert);
        }

        self.store.apply_evaluations(&evaluated)?;

        for (alert, price) in &fired {
            warn!(
                id = %alert.id,
                ticker = %alert.ticker,
                price,
                threshold = alert.threshold_price,
                direction = %alert.direction,
                "alert fired"
            );
            let title = format!("Price alert for {}", alert.ticker);
            let message = format!(
                "{} {} {:.2}; current price {:.2}",
                alert.ticker, alert.direction, alert.threshold_price, price
            );
            if let Err(report) = self.notifier.notify(&title, &message) {
                debug!(error = ?report, "notification delivery failed");
            }
        }

        info!(
            iteration,
            tickers = tickers.len(),
            checked = evaluated.len(),
            fetch_failures,
            fired = fired.len(),
            "cycle complete"
        );

        Ok(())
    }

    /// Fetch each distinct ticker once, concurrently. A failure or timeout
    /// only drops that ticker from the cycle.
    async fn fetch_prices(&self, tickers: &BTreeSet<String>) -> HashMap<String, f64> {
        let fetches = tickers.iter().map(|ticker| {
            let ticker = ticker.clone();
            async move {
                let result = tokio::time::timeout(
                    self.options.fetch_timeout,
                    self.source.fetch_price(&ticker),
                )
                .await;
                (ticker, result)
            }
        });

        let mut prices = HashMap::new();
        for (ticker, result) in futures::future::join_all(fetches).await {
            match result {
                Ok(Ok(price)) => {
                    prices.insert(ticker, price);
                }
                Ok(Err(report)) => {
                    warn!(ticker = %ticker, error = ?report, "price fetch failed, skipping ticker this cycle");
                }
                Err(_) => {
                    warn!(ticker = %ticker, "price fetch timed out, skipping ticker this cycle");
                }
            }
        }
        prices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;

    use crate::error::{FetchError, NotifyError};
    use crate::model::{Direction, StatusFilter};

    struct StubSource {
        prices: HashMap<String, f64>,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(prices: &[(&str, f64)]) -> Self {
            Self {
                prices: prices
                    .iter()
                    .map(|(t, p)| (t.to_string(), *p))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PriceSource for StubSource {
        fn fetch_price(&self, ticker: &str) -> BoxFuture<'_, Result<f64, Report<FetchError>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = self.prices.get(ticker).copied().ok_or_else(|| {
                Report::new(FetchError::Request {
                    ticker: ticker.to_owned(),
                })
            });
            Box::pin(async move { result })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, message: &str) -> Result<(), Report<NotifyError>> {
            self.sent
                .lock()
                .unwrap()
                .push((title.to_owned(), message.to_owned()));
            Ok(())
        }
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, _title: &str, _message: &str) -> Result<(), Report<NotifyError>> {
            Err(Report::new(NotifyError::Send))
        }
    }

    fn options(max_iterations: Option<u64>) -> MonitorOptions {
        MonitorOptions {
            interval: Duration::from_millis(1),
            max_iterations,
            fetch_timeout: Duration::from_secs(1),
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> Arc<AlertStore> {
        Arc::new(AlertStore::open(dir.path().join("alerts.json")).unwrap())
    }

    #[tokio::test]
    async fn one_shot_alert_triggers_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let alert = store.create("AAPL", 175.0, Direction::Above, false).unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = Monitor::new(
            Arc::clone(&store),
            Arc::new(StubSource::new(&[("AAPL", 180.0)])),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            options(Some(1)),
        );
        monitor.run(CancellationToken::new()).await.unwrap();

        let stored = store.get(&alert.id).unwrap();
        assert_eq!(stored.status, AlertStatus::Triggered);
        assert!(stored.triggered_at.is_some());
        assert!(stored.last_checked.is_some());

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("AAPL"));

        assert!(store.list(StatusFilter::Active, None).unwrap().is_empty());
        assert_eq!(store.list(StatusFilter::All, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn triggered_one_shot_is_excluded_from_later_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let alert = store.create("AAPL", 175.0, Direction::Above, false).unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = Monitor::new(
            Arc::clone(&store),
            Arc::new(StubSource::new(&[("AAPL", 180.0)])),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            options(Some(3)),
        );
        monitor.run(CancellationToken::new()).await.unwrap();

        // Fired on the first cycle only; triggered_at is never rewritten
        assert_eq!(notifier.sent().len(), 1);
        let stored = store.get(&alert.id).unwrap();
        assert_eq!(stored.status, AlertStatus::Triggered);
    }

    #[tokio::test]
    async fn persistent_alert_fires_every_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let alert = store.create("AAPL", 175.0, Direction::Above, true).unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = Monitor::new(
            Arc::clone(&store),
            Arc::new(StubSource::new(&[("AAPL", 180.0)])),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            options(Some(2)),
        );
        monitor.run(CancellationToken::new()).await.unwrap();

        assert_eq!(notifier.sent().len(), 2);
        let stored = store.get(&alert.id).unwrap();
        assert_eq!(stored.status, AlertStatus::Active);
        assert!(stored.triggered_at.is_some());
    }

    #[tokio::test]
    async fn fetch_failure_is_isolated_per_ticker() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let bad = store.create("FAIL", 100.0, Direction::Above, false).unwrap();
        let good = store.create("GOOD", 100.0, Direction::Above, false).unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let monitor = Monitor::new(
            Arc::clone(&store),
            Arc::new(StubSource::new(&[("GOOD", 150.0)])),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            options(Some(1)),
        );
        monitor.run(CancellationToken::new()).await.unwrap();

        // GOOD was evaluated and fired; FAIL retains its prior state
        let good_stored = store.get(&good.id).unwrap();
        assert_eq!(good_stored.status, AlertStatus::Triggered);
        assert!(good_stored.last_checked.is_some());

        let bad_stored = store.get(&bad.id).unwrap();
        assert_eq!(bad_stored.status, AlertStatus::Active);
        assert!(bad_stored.last_checked.is_none());

        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn notify_failure_does_not_roll_back_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let alert = store.create("AAPL", 175.0, Direction::Above, false).unwrap();

        let monitor = Monitor::new(
            Arc::clone(&store),
            Arc::new(StubSource::new(&[("AAPL", 180.0)])),
            Arc::new(FailingNotifier),
            options(Some(1)),
        );
        monitor.run(CancellationToken::new()).await.unwrap();

        let stored = store.get(&alert.id).unwrap();
        assert_eq!(stored.status, AlertStatus::Triggered);
    }

    #[tokio::test]
    async fn empty_active_set_skips_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let alert = store.create("AAPL", 175.0, Direction::Above, false).unwrap();
        store
            .set_status(&alert.id, AlertStatus::Disabled)
            .unwrap();

        let source = Arc::new(StubSource::new(&[("AAPL", 180.0)]));
        let monitor = Monitor::new(
            Arc::clone(&store),
            Arc::clone(&source) as Arc<dyn PriceSource>,
            Arc::new(RecordingNotifier::default()),
            options(Some(1)),
        );
        monitor.run(CancellationToken::new()).await.unwrap();

        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_tickers_fetch_once_per_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.create("AAPL", 175.0, Direction::Above, false).unwrap();
        store.create("AAPL", 150.0, Direction::Below, false).unwrap();

        let source = Arc::new(StubSource::new(&[("AAPL", 160.0)]));
        let monitor = Monitor::new(
            Arc::clone(&store),
            Arc::clone(&source) as Arc<dyn PriceSource>,
            Arc::new(RecordingNotifier::default()),
            options(Some(1)),
        );
        monitor.run(CancellationToken::new()).await.unwrap();

        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn cancellation_is_honored_at_the_sleep_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let alert = store.create("AAPL", 175.0, Direction::Above, false).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let monitor = Monitor::new(
            Arc::clone(&store),
            Arc::new(StubSource::new(&[("AAPL", 180.0)])),
            Arc::new(RecordingNotifier::default()),
            MonitorOptions {
                interval: Duration::from_secs(3600),
                max_iterations: None,
                fetch_timeout: Duration::from_secs(1),
            },
        );
        // The already-cancelled token still lets the in-flight cycle finish
        monitor.run(cancel).await.unwrap();

        let stored = store.get(&alert.id).unwrap();
        assert_eq!(stored.status, AlertStatus::Triggered);
    }

    #[tokio::test]
    async fn corrupt_store_aborts_the_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        std::fs::write(&path, "not json at all").unwrap();
        let store = Arc::new(AlertStore::open(&path).unwrap());

        let monitor = Monitor::new(
            store,
            Arc::new(StubSource::new(&[])),
            Arc::new(RecordingNotifier::default()),
            options(Some(1)),
        );
        let report = monitor.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            report.current_context(),
            StoreError::Corrupt { .. }
        ));
    }

    #[tokio::test]
    async fn slow_fetch_times_out_and_is_isolated() {
        struct SlowSource;

        impl PriceSource for SlowSource {
            fn fetch_price(
                &self,
                _ticker: &str,
            ) -> BoxFuture<'_, Result<f64, Report<FetchError>>> {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(1.0)
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let alert = store.create("SLOW", 1.0, Direction::Above, false).unwrap();

        let monitor = Monitor::new(
            Arc::clone(&store),
            Arc::new(SlowSource),
            Arc::new(RecordingNotifier::default()),
            MonitorOptions {
                interval: Duration::from_millis(1),
                max_iterations: Some(1),
                fetch_timeout: Duration::from_millis(10),
            },
        );
        monitor.run(CancellationToken::new()).await.unwrap();

        let stored = store.get(&alert.id).unwrap();
        assert_eq!(stored.status, AlertStatus::Active);
        assert!(stored.last_checked.is_none());
    }
}
