//! Multi-runner supervision: registry, identities, aggregated status.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::Error;
use crate::load::{Load, LoadFactory};
use crate::metrics::StatsSink;
use crate::options::OptionInfo;
use crate::runner::{LoadRunner, LoadRunnerInfo};
use crate::worker::{exponential_interval, fixed_interval, IntervalGenerator, WorkerConfig};

/// Pacing policy tag for a runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacingMode {
    /// Issue as soon as a permit is free.
    Asap,
    /// Fixed inter-arrival intervals of `1/qps`.
    Static,
    /// Exponentially distributed inter-arrival intervals (Poisson arrivals).
    Exponential,
}

impl PacingMode {
    /// The interval generator this mode stands for, `None` for ASAP.
    pub fn generator(self) -> Option<IntervalGenerator> {
        match self {
            PacingMode::Asap => None,
            PacingMode::Static => Some(Arc::new(fixed_interval)),
            PacingMode::Exponential => Some(Arc::new(exponential_interval)),
        }
    }
}

impl FromStr for PacingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "asap" => Ok(PacingMode::Asap),
            "static" => Ok(PacingMode::Static),
            "exponential" => Ok(PacingMode::Exponential),
            other => Err(Error::Invalid(format!("unknown mode {other:?}"))),
        }
    }
}

impl fmt::Display for PacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PacingMode::Asap => "asap",
            PacingMode::Static => "static",
            PacingMode::Exponential => "exponential",
        })
    }
}

struct RunnerEntry {
    load_type: String,
    load_options: BTreeMap<String, String>,
    mode: PacingMode,
    runner: Arc<LoadRunner>,
}

/// Aggregated view of one runner, as surfaced to the control surface.
#[derive(Debug)]
pub struct RunnerStatus {
    pub id: String,
    pub load_type: String,
    pub load_options: BTreeMap<String, String>,
    pub mode: PacingMode,
    /// Worker snapshot, or the error the worker layer reported for this
    /// runner. A runner whose worker terminated on its own stays listed
    /// until removed and carries [`Error::Closed`] here.
    pub info: Result<LoadRunnerInfo, Error>,
    pub ok_requests: u64,
    pub err_requests: u64,
}

/// Registry of load runners with unique, never-reused identities.
///
/// Lifecycle operations and status queries share one readers-writer lock
/// over the registry. The lock is always released before calling into a
/// worker, so a slow or closed runner cannot wedge operations on its
/// siblings.
pub struct LoadTester {
    max_in_flight: usize,
    factories: HashMap<String, LoadFactory>,
    runners: RwLock<HashMap<String, RunnerEntry>>,
    next_runner: AtomicU64,
    sink: Arc<StatsSink>,
}

impl LoadTester {
    /// `max_in_flight` bounds the concurrency of every runner created here.
    pub fn new(max_in_flight: usize) -> Self {
        Self::with_sink(max_in_flight, StatsSink::new())
    }

    /// Like [`LoadTester::new`] with a shared sample sink, so callers can
    /// read (or export) the same counters the tester aggregates.
    pub fn with_sink(max_in_flight: usize, sink: Arc<StatsSink>) -> Self {
        Self {
            max_in_flight,
            factories: HashMap::new(),
            runners: RwLock::new(HashMap::new()),
            next_runner: AtomicU64::new(0),
            sink,
        }
    }

    /// Registers a load type. Registration happens at setup time, before
    /// the tester is shared.
    pub fn register_load(&mut self, load_type: impl Into<String>, factory: LoadFactory) {
        self.factories.insert(load_type.into(), factory);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn sink(&self) -> &Arc<StatsSink> {
        &self.sink
    }

    /// Registered load types, sorted by name.
    pub fn available_load_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Declared options of a load type, for form rendering.
    pub fn load_options(&self, load_type: &str) -> Result<Vec<OptionInfo>, Error> {
        let factory = self
            .factories
            .get(load_type)
            .ok_or_else(|| Error::Invalid(format!("unknown load type {load_type:?}")))?;
        Ok(factory().options())
    }

    /// Creates, initializes, and starts a new runner; returns its id.
    ///
    /// Fails with [`Error::Invalid`] for an unknown load type or an
    /// out-of-range configuration, and with [`Error::Unavailable`] when the
    /// load's initialization fails; no runner is registered then.
    pub async fn add_runner(
        &self,
        load_type: &str,
        load_options: BTreeMap<String, String>,
        in_flight: usize,
        qps: f64,
        timeout: Duration,
        mode: PacingMode,
    ) -> Result<String, Error> {
        let factory = self
            .factories
            .get(load_type)
            .ok_or_else(|| Error::Invalid(format!("unknown load type {load_type:?}")))?;

        let mut load = factory();
        load.init(&load_options).await.map_err(|err| match err {
            Error::Invalid(_) | Error::Unavailable(_) => err,
            other => Error::Unavailable(other.to_string()),
        })?;
        let load: Arc<dyn Load> = Arc::from(load);

        let seq = self.next_runner.fetch_add(1, Ordering::Relaxed);
        let id = format!("{load_type}-{seq}");
        let cfg = WorkerConfig {
            in_flight,
            interval: mode.generator(),
            qps,
            timeout,
        };

        let runner = match LoadRunner::new(
            &id,
            Arc::clone(&load),
            self.max_in_flight,
            cfg,
            Some(self.sink.recorder_for(&id)),
        ) {
            Ok(runner) => runner,
            Err(err) => {
                if let Err(close_err) = load.close().await {
                    tracing::warn!(%id, %close_err, "load close failed after runner setup error");
                }
                return Err(err);
            }
        };

        let entry = RunnerEntry {
            load_type: load_type.to_string(),
            load_options,
            mode,
            runner: Arc::new(runner),
        };
        self.runners.write().await.insert(id.clone(), entry);
        tracing::info!(%id, in_flight, qps, %mode, "runner added");
        Ok(id)
    }

    /// Forwards a new configuration to an existing runner. The stored mode
    /// tag changes only once the worker has accepted the config.
    pub async fn update_runner(
        &self,
        id: &str,
        in_flight: usize,
        qps: f64,
        timeout: Duration,
        mode: PacingMode,
    ) -> Result<(), Error> {
        let runner = {
            let runners = self.runners.read().await;
            let entry = runners
                .get(id)
                .ok_or_else(|| Error::NotFound(format!("runner {id:?}")))?;
            Arc::clone(&entry.runner)
        };

        let cfg = WorkerConfig {
            in_flight,
            interval: mode.generator(),
            qps,
            timeout,
        };
        runner.set_config(cfg).await?;

        if let Some(entry) = self.runners.write().await.get_mut(id) {
            entry.mode = mode;
        }
        tracing::info!(%id, in_flight, qps, %mode, "runner updated");
        Ok(())
    }

    /// Closes a runner and deletes it. Its id is never reused.
    pub async fn remove_runner(&self, id: &str) -> Result<(), Error> {
        let entry = self
            .runners
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("runner {id:?}")))?;
        entry.runner.close().await;
        tracing::info!(%id, "runner removed");
        Ok(())
    }

    /// Snapshot of every runner paired with its accumulated ok/error
    /// counts, ordered by id. A runner whose worker terminated on its own
    /// stays listed until removed; the worker layer's [`Error::Closed`] is
    /// carried in that entry without hiding the rest of the registry.
    pub async fn runners_info(&self) -> Vec<RunnerStatus> {
        let entries: Vec<(String, String, BTreeMap<String, String>, PacingMode, Arc<LoadRunner>)> = {
            let runners = self.runners.read().await;
            let mut entries: Vec<_> = runners
                .iter()
                .map(|(id, entry)| {
                    (
                        id.clone(),
                        entry.load_type.clone(),
                        entry.load_options.clone(),
                        entry.mode,
                        Arc::clone(&entry.runner),
                    )
                })
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
        };

        let mut statuses = Vec::with_capacity(entries.len());
        for (id, load_type, load_options, mode, runner) in entries {
            let info = runner.info().await;
            let counts = self.sink.counts(&id);
            statuses.push(RunnerStatus {
                id,
                load_type,
                load_options,
                mode,
                info,
                ok_requests: counts.ok,
                err_requests: counts.err,
            });
        }
        statuses
    }

    /// Closes every runner and clears the registry. Idempotent.
    pub async fn close(&self) {
        let entries: Vec<Arc<LoadRunner>> = {
            let mut runners = self.runners.write().await;
            runners.drain().map(|(_, entry)| entry.runner).collect()
        };
        for runner in entries {
            runner.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::loads::SleepLoad;
    use crate::worker::JobOutcome;

    fn sleep_factory() -> LoadFactory {
        Box::new(|| Box::new(SleepLoad::default()) as Box<dyn Load>)
    }

    fn tester_with_sleep_load(max_in_flight: usize) -> LoadTester {
        let mut tester = LoadTester::new(max_in_flight);
        tester.register_load("sleep", sleep_factory());
        tester
    }

    /// Load whose initialization always fails.
    struct BrokenLoad;

    #[async_trait]
    impl Load for BrokenLoad {
        fn options(&self) -> Vec<OptionInfo> {
            Vec::new()
        }

        async fn init(&mut self, _options: &BTreeMap<String, String>) -> Result<(), Error> {
            Err(Error::Unavailable("nothing listens here".into()))
        }

        async fn job(&self) -> JobOutcome {
            JobOutcome::ok(Duration::ZERO)
        }

        async fn close(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn mode_round_trips_through_strings() {
        for (text, mode) in [
            ("asap", PacingMode::Asap),
            ("static", PacingMode::Static),
            ("exponential", PacingMode::Exponential),
        ] {
            assert_eq!(text.parse::<PacingMode>().unwrap(), mode);
            assert_eq!(mode.to_string(), text);
            assert_eq!(serde_json::to_string(&mode).unwrap(), format!("{text:?}"));
        }
        assert!(matches!(
            "warp-speed".parse::<PacingMode>(),
            Err(Error::Invalid(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runner_lifecycle() {
        let tester = tester_with_sleep_load(16);

        let id = tester
            .add_runner(
                "sleep",
                BTreeMap::new(),
                2,
                10.0,
                Duration::from_secs(1),
                PacingMode::Static,
            )
            .await
            .unwrap();
        assert_eq!(id, "sleep-0");

        let statuses = tester.runners_info().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].id, "sleep-0");
        assert_eq!(statuses[0].load_type, "sleep");
        assert_eq!(statuses[0].mode, PacingMode::Static);
        let info = statuses[0].info.as_ref().unwrap();
        assert_eq!(info.config.in_flight, 2);
        assert_eq!(info.max_in_flight, 16);

        tester
            .update_runner(&id, 4, 20.0, Duration::from_millis(500), PacingMode::Asap)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let statuses = tester.runners_info().await;
        assert_eq!(statuses[0].mode, PacingMode::Asap);
        let info = statuses[0].info.as_ref().unwrap();
        assert_eq!(info.config.in_flight, 4);
        assert_eq!(info.config.qps, 20.0);
        assert_eq!(info.config.timeout, Duration::from_millis(500));

        tester.remove_runner(&id).await.unwrap();
        assert!(tester.runners_info().await.is_empty());
        assert!(matches!(
            tester.remove_runner(&id).await,
            Err(Error::NotFound(_))
        ));

        tester.close().await;
        tester.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runner_ids_are_never_reused() {
        let tester = tester_with_sleep_load(8);
        let opts = BTreeMap::new();

        let first = tester
            .add_runner("sleep", opts.clone(), 1, 0.0, Duration::from_secs(1), PacingMode::Asap)
            .await
            .unwrap();
        tester.remove_runner(&first).await.unwrap();

        let second = tester
            .add_runner("sleep", opts, 1, 0.0, Duration::from_secs(1), PacingMode::Asap)
            .await
            .unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn unknown_load_type_is_invalid() {
        let tester = tester_with_sleep_load(8);
        let err = tester
            .add_runner(
                "missing",
                BTreeMap::new(),
                1,
                0.0,
                Duration::from_secs(1),
                PacingMode::Asap,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        assert!(matches!(tester.load_options("missing"), Err(Error::Invalid(_))));
        assert_eq!(tester.available_load_types(), vec!["sleep".to_string()]);
    }

    #[tokio::test]
    async fn failed_init_registers_nothing() {
        let mut tester = LoadTester::new(8);
        tester.register_load("broken", Box::new(|| Box::new(BrokenLoad) as Box<dyn Load>));

        let err = tester
            .add_runner(
                "broken",
                BTreeMap::new(),
                1,
                0.0,
                Duration::from_secs(1),
                PacingMode::Asap,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        assert!(tester.runners_info().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_load_options_are_reported() {
        let tester = tester_with_sleep_load(8);
        let err = tester
            .add_runner(
                "sleep",
                BTreeMap::from([("min_ms".to_string(), "not_a_number".to_string())]),
                1,
                0.0,
                Duration::from_secs(1),
                PacingMode::Asap,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn counts_come_from_the_sink() {
        let tester = tester_with_sleep_load(8);
        let id = tester
            .add_runner(
                "sleep",
                BTreeMap::from([
                    ("min_ms".to_string(), "1".to_string()),
                    ("max_ms".to_string(), "2".to_string()),
                ]),
                2,
                0.0,
                Duration::from_secs(1),
                PacingMode::Asap,
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let statuses = tester.runners_info().await;
        assert!(
            statuses[0].ok_requests > 0,
            "no successful requests aggregated"
        );
        assert_eq!(statuses[0].err_requests, 0);

        tester.remove_runner(&id).await.unwrap();
        tester.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_is_not_blocked_by_concurrent_queries() {
        let tester = Arc::new(tester_with_sleep_load(8));
        let id = tester
            .add_runner(
                "sleep",
                BTreeMap::new(),
                1,
                0.0,
                Duration::from_secs(1),
                PacingMode::Asap,
            )
            .await
            .unwrap();

        let queries = {
            let tester = Arc::clone(&tester);
            tokio::spawn(async move {
                for _ in 0..20 {
                    tester.runners_info().await;
                }
            })
        };
        let updates = {
            let tester = Arc::clone(&tester);
            let id = id.clone();
            tokio::spawn(async move {
                for i in 0usize..20 {
                    tester
                        .update_runner(
                            &id,
                            (i % 4) + 1,
                            i as f64,
                            Duration::from_secs(1),
                            PacingMode::Asap,
                        )
                        .await
                        .unwrap();
                }
            })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            queries.await.unwrap();
            updates.await.unwrap();
        })
        .await
        .expect("supervisor deadlocked under concurrent update and query");

        tester.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn self_terminated_runner_stays_listed() {
        let tester = tester_with_sleep_load(8);
        let dead = tester
            .add_runner(
                "sleep",
                BTreeMap::new(),
                1,
                0.0,
                Duration::from_secs(1),
                PacingMode::Asap,
            )
            .await
            .unwrap();
        let alive = tester
            .add_runner(
                "sleep",
                BTreeMap::new(),
                1,
                0.0,
                Duration::from_secs(1),
                PacingMode::Asap,
            )
            .await
            .unwrap();

        // Stop the first runner's worker behind the supervisor's back, the
        // way a parent cancellation would. The registry entry must survive.
        let runner = {
            let runners = tester.runners.read().await;
            Arc::clone(&runners.get(&dead).unwrap().runner)
        };
        runner.close().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let statuses = tester.runners_info().await;
        assert_eq!(statuses.len(), 2, "terminated runner fell out of the listing");
        let dead_status = statuses.iter().find(|status| status.id == dead).unwrap();
        assert!(matches!(dead_status.info, Err(Error::Closed)));
        let alive_status = statuses.iter().find(|status| status.id == alive).unwrap();
        let info = alive_status.info.as_ref().unwrap();
        assert_eq!(info.config.in_flight, 1);

        // Explicit removal is still how the entry goes away.
        tester.remove_runner(&dead).await.unwrap();
        assert_eq!(tester.runners_info().await.len(), 1);

        tester.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_of_unknown_runner_is_not_found() {
        let tester = tester_with_sleep_load(8);
        assert!(matches!(
            tester
                .update_runner("ghost-9", 1, 0.0, Duration::from_secs(1), PacingMode::Asap)
                .await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn statuses_are_ordered_by_id() {
        let tester = tester_with_sleep_load(8);
        let mut expected = Vec::new();
        for _ in 0..3 {
            expected.push(
                tester
                    .add_runner(
                        "sleep",
                        BTreeMap::new(),
                        1,
                        0.0,
                        Duration::from_secs(1),
                        PacingMode::Asap,
                    )
                    .await
                    .unwrap(),
            );
        }
        expected.sort();

        let ids: Vec<String> = tester
            .runners_info()
            .await
            .into_iter()
            .map(|status| status.id)
            .collect();
        assert_eq!(ids, expected);

        tester.close().await;
    }

    // Ensures drop-based cleanup keeps working when a tester goes away with
    // runners still registered.
    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_the_tester_stops_load() {
        let launched = Arc::new(AtomicUsize::new(0));

        struct ProbeLoad {
            launched: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Load for ProbeLoad {
            fn options(&self) -> Vec<OptionInfo> {
                Vec::new()
            }

            async fn init(&mut self, _options: &BTreeMap<String, String>) -> Result<(), Error> {
                Ok(())
            }

            async fn job(&self) -> JobOutcome {
                self.launched.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                JobOutcome::ok(Duration::from_millis(5))
            }

            async fn close(&self) -> Result<(), Error> {
                Ok(())
            }
        }

        {
            let mut tester = LoadTester::new(4);
            let launched = Arc::clone(&launched);
            tester.register_load(
                "probe",
                Box::new(move || {
                    Box::new(ProbeLoad {
                        launched: Arc::clone(&launched),
                    }) as Box<dyn Load>
                }),
            );
            tester
                .add_runner(
                    "probe",
                    BTreeMap::new(),
                    2,
                    0.0,
                    Duration::from_secs(1),
                    PacingMode::Asap,
                )
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = launched.load(Ordering::SeqCst);
        assert!(settled > 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(
            launched.load(Ordering::SeqCst) <= settled + 2,
            "jobs kept launching after the tester was dropped"
        );
    }
}
