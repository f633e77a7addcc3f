//! The cooperative scheduler that issues jobs under live-tunable limits.
//!
//! A [`Worker`] owns a single long-lived loop task that combines three
//! independently reconfigurable knobs:
//!
//! - a concurrency cap (`in_flight`), realized as a pool of permits,
//! - an inter-arrival pacing policy (`interval` + `qps`),
//! - a per-job deadline (`timeout`).
//!
//! All three can be changed at runtime through [`Worker::set_config`]
//! without stopping the worker, without losing in-flight jobs, and without
//! exceeding the previous ceiling during the transition.
//!
//! # Scheduling model
//!
//! The loop task is the sole mutator of the configuration, the token pool,
//! the trigger binding, and the issuance timer. Jobs run as separate tasks,
//! concurrently with the loop and with each other. Each loop iteration waits
//! on exactly one multi-way select over {cancellation, config update, config
//! read, timer, token}. The select is biased so that a continuously ready
//! token stream can never starve configuration messages.
//!
//! Downsizing the concurrency cap never resizes the pool: the loop keeps the
//! old ceiling in `current_in_flight` and silently swallows acquired permits
//! until the gap to the new target closes. Effective concurrency therefore
//! decays monotonically and never exceeds the old ceiling mid-transition.

mod interval;

pub use interval::{exponential_interval, fixed_interval, IntervalGenerator};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::error::Error;
use crate::metrics::Recorder;

/// Opaque failure returned by a job. The worker never inspects it; it only
/// flips the success flag on the recorded sample.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a single unit of work: how long it took as measured by the
/// job itself, and whether it failed. The duration is observed whether or
/// not an error occurred.
#[derive(Debug)]
pub struct JobOutcome {
    pub elapsed: Duration,
    pub result: Result<(), JobError>,
}

impl JobOutcome {
    pub fn ok(elapsed: Duration) -> Self {
        Self {
            elapsed,
            result: Ok(()),
        }
    }

    pub fn err(elapsed: Duration, err: impl Into<JobError>) -> Self {
        Self {
            elapsed,
            result: Err(err.into()),
        }
    }

    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

type BoxedJob = Arc<dyn Fn() -> BoxFuture<'static, JobOutcome> + Send + Sync>;

/// Runtime-tunable configuration of a [`Worker`].
#[derive(Clone)]
pub struct WorkerConfig {
    /// Concurrency target: how many jobs may be in flight at once.
    pub in_flight: usize,
    /// Inter-arrival pacing. `None` issues as soon as a permit is free.
    pub interval: Option<IntervalGenerator>,
    /// Target rate handed to the interval generator.
    pub qps: f64,
    /// Deadline applied to each individual job.
    pub timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            in_flight: 1,
            interval: None,
            qps: 0.0,
            timeout: Duration::from_secs(1),
        }
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("in_flight", &self.in_flight)
            .field("paced", &self.interval.is_some())
            .field("qps", &self.qps)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WorkerConfig {
    /// Checks the field invariants that do not depend on the worker.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.qps.is_finite() || self.qps < 0.0 {
            return Err(Error::Invalid(format!(
                "qps must be a finite non-negative number, got {}",
                self.qps
            )));
        }
        Ok(())
    }

    /// The next pacing delay, or `None` when issuance should not be paced.
    fn next_interval(&self) -> Option<Duration> {
        let interval = self.interval.as_ref()?;
        let delay = interval(self.qps);
        (delay > Duration::ZERO).then_some(delay)
    }
}

/// Construction-time options for [`Worker::spawn`].
#[derive(TypedBuilder)]
pub struct WorkerOptions {
    /// Initial configuration; defaults to ASAP with one in-flight slot.
    #[builder(default)]
    pub config: WorkerConfig,
    /// Upper bound for `in_flight` over the worker's whole lifetime. The
    /// token pool is sized to this, so later growth is instantaneous.
    #[builder(default = 1)]
    pub max_in_flight: usize,
    /// Receives one `(duration_seconds, success)` sample per job completion,
    /// including timeouts and panics.
    #[builder(default, setter(strip_option))]
    pub recorder: Option<Recorder>,
    /// Cancelling this token terminates the worker, exactly like
    /// [`Worker::close`].
    #[builder(default, setter(strip_option))]
    pub parent: Option<CancellationToken>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Handle to a running scheduler loop.
///
/// Cheap operations only: configuration reads and writes rendezvous with the
/// loop through bounded channels, so they are totally ordered with respect
/// to each other and take effect no later than the next loop iteration.
pub struct Worker {
    cancel: CancellationToken,
    cfg_tx: mpsc::Sender<WorkerConfig>,
    read_tx: mpsc::Sender<oneshot::Sender<WorkerConfig>>,
    max_in_flight: usize,
}

impl Worker {
    /// Starts a worker driving `job`.
    ///
    /// Fails with [`Error::Invalid`] when `max_in_flight` is zero, the
    /// initial `in_flight` exceeds it, or the configuration violates its
    /// invariants.
    pub fn spawn<J, Fut>(job: J, opts: WorkerOptions) -> Result<Self, Error>
    where
        J: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        let WorkerOptions {
            config,
            max_in_flight,
            recorder,
            parent,
        } = opts;

        if max_in_flight == 0 {
            return Err(Error::Invalid("max_in_flight must be at least 1".into()));
        }
        config.validate()?;
        if config.in_flight > max_in_flight {
            return Err(Error::Invalid(format!(
                "in_flight {} exceeds max_in_flight {}",
                config.in_flight, max_in_flight
            )));
        }

        let cancel = parent.map(|p| p.child_token()).unwrap_or_default();
        let (cfg_tx, cfg_rx) = mpsc::channel(1);
        let (read_tx, read_rx) = mpsc::channel(1);
        let (token_tx, token_rx) = mpsc::channel(max_in_flight);
        for _ in 0..config.in_flight {
            // in_flight <= max_in_flight == capacity, so this cannot fail
            let _ = token_tx.try_send(());
        }

        tracing::debug!(
            max_in_flight,
            in_flight = config.in_flight,
            qps = config.qps,
            paced = config.interval.is_some(),
            "starting worker"
        );

        let job: BoxedJob = Arc::new(move || job().boxed());
        let state = Loop {
            current_in_flight: config.in_flight,
            cfg: config,
            token_tx,
            token_rx,
            cfg_rx,
            read_rx,
            job,
            recorder,
            cancel: cancel.clone(),
        };
        tokio::spawn(state.run());

        Ok(Self {
            cancel,
            cfg_tx,
            read_tx,
            max_in_flight,
        })
    }

    /// Hands a new configuration to the loop. Returns once the loop has
    /// accepted it; the effect lands no later than the next iteration.
    pub async fn set_config(&self, cfg: WorkerConfig) -> Result<(), Error> {
        cfg.validate()?;
        if cfg.in_flight > self.max_in_flight {
            return Err(Error::Invalid(format!(
                "in_flight {} exceeds max_in_flight {}",
                cfg.in_flight, self.max_in_flight
            )));
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Closed),
            res = self.cfg_tx.send(cfg) => res.map_err(|_| Error::Closed),
        }
    }

    /// Returns a copy of the configuration the loop currently honors.
    pub async fn get_config(&self) -> Result<WorkerConfig, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Closed),
            res = self.read_tx.send(reply_tx) => res.map_err(|_| Error::Closed)?,
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Closed),
            resp = reply_rx => resp.map_err(|_| Error::Closed),
        }
    }

    /// Terminates the loop and cancels all in-flight jobs. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("max_in_flight", &self.max_in_flight)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Loop {
    cfg: WorkerConfig,
    /// Effective ceiling honored right now; exceeds `cfg.in_flight` while a
    /// downsize is pending.
    current_in_flight: usize,
    token_tx: mpsc::Sender<()>,
    token_rx: mpsc::Receiver<()>,
    cfg_rx: mpsc::Receiver<WorkerConfig>,
    read_rx: mpsc::Receiver<oneshot::Sender<WorkerConfig>>,
    job: BoxedJob,
    recorder: Option<Recorder>,
    cancel: CancellationToken,
}

fn sleep_box(delay: Duration) -> Pin<Box<Sleep>> {
    Box::pin(tokio::time::sleep(delay))
}

impl Loop {
    async fn run(mut self) {
        let mut timer = self.cfg.next_interval().map(sleep_box);
        let mut armed = timer.is_none();

        loop {
            tokio::select! {
                // Priority order keeps configuration traffic ahead of an
                // always-ready token stream.
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::debug!("worker terminated");
                    return;
                }

                Some(cfg) = self.cfg_rx.recv() => {
                    self.apply_config(cfg);
                    timer = self.cfg.next_interval().map(sleep_box);
                    armed = timer.is_none();
                }

                Some(reply) = self.read_rx.recv() => {
                    let _ = reply.send(self.cfg.clone());
                }

                () = async { timer.as_mut().expect("gated on is_some").await }, if timer.is_some() => {
                    timer = None;
                    armed = true;
                }

                Some(()) = self.token_rx.recv(), if armed => {
                    if self.current_in_flight > self.cfg.in_flight {
                        // Swallow the permit to realize a pending downsize.
                        self.current_in_flight -= 1;
                        continue;
                    }

                    self.launch();

                    if let Some(delay) = self.cfg.next_interval() {
                        armed = false;
                        timer = Some(sleep_box(delay));
                    }
                }
            }
        }
    }

    fn apply_config(&mut self, cfg: WorkerConfig) {
        tracing::debug!(
            in_flight = cfg.in_flight,
            qps = cfg.qps,
            paced = cfg.interval.is_some(),
            timeout_secs = cfg.timeout.as_secs_f64(),
            "configuration changed"
        );
        self.cfg = cfg;

        // Growing is instantaneous: the pool is sized to hold the extra
        // permits. Shrinking leaves current_in_flight high; the gap closes
        // as acquisitions are swallowed.
        while self.cfg.in_flight > self.current_in_flight {
            if let Err(TrySendError::Full(())) = self.token_tx.try_send(()) {
                tracing::error!("token pool over capacity during grow");
                break;
            }
            self.current_in_flight += 1;
        }
    }

    /// Spawns one job plus the supervisor that releases its permit and
    /// records its outcome on every completion path.
    fn launch(&self) {
        let job = Arc::clone(&self.job);
        let tokens = self.token_tx.clone();
        let recorder = self.recorder.clone();
        let cancel = self.cancel.clone();
        let timeout = self.cfg.timeout;

        tokio::spawn(async move {
            let start = Instant::now();
            // The job runs as its own task so that a panic, whether in the
            // closure or in the future, is contained there and observed
            // here as a failed join.
            let mut handle = tokio::spawn(async move { job().await });
            let (seconds, success) = tokio::select! {
                res = &mut handle => match res {
                    Ok(outcome) => (outcome.elapsed.as_secs_f64(), outcome.success()),
                    Err(_) => (start.elapsed().as_secs_f64(), false),
                },
                _ = tokio::time::sleep(timeout) => {
                    handle.abort();
                    let _ = (&mut handle).await;
                    (start.elapsed().as_secs_f64(), false)
                }
                _ = cancel.cancelled() => {
                    handle.abort();
                    let _ = (&mut handle).await;
                    (start.elapsed().as_secs_f64(), false)
                }
            };

            // A closed pool means the loop already terminated; dropping the
            // permit is fine then. A full pool would be a bookkeeping bug.
            if let Err(TrySendError::Full(())) = tokens.try_send(()) {
                tracing::error!("token pool rejected a released permit");
            }
            if let Some(recorder) = recorder {
                recorder(seconds, success);
            }
        });
    }
}
