//! Binding of one [`Load`] to one [`Worker`].

use std::sync::Arc;
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::load::Load;
use crate::metrics::Recorder;
use crate::worker::{Worker, WorkerConfig, WorkerOptions};

/// Snapshot of a runner's identity and live configuration.
#[derive(Clone, Debug)]
pub struct LoadRunnerInfo {
    pub id: String,
    pub start_time: SystemTime,
    pub max_in_flight: usize,
    pub config: WorkerConfig,
}

/// Owns one initialized [`Load`] and one [`Worker`] driving its job.
///
/// The runner is a thin adapter: configuration updates are forwarded to the
/// worker unchanged and never reordered or batched; all scheduling semantics
/// live in the worker. Closing the runner cancels the worker and closes the
/// load.
pub struct LoadRunner {
    id: String,
    load: Arc<dyn Load>,
    worker: Worker,
    max_in_flight: usize,
    start_time: SystemTime,
    cancel: CancellationToken,
}

impl LoadRunner {
    /// Starts a runner over an already-initialized load.
    ///
    /// The worker measures every job and reports `(duration_seconds,
    /// success)` through `recorder` — timeouts and panics included.
    pub fn new(
        id: impl Into<String>,
        load: Arc<dyn Load>,
        max_in_flight: usize,
        cfg: WorkerConfig,
        recorder: Option<Recorder>,
    ) -> Result<Self, Error> {
        let id = id.into();
        let cancel = CancellationToken::new();

        let job_load = Arc::clone(&load);
        let job = move || {
            let load = Arc::clone(&job_load);
            async move { load.job().await }
        };

        let mut opts = WorkerOptions::builder()
            .config(cfg)
            .max_in_flight(max_in_flight)
            .parent(cancel.clone())
            .build();
        opts.recorder = recorder;
        let worker = Worker::spawn(job, opts)?;

        tracing::debug!(runner = %id, max_in_flight, "runner started");
        Ok(Self {
            id,
            load,
            worker,
            max_in_flight,
            start_time: SystemTime::now(),
            cancel,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Forwards a new configuration to the worker unchanged.
    pub async fn set_config(&self, cfg: WorkerConfig) -> Result<(), Error> {
        self.worker.set_config(cfg).await
    }

    /// Current snapshot; fails with [`Error::Closed`] once the worker has
    /// terminated.
    pub async fn info(&self) -> Result<LoadRunnerInfo, Error> {
        let config = self.worker.get_config().await?;
        Ok(LoadRunnerInfo {
            id: self.id.clone(),
            start_time: self.start_time,
            max_in_flight: self.max_in_flight,
            config,
        })
    }

    /// Cancels the worker and closes the load. Safe to call more than once.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Err(err) = self.load.close().await {
            tracing::warn!(runner = %self.id, %err, "load close failed");
        }
    }
}
