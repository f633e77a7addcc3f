//! Ballast — a load-generation engine with live-tunable workers.
//!
//! Ballast drives user-supplied units of work ("loads") against remote
//! targets under a regime of concurrency limits, pacing policies, and
//! per-job deadlines, all of which can be changed while the engine runs.
//! It is a local orchestration layer: it implements no network protocol,
//! no storage, and no UI of its own.
//!
//! # Architecture
//!
//! The main building blocks, from the bottom up:
//!
//! - [`Worker`]: a single cooperative scheduler loop that issues jobs
//!   subject to an in-flight cap, an inter-arrival pacing policy (ASAP,
//!   fixed, or exponentially distributed intervals), and a per-job timeout.
//!   All three knobs are reconfigurable at runtime without dropping
//!   in-flight jobs and without ever exceeding the previous ceiling during
//!   a transition.
//! - [`Load`]: the contract for a pluggable unit of work — initialization,
//!   a concurrently-invocable job, teardown, and self-described options.
//! - [`LoadRunner`]: binds one load to one worker and surfaces a status
//!   snapshot.
//! - [`LoadTester`]: a registry of runners with unique identities,
//!   per-runner sample counters, and concurrent add/update/remove
//!   operations.
//!
//! Observation is push-based: every job completion (timeouts included)
//! produces exactly one `(duration_seconds, success)` sample through a
//! [`Recorder`] callback. The built-in [`StatsSink`] aggregates samples per
//! runner; exporters plug in by supplying their own recorder.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! use ballast::loads::SleepLoad;
//! use ballast::{Load, LoadTester, PacingMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ballast::Error> {
//!     let mut tester = LoadTester::new(1000);
//!     tester.register_load("sleep", Box::new(|| Box::new(SleepLoad::default()) as Box<dyn Load>));
//!
//!     let id = tester
//!         .add_runner(
//!             "sleep",
//!             BTreeMap::new(),
//!             8,                          // in-flight jobs
//!             50.0,                       // qps
//!             Duration::from_secs(1),     // per-job timeout
//!             PacingMode::Static,
//!         )
//!         .await?;
//!
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     for status in tester.runners_info().await {
//!         println!("{}: ok={} err={}", status.id, status.ok_requests, status.err_requests);
//!     }
//!
//!     tester.remove_runner(&id).await?;
//!     tester.close().await;
//!     Ok(())
//! }
//! ```

/// Error kinds of the control surface
pub mod error;
/// The pluggable unit-of-work contract
pub mod load;
/// Built-in loads
pub mod loads;
/// Recorder callback and the process-local sample sink
pub mod metrics;
/// Declarative option binding for loads
pub mod options;
/// Adapter binding a load to a worker
pub mod runner;
/// Multi-runner registry and control surface
pub mod tester;
/// The cooperative scheduler
pub mod worker;

pub use error::Error;
pub use load::{Load, LoadFactory};
pub use metrics::{Recorder, RunnerCounts, StatsSink};
pub use options::{bind_options, describe_options, OptionDescriptor, OptionInfo, OptionKind, OptionValue};
pub use runner::{LoadRunner, LoadRunnerInfo};
pub use tester::{LoadTester, PacingMode, RunnerStatus};
pub use worker::{
    exponential_interval, fixed_interval, IntervalGenerator, JobError, JobOutcome, Worker,
    WorkerConfig, WorkerOptions,
};
