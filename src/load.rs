//! The contract between the engine and a pluggable unit of work.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Error;
use crate::options::OptionInfo;
use crate::worker::JobOutcome;

/// A load supplies initialization, a repeatedly-invoked unit of work, and
/// teardown. The engine treats the work itself as opaque: it only observes
/// the reported duration and success of each call.
///
/// Loads are registered with a [`LoadTester`](crate::tester::LoadTester)
/// under an explicit type name and constructed fresh for every runner.
#[async_trait]
pub trait Load: Send + Sync {
    /// Declared options with descriptions and current defaults, used by
    /// control surfaces to render forms and validate input.
    fn options(&self) -> Vec<OptionInfo>;

    /// One-time setup: parse `options`, open connections, discover
    /// identifiers. Fails with [`Error::Invalid`] for bad options and
    /// [`Error::Unavailable`] when the collaborator cannot be reached.
    async fn init(&mut self, options: &BTreeMap<String, String>) -> Result<(), Error>;

    /// Executes one unit of work. Must be safe to invoke concurrently and
    /// must tolerate being cancelled at any await point; the worker aborts
    /// jobs that exceed their deadline or outlive the runner.
    async fn job(&self) -> JobOutcome;

    /// Releases resources. Must be idempotent.
    async fn close(&self) -> Result<(), Error>;
}

/// Constructs fresh instances of a registered load type.
pub type LoadFactory = Box<dyn Fn() -> Box<dyn Load> + Send + Sync>;
