use thiserror::Error;

/// Errors surfaced by the engine's control surface.
///
/// Job failures never appear here: a failed job is reported to the recorder
/// as an unsuccessful sample and is otherwise opaque to the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-provided value violates a constraint: a negative rate, an
    /// unknown mode or load type, an ill-typed option value.
    #[error("invalid: {0}")]
    Invalid(String),

    /// The referenced runner does not exist (or no longer exists; ids are
    /// never reused).
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation was invoked on a worker or runner that has terminated.
    #[error("closed")]
    Closed,

    /// A load failed to initialize; the runner was not registered.
    #[error("unavailable: {0}")]
    Unavailable(String),
}
