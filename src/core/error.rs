//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The timeout queue no longer accepts tasks.
    #[error("timeout queue `{0}` is shut down")]
    QueueShutdown(String),
    /// The executor no longer accepts jobs or threads.
    #[error("executor `{0}` is shut down")]
    PoolShutdown(String),
    /// The OS refused to start a thread.
    #[error("failed to spawn thread `{name}`: {source}")]
    Spawn {
        /// Name of the thread that failed to start.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A wait ran out of time.
    #[error("operation timed out")]
    Timeout,
    /// The producing side went away without a result.
    #[error("result channel disconnected")]
    Disconnected,
    /// A spawned job panicked instead of returning.
    #[error("job panicked: {0}")]
    Panicked(String),
}

/// Outcome of a failed job body.
#[derive(Debug, Error)]
pub enum JobError {
    /// Cooperative interrupt: the worker running the job exits quietly.
    #[error("worker interrupted")]
    Interrupted,
    /// Ordinary failure, logged at the dispatch boundary.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl JobError {
    /// Wrap any error as an ordinary failure.
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Failed(error.into())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
