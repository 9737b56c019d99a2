//! Handles to results of jobs spawned on an executor.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::core::error::SchedulerError;

type Outcome<R> = Result<R, String>;

/// Receives the return value of a job started with
/// [`Executor::spawn`](crate::core::Executor::spawn).
pub struct JobHandle<R> {
    rx: Receiver<Outcome<R>>,
}

fn settle<R>(outcome: Outcome<R>) -> Result<R, SchedulerError> {
    outcome.map_err(SchedulerError::Panicked)
}

impl<R> JobHandle<R> {
    pub(crate) const fn new(rx: Receiver<Outcome<R>>) -> Self {
        Self { rx }
    }

    /// Block until the job finishes or `timeout` passes.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Timeout`] if the job is still running,
    /// [`SchedulerError::Panicked`] if it panicked, and
    /// [`SchedulerError::Disconnected`] if it was dropped without running
    /// or its result was already taken.
    pub fn join(&self, timeout: Duration) -> Result<R, SchedulerError> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => settle(outcome),
            Err(RecvTimeoutError::Timeout) => Err(SchedulerError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(SchedulerError::Disconnected),
        }
    }

    /// The result if the job already finished. Never blocks.
    pub fn try_join(&self) -> Option<Result<R, SchedulerError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(settle(outcome)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SchedulerError::Disconnected)),
        }
    }

    /// Whether a result is waiting to be taken.
    pub fn is_finished(&self) -> bool {
        !self.rx.is_empty()
    }
}

#[cfg(feature = "tokio-runtime")]
impl<R: Send + 'static> JobHandle<R> {
    /// Await the job from async code without blocking the runtime.
    ///
    /// # Errors
    ///
    /// Same as [`join`](Self::join).
    pub async fn join_async(self, timeout: Duration) -> Result<R, SchedulerError> {
        tokio::task::spawn_blocking(move || self.join(timeout))
            .await
            .map_err(|_| SchedulerError::Disconnected)?
    }
}

impl<R> fmt::Debug for JobHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}
