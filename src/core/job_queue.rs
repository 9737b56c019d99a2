//! Default task source: a growable ring buffer paired with a condition.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::condition::Condition;
use crate::config::RingConfig;
use crate::core::executor::{Job, Pull, TaskSource};
use crate::core::worker_pool::WorkerContext;
use crate::ring_buffer::GrowableRingBuffer;

/// Lock-free FIFO hand-off queue between producers and pool workers.
pub struct JobQueue {
    jobs: GrowableRingBuffer<Box<dyn Job>>,
    condition: Condition,
    open: AtomicBool,
    submitted: AtomicU64,
}

impl JobQueue {
    /// Queue sized from `config`.
    #[must_use]
    pub fn new(config: &RingConfig) -> Self {
        Self {
            jobs: GrowableRingBuffer::from_config(config),
            condition: Condition::new(),
            open: AtomicBool::new(true),
            submitted: AtomicU64::new(0),
        }
    }

    /// Queue starting at `capacity` slots with the default growth policy.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(&RingConfig::default().with_capacity(capacity))
    }

    /// Enqueue `job` and wake one idle worker.
    ///
    /// Returns `false` once the queue has been closed.
    pub fn submit(&self, job: Box<dyn Job>) -> bool {
        if !self.is_open() {
            return false;
        }
        self.jobs.add(job);
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.condition.signal_one();
        true
    }

    /// Whether new jobs are accepted.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Jobs accepted since creation.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Jobs waiting to be pulled.
    pub fn len(&self) -> usize {
        self.jobs.size()
    }

    /// Whether no job is waiting.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl TaskSource for JobQueue {
    fn condition(&self) -> &Condition {
        &self.condition
    }

    fn next_job(&self, _worker: &WorkerContext) -> Pull {
        match self.jobs.take() {
            Some(job) => Pull::Job(job),
            None if self.is_open() => Pull::Empty,
            None => Pull::Exit,
        }
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.condition.signal_all();
        }
    }

    fn backlog(&self) -> usize {
        self.len()
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("len", &self.len())
            .field("open", &self.is_open())
            .field("submitted", &self.submitted())
            .finish_non_exhaustive()
    }
}
