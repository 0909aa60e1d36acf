//! Durable job queue.
//!
//! Every lane has a ready list, an in-flight set with execution deadlines and
//! a retry schedule. A job moves ready -> in-flight on dequeue, and leaves
//! in-flight through exactly one of ack, retry or the dead-letter list.
//! Each dequeue hands out a fresh lease token; ack and fail calls carrying an
//! outdated lease (the job was reaped and re-run meanwhile) are ignored.

mod memory;
mod redis;

pub use memory::MemoryJobQueue;
pub use redis::RedisJobQueue;

use std::time::Duration;

use async_trait::async_trait;
use fanout_common::AppResult;
use fanout_common::config::QueueConfig;

use crate::job::{EnqueueOptions, Job, JobEnvelope, Lane};
use crate::retry::{DeadLetterEntry, RetryConfig};

/// Error recorded for jobs reclaimed from a dead worker.
pub const STALLED_ERROR: &str = "execution deadline exceeded";

/// Queue behavior shared by the backends.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Time a dequeued job may stay in flight before it is reaped.
    pub execution_timeout: Duration,
    /// Backoff between retries.
    pub retry: RetryConfig,
    /// Dead-letter entries kept.
    pub dead_letter_max: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(300),
            retry: RetryConfig::default(),
            dead_letter_max: 10_000,
        }
    }
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            execution_timeout: config.execution_timeout(),
            retry: RetryConfig::from(config),
            dead_letter_max: config.dead_letter_max,
        }
    }
}

/// Result of an enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    /// ID of the new job, or of the existing job holding the uniqueness key.
    pub id: String,
    /// Whether the enqueue was absorbed by an existing job.
    pub duplicate: bool,
}

/// What a failure did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled again.
    Retrying {
        /// Failed executions so far.
        attempt: u32,
        /// Delay before it becomes ready.
        delay: Duration,
    },
    /// Moved to the dead-letter list.
    Dead,
    /// The lease was outdated; nothing changed.
    Stale,
}

/// A retryable job queue with lanes and uniqueness keys.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job.
    ///
    /// If a job with the same uniqueness key is pending, scheduled for retry or
    /// running, nothing is added and that job's ID is returned.
    async fn enqueue(&self, job: Job, options: EnqueueOptions) -> AppResult<Enqueued>;

    /// Take the next ready job of a lane and mark it in flight.
    async fn dequeue(&self, lane: Lane) -> AppResult<Option<JobEnvelope>>;

    /// Remove a finished job and free its uniqueness key.
    ///
    /// Returns `false` when the lease was outdated.
    async fn ack(&self, envelope: &JobEnvelope) -> AppResult<bool>;

    /// Record a failed execution: retry with backoff, or dead-letter the job
    /// once `max_retries` retries have been used.
    async fn fail(&self, envelope: &JobEnvelope, error: &str) -> AppResult<FailOutcome>;

    /// Dead-letter a job right away, freeing its uniqueness key.
    ///
    /// Returns `false` when the lease was outdated.
    async fn bury(&self, envelope: &JobEnvelope, error: &str) -> AppResult<bool>;

    /// Move retries that are due back to the ready list. Returns how many moved.
    async fn promote_due(&self, lane: Lane) -> AppResult<usize>;

    /// Fail every in-flight job whose execution deadline passed, returning
    /// each reaped job with what happened to it.
    async fn reap_stalled(&self, lane: Lane) -> AppResult<Vec<(JobEnvelope, FailOutcome)>>;

    /// Most recent dead-letter entries, newest first.
    async fn dead_letters(&self, limit: usize) -> AppResult<Vec<DeadLetterEntry<Job>>>;

    /// Jobs waiting in the ready list of a lane.
    async fn ready_count(&self, lane: Lane) -> AppResult<usize>;
}

/// The envelope a failure turns `envelope` into.
fn failed_copy(envelope: &JobEnvelope, error: &str) -> JobEnvelope {
    let mut failed = envelope.clone();
    failed.attempts += 1;
    failed.last_error = Some(error.to_string());
    failed.lease = None;
    failed
}
