//! Job workers.
//!
//! A [`WorkerPool`] runs `concurrency` polling tasks per lane. Each task
//! dequeues one job, runs it through the [`JobHandler`] under the execution
//! timeout, and settles it: ack on success, dead-letter on a terminal error,
//! retry with backoff otherwise.

mod handler;

pub use handler::FanoutJobHandler;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fanout_common::config::QueueConfig;
use fanout_common::{AppError, AppResult, Metrics};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::job::{JobEnvelope, Lane};
use crate::queue::{FailOutcome, JobQueue};

/// Executes dequeued jobs.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one job. Errors are classified with [`AppError::is_retryable`].
    async fn execute(&self, envelope: &JobEnvelope) -> AppResult<()>;

    /// Called once a job has been dead-lettered, whether by a worker or by
    /// the stalled-job reaper. `execute` may never have returned for it.
    async fn on_dead(&self, _envelope: &JobEnvelope) -> AppResult<()> {
        Ok(())
    }
}

/// Run the dead-letter hook of `handler`, logging a failure.
pub(crate) async fn settle_dead(handler: &dyn JobHandler, envelope: &JobEnvelope) {
    if let Err(e) = handler.on_dead(envelope).await {
        error!(
            job_id = %envelope.id,
            kind = envelope.job.kind(),
            error = %e,
            "Dead-letter cleanup failed"
        );
    }
}

/// How a processed job was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Acknowledged and removed.
    Completed,
    /// Scheduled for another attempt.
    Retrying {
        /// Failed executions so far.
        attempt: u32,
        /// Delay before the job is ready again.
        delay: Duration,
    },
    /// Moved to the dead-letter list.
    Dead,
    /// The job was reclaimed by the reaper while running; the result was dropped.
    Stale,
}

/// Worker timing.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Sleep between polls of an empty lane.
    pub poll_interval: Duration,
    /// Maximum execution time of a single job.
    pub execution_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            execution_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&QueueConfig> for WorkerSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            execution_timeout: config.execution_timeout(),
        }
    }
}

/// Polls lanes and executes jobs.
#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    metrics: Arc<Metrics>,
    settings: WorkerSettings,
}

impl WorkerPool {
    /// Create a worker pool.
    #[must_use]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        metrics: Arc<Metrics>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            handler,
            metrics,
            settings,
        }
    }

    /// Spawn `concurrency` workers on `lane`. They stop once `shutdown` turns
    /// `true` or its sender is dropped, finishing the job in hand first.
    pub fn spawn(
        &self,
        lane: Lane,
        concurrency: usize,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        info!(lane = %lane, concurrency, "Starting workers");
        (0..concurrency)
            .map(|worker| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run(lane, worker, shutdown).await })
            })
            .collect()
    }

    async fn run(self, lane: Lane, worker: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once(lane).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(lane = %lane, worker, error = %e, "Worker poll failed"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        debug!(lane = %lane, worker, "Worker stopped");
    }

    /// Dequeue and process one job. Returns `None` when the lane is empty.
    pub async fn run_once(&self, lane: Lane) -> AppResult<Option<JobOutcome>> {
        match self.queue.dequeue(lane).await? {
            Some(envelope) => self.process(&envelope).await.map(Some),
            None => Ok(None),
        }
    }

    /// Execute a dequeued job and settle it in the queue.
    pub async fn process(&self, envelope: &JobEnvelope) -> AppResult<JobOutcome> {
        let started = Instant::now();
        debug!(
            job_id = %envelope.id,
            kind = envelope.job.kind(),
            attempt = envelope.attempts + 1,
            "Executing job"
        );

        let result = match tokio::time::timeout(
            self.settings.execution_timeout,
            self.handler.execute(envelope),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                Metrics::incr(&self.metrics.jobs_timed_out);
                Err(AppError::Timeout(format!(
                    "job {} ran longer than {:?}",
                    envelope.id, self.settings.execution_timeout
                )))
            }
        };
        let elapsed = started.elapsed();

        let error = match result {
            Ok(()) => {
                self.metrics.record_job(elapsed, true);
                if !self.queue.ack(envelope).await? {
                    warn!(job_id = %envelope.id, "Job was reclaimed before it could be acked");
                    return Ok(JobOutcome::Stale);
                }
                debug!(job_id = %envelope.id, elapsed_ms = elapsed.as_millis() as u64, "Job completed");
                return Ok(JobOutcome::Completed);
            }
            Err(e) => e,
        };
        self.metrics.record_job(elapsed, false);

        if !error.is_retryable() {
            warn!(
                job_id = %envelope.id,
                kind = envelope.job.kind(),
                code = error.error_code(),
                error = %error,
                "Job failed permanently"
            );
            if !self.queue.bury(envelope, &error.to_string()).await? {
                return Ok(JobOutcome::Stale);
            }
            Metrics::incr(&self.metrics.jobs_dead);
            settle_dead(self.handler.as_ref(), envelope).await;
            return Ok(JobOutcome::Dead);
        }

        let outcome = match self.queue.fail(envelope, &error.to_string()).await? {
            FailOutcome::Retrying { attempt, delay } => {
                Metrics::incr(&self.metrics.jobs_retried);
                warn!(
                    job_id = %envelope.id,
                    kind = envelope.job.kind(),
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %error,
                    "Job failed, retrying"
                );
                JobOutcome::Retrying { attempt, delay }
            }
            FailOutcome::Dead => {
                Metrics::incr(&self.metrics.jobs_dead);
                error!(
                    job_id = %envelope.id,
                    kind = envelope.job.kind(),
                    attempts = envelope.attempts + 1,
                    error = %error,
                    "Job exhausted its retries"
                );
                settle_dead(self.handler.as_ref(), envelope).await;
                JobOutcome::Dead
            }
            FailOutcome::Stale => JobOutcome::Stale,
        };
        Ok(outcome)
    }
}
