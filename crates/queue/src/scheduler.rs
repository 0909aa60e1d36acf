//! Periodic queue maintenance.
//!
//! On every tick, for each lane: promote retries that are due and reap jobs
//! whose execution deadline passed. Reaped jobs that end up dead-lettered go
//! through the handler's dead-letter hook. Metrics are logged on a slower
//! interval.

use std::sync::Arc;
use std::time::Duration;

use fanout_common::config::QueueConfig;
use fanout_common::{AppResult, Metrics};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::job::Lane;
use crate::queue::{FailOutcome, JobQueue};
use crate::workers::{JobHandler, settle_dead};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval of retry promotion and stalled-job reaping (default: 5 seconds).
    pub maintenance_interval: Duration,
    /// Interval of metrics logging (default: 1 minute).
    pub metrics_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(5),
            metrics_interval: Duration::from_secs(60),
        }
    }
}

impl From<&QueueConfig> for SchedulerConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            maintenance_interval: config.scheduler_interval(),
            ..Self::default()
        }
    }
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Retries moved back to ready lists.
    pub promoted: usize,
    /// Stalled jobs failed.
    pub reaped: usize,
    /// Stalled jobs that were out of retries.
    pub dead: usize,
}

/// Runs queue maintenance.
#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
    handler: Option<Arc<dyn JobHandler>>,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, metrics: Arc<Metrics>, config: SchedulerConfig) -> Self {
        Self {
            queue,
            metrics,
            config,
            handler: None,
        }
    }

    /// Run `handler`'s dead-letter hook for reaped jobs that are out of retries.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// One pass over every lane.
    pub async fn run_maintenance(&self) -> AppResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        for lane in Lane::ALL {
            report.promoted += self.queue.promote_due(lane).await?;

            for (envelope, outcome) in self.queue.reap_stalled(lane).await? {
                match outcome {
                    FailOutcome::Retrying { .. } => {
                        report.reaped += 1;
                        Metrics::incr(&self.metrics.jobs_retried);
                    }
                    FailOutcome::Dead => {
                        report.reaped += 1;
                        report.dead += 1;
                        Metrics::incr(&self.metrics.jobs_dead);
                        if let Some(handler) = &self.handler {
                            settle_dead(handler.as_ref(), &envelope).await;
                        }
                    }
                    FailOutcome::Stale => {}
                }
            }
        }

        if report.reaped > 0 {
            info!(reaped = report.reaped, dead = report.dead, "Reclaimed stalled jobs");
        }
        if report.promoted > 0 {
            debug!(promoted = report.promoted, "Promoted due retries");
        }
        Ok(report)
    }

    /// Spawn the maintenance and metrics loops. Both stop on `shutdown`.
    pub fn spawn(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let maintenance = {
            let scheduler = self.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = interval(scheduler.config.maintenance_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = scheduler.run_maintenance().await {
                                error!(error = %e, "Queue maintenance failed");
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                debug!("Queue maintenance stopped");
            })
        };

        let metrics = {
            let metrics = self.metrics.clone();
            let period = self.config.metrics_interval;
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = interval(period);
                // The first tick completes immediately.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let s = metrics.snapshot();
                            info!(
                                jobs_enqueued = s.jobs_enqueued,
                                jobs_deduplicated = s.jobs_deduplicated,
                                jobs_completed = s.jobs_completed,
                                jobs_retried = s.jobs_retried,
                                jobs_dead = s.jobs_dead,
                                jobs_timed_out = s.jobs_timed_out,
                                job_avg_time_us = s.job_avg_time_us,
                                distributions_completed = s.distributions_completed,
                                distributions_skipped = s.distributions_skipped,
                                delivery_failures = s.delivery_failures,
                                references_resolved = s.references_resolved,
                                references_dropped = s.references_dropped,
                                republishes = s.republishes,
                                reaction_caches_refreshed = s.reaction_caches_refreshed,
                                "Pipeline metrics"
                            );
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        vec![maintenance, metrics]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fanout_core::DistributionOptions;

    use super::*;
    use crate::job::{EnqueueOptions, Job};
    use crate::queue::{MemoryJobQueue, QueueSettings};
    use crate::retry::RetryConfig;

    fn job(status_id: i64) -> (Job, EnqueueOptions) {
        let job = Job::Distribute {
            status_id,
            options: DistributionOptions::default(),
        };
        let options = EnqueueOptions::for_job(&job, 1);
        (job, options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_reaps_and_promotes() {
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings {
            execution_timeout: Duration::from_secs(30),
            retry: RetryConfig::fixed(Duration::from_secs(10), Duration::from_secs(10)),
            dead_letter_max: 10,
        }));
        let metrics = Arc::new(Metrics::new());
        let scheduler = Scheduler::new(queue.clone(), metrics.clone(), SchedulerConfig::default());

        let (job, options) = job(42);
        queue.enqueue(job, options).await.unwrap();
        let _abandoned = queue.dequeue(Lane::Default).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        let report = scheduler.run_maintenance().await.unwrap();
        assert_eq!(report.reaped, 1);
        assert_eq!(report.promoted, 0);
        assert_eq!(queue.ready_count(Lane::Default).await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(11)).await;
        let report = scheduler.run_maintenance().await.unwrap();
        assert_eq!(report.promoted, 1);
        assert_eq!(queue.ready_count(Lane::Default).await.unwrap(), 1);

        // Abandoned again: out of retries.
        let _abandoned = queue.dequeue(Lane::Default).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        let report = scheduler.run_maintenance().await.unwrap();
        assert_eq!(report.dead, 1);

        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead[0].last_error, crate::queue::STALLED_ERROR);
        assert_eq!(metrics.snapshot().jobs_dead, 1);
    }

    #[derive(Default)]
    struct DeadRecorder {
        dead: tokio::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl JobHandler for DeadRecorder {
        async fn execute(&self, _envelope: &crate::job::JobEnvelope) -> AppResult<()> {
            Ok(())
        }

        async fn on_dead(&self, envelope: &crate::job::JobEnvelope) -> AppResult<()> {
            self.dead.lock().await.push(envelope.id.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaped_dead_job_runs_dead_hook() {
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings {
            execution_timeout: Duration::from_secs(30),
            retry: RetryConfig::fixed(Duration::ZERO, Duration::ZERO),
            dead_letter_max: 10,
        }));
        let handler = Arc::new(DeadRecorder::default());
        let scheduler = Scheduler::new(queue.clone(), Arc::new(Metrics::new()), SchedulerConfig::default())
            .with_handler(handler.clone());

        let (job, _) = job(42);
        queue.enqueue(job.clone(), EnqueueOptions::for_job(&job, 0)).await.unwrap();
        let abandoned = queue.dequeue(Lane::Default).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        let report = scheduler.run_maintenance().await.unwrap();

        assert_eq!(report.dead, 1);
        assert_eq!(*handler.dead.lock().await, vec![abandoned.id]);
    }

    #[tokio::test]
    async fn test_spawned_loops_stop_on_shutdown() {
        let queue = Arc::new(MemoryJobQueue::default());
        let scheduler = Scheduler::new(
            queue,
            Arc::new(Metrics::new()),
            SchedulerConfig {
                maintenance_interval: Duration::from_millis(10),
                metrics_interval: Duration::from_millis(10),
            },
        );

        let (tx, rx) = watch::channel(false);
        let handles = scheduler.spawn(&rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
