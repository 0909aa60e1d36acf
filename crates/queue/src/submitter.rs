//! Queue-backed [`JobSubmitter`].

use std::sync::Arc;

use async_trait::async_trait;
use fanout_common::{AppResult, Metrics};
use fanout_core::{DistributionOptions, EmojiId, JobSubmitter, ResolveOptions, StatusId};
use tracing::debug;

use crate::job::{EnqueueOptions, Job};
use crate::queue::JobQueue;

/// Translates service requests into queued jobs with per-kind retry budgets.
#[derive(Clone)]
pub struct QueueJobSubmitter {
    queue: Arc<dyn JobQueue>,
    metrics: Arc<Metrics>,
    distribution_retries: u32,
    reference_retries: u32,
}

impl QueueJobSubmitter {
    /// Create a submitter.
    #[must_use]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        metrics: Arc<Metrics>,
        distribution_retries: u32,
        reference_retries: u32,
    ) -> Self {
        Self {
            queue,
            metrics,
            distribution_retries,
            reference_retries,
        }
    }

    async fn submit(&self, job: Job, max_retries: u32) -> AppResult<String> {
        let options = EnqueueOptions::for_job(&job, max_retries);
        let kind = job.kind();
        let enqueued = self.queue.enqueue(job, options).await?;

        if enqueued.duplicate {
            Metrics::incr(&self.metrics.jobs_deduplicated);
            debug!(job_id = %enqueued.id, kind, "Job already queued");
        } else {
            Metrics::incr(&self.metrics.jobs_enqueued);
            debug!(job_id = %enqueued.id, kind, "Job queued");
        }
        Ok(enqueued.id)
    }
}

#[async_trait]
impl JobSubmitter for QueueJobSubmitter {
    async fn submit_distribution(
        &self,
        status_id: StatusId,
        options: DistributionOptions,
    ) -> AppResult<String> {
        self.submit(
            Job::Distribute { status_id, options },
            self.distribution_retries,
        )
        .await
    }

    async fn submit_reference_resolution(
        &self,
        status_id: StatusId,
        reference_url: &str,
        options: ResolveOptions,
    ) -> AppResult<String> {
        self.submit(
            Job::ResolveReference {
                status_id,
                reference_url: reference_url.to_string(),
                options,
            },
            self.reference_retries,
        )
        .await
    }

    async fn submit_cache_invalidation(&self, emoji_ids: Vec<EmojiId>) -> AppResult<String> {
        self.submit(
            Job::RefreshEmojiReactions { emoji_ids },
            self.distribution_retries,
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::job::Lane;
    use crate::queue::{MemoryJobQueue, QueueSettings};

    #[tokio::test]
    async fn test_duplicate_submission_returns_existing_job() {
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings::default()));
        let metrics = Arc::new(Metrics::new());
        let submitter = QueueJobSubmitter::new(queue.clone(), metrics.clone(), 5, 3);

        let first = submitter
            .submit_distribution(42, DistributionOptions::default())
            .await
            .unwrap();
        let second = submitter
            .submit_distribution(42, DistributionOptions::default())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(queue.ready_count(Lane::Default).await.unwrap(), 1);
        assert_eq!(metrics.jobs_enqueued.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.jobs_deduplicated.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_reference_jobs_use_pull_lane_and_budget() {
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings::default()));
        let submitter = QueueJobSubmitter::new(queue.clone(), Arc::new(Metrics::new()), 5, 3);

        submitter
            .submit_reference_resolution(42, "https://remote.example/s/1", ResolveOptions::default())
            .await
            .unwrap();

        let envelope = queue.dequeue(Lane::Pull).await.unwrap().unwrap();
        assert_eq!(envelope.max_retries, 3);
        assert_eq!(envelope.job.kind(), "resolve_reference");
    }
}
