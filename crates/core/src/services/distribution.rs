//! Fan-out dispatcher.
//!
//! A distribution runs under `lock:distribute:<status_id>` so at most one
//! worker fans out a given status at a time:
//!
//! ```text
//! Pending -> Locked -> Distributing -> Done
//!               \            \
//!                Skipped      Failed
//! ```
//!
//! `Skipped` surfaces as a retryable [`AppError::Conflict`]. Individual target
//! failures do not fail the distribution; each failed target is re-submitted
//! as its own scoped job.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use fanout_common::{AppError, AppResult, Metrics};
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::coordination::{LockAcquisition, LockManager, lock_key};
use super::event_publisher::{EventPublisher, StreamChannel, StreamEvent};
use super::jobs::{DeliveryTarget, DistributionOptions, JobSubmitter};
use super::search::SearchIndexer;
use super::timeline::TimelineStore;
use crate::model::{Status, StatusId, Visibility};
use crate::store::StatusStore;

/// Lifecycle phase of a distribution, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionPhase {
    /// Received, lock not yet attempted.
    Pending,
    /// Lock held.
    Locked,
    /// Delivering to targets.
    Distributing,
    /// Finished; the lock has been released.
    Done,
    /// Another worker holds the lock.
    Skipped,
    /// Unexpected error; handed to the queue's retry policy.
    Failed,
}

impl DistributionPhase {
    /// Name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Locked => "locked",
            Self::Distributing => "distributing",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of a successful distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionReport {
    /// Distributed status.
    pub status_id: StatusId,
    /// Final phase.
    pub phase: DistributionPhase,
    /// `false` when the status was already gone.
    pub status_found: bool,
    /// Targets delivered to.
    pub delivered: Vec<DeliveryTarget>,
    /// Targets that failed and were re-submitted.
    pub failed: Vec<DeliveryTarget>,
}

impl DistributionReport {
    const fn missing(status_id: StatusId) -> Self {
        Self {
            status_id,
            phase: DistributionPhase::Done,
            status_found: false,
            delivered: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Fan-out dispatcher.
#[derive(Clone)]
pub struct DistributionService {
    store: Arc<dyn StatusStore>,
    timelines: Arc<dyn TimelineStore>,
    publisher: Arc<dyn EventPublisher>,
    search: Arc<dyn SearchIndexer>,
    locks: Arc<dyn LockManager>,
    jobs: Arc<dyn JobSubmitter>,
    metrics: Arc<Metrics>,
    lock_lease: Duration,
}

impl DistributionService {
    /// Create a new dispatcher.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Arc<dyn StatusStore>,
        timelines: Arc<dyn TimelineStore>,
        publisher: Arc<dyn EventPublisher>,
        search: Arc<dyn SearchIndexer>,
        locks: Arc<dyn LockManager>,
        jobs: Arc<dyn JobSubmitter>,
        metrics: Arc<Metrics>,
        lock_lease: Duration,
    ) -> Self {
        Self {
            store,
            timelines,
            publisher,
            search,
            locks,
            jobs,
            metrics,
            lock_lease,
        }
    }

    /// Distribute a status.
    ///
    /// Returns [`AppError::Conflict`] when another worker is distributing the
    /// same status. A status that no longer exists is a successful no-op.
    pub async fn distribute(
        &self,
        status_id: StatusId,
        options: &DistributionOptions,
    ) -> AppResult<DistributionReport> {
        let key = lock_key("distribute", status_id);
        debug!(
            status_id,
            phase = DistributionPhase::Pending.as_str(),
            update = options.update,
            "Distribution requested"
        );

        let handle = match self.locks.acquire(&key, self.lock_lease).await? {
            LockAcquisition::Acquired(handle) => handle,
            LockAcquisition::Busy => {
                Metrics::incr(&self.metrics.distributions_skipped);
                info!(
                    status_id,
                    phase = DistributionPhase::Skipped.as_str(),
                    "Distribution already in progress"
                );
                return Err(AppError::Conflict(key));
            }
        };
        debug!(status_id, phase = DistributionPhase::Locked.as_str(), "Lock acquired");

        let result = self.distribute_locked(status_id, options).await;

        match self.locks.release(&handle).await {
            Ok(true) => {}
            Ok(false) => warn!(status_id, "Distribution lock expired before release"),
            Err(e) => warn!(status_id, error = %e, "Failed to release distribution lock"),
        }

        match &result {
            Ok(report) => {
                if report.status_found {
                    Metrics::incr(&self.metrics.distributions_completed);
                }
                info!(
                    status_id,
                    phase = report.phase.as_str(),
                    update = options.update,
                    delivered = report.delivered.len(),
                    failed = report.failed.len(),
                    "Distribution finished"
                );
            }
            Err(e) => warn!(
                status_id,
                phase = DistributionPhase::Failed.as_str(),
                error = %e,
                "Distribution failed"
            ),
        }

        result
    }

    async fn distribute_locked(
        &self,
        status_id: StatusId,
        options: &DistributionOptions,
    ) -> AppResult<DistributionReport> {
        let status = match self.store.get_status(status_id).await {
            Ok(status) => status,
            Err(e) if e.is_not_found() => {
                debug!(status_id, "Status is gone, nothing to distribute");
                return Ok(DistributionReport::missing(status_id));
            }
            Err(e) => return Err(e),
        };

        let targets = match &options.targets {
            Some(targets) => targets.clone(),
            None => self.compute_targets(&status).await?,
        };
        debug!(
            status_id,
            phase = DistributionPhase::Distributing.as_str(),
            targets = targets.len(),
            "Delivering"
        );

        let event = stream_event(&status, options);
        let outcomes = join_all(
            targets
                .iter()
                .map(|target| self.deliver(&status, *target, &event, options.update)),
        )
        .await;

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        let mut first_error = None;
        for (target, outcome) in targets.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => delivered.push(target),
                Err(e) => {
                    Metrics::incr(&self.metrics.delivery_failures);
                    warn!(status_id, target = %target, error = %e, "Delivery target failed");
                    failed.push(target);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(error) = first_error {
            // A scoped job failing again goes through the queue's backoff.
            if options.targets.is_some() {
                return Err(error);
            }
            for target in &failed {
                self.jobs
                    .submit_distribution(status_id, options.scoped_to(*target))
                    .await?;
            }
        }

        Ok(DistributionReport {
            status_id,
            phase: DistributionPhase::Done,
            status_found: true,
            delivered,
            failed,
        })
    }

    /// Compute every delivery target of a status.
    pub async fn compute_targets(&self, status: &Status) -> AppResult<Vec<DeliveryTarget>> {
        let mut homes = BTreeSet::new();
        if status.local {
            homes.insert(status.account_id);
        }
        if status.visibility.reaches_followers() {
            homes.extend(self.store.local_follower_ids(status.account_id).await?);
        }
        if status.visibility.reaches_mentions() {
            homes.extend(
                self.store
                    .filter_local_accounts(&status.mentioned_account_ids)
                    .await?,
            );
        }

        let mut targets: Vec<DeliveryTarget> = homes
            .into_iter()
            .map(|account_id| DeliveryTarget::Home { account_id })
            .collect();
        if status.visibility == Visibility::Public {
            targets.push(DeliveryTarget::Public);
        }
        if self.search.is_enabled() && status.visibility.is_searchable() {
            targets.push(DeliveryTarget::Search);
        }
        Ok(targets)
    }

    async fn deliver(
        &self,
        status: &Status,
        target: DeliveryTarget,
        event: &StreamEvent,
        update: bool,
    ) -> AppResult<()> {
        match target {
            DeliveryTarget::Home { account_id } => {
                if !update {
                    self.timelines.push_home(account_id, status.id).await?;
                }
                self.publisher
                    .publish(StreamChannel::Home(account_id), event)
                    .await
            }
            DeliveryTarget::Public => {
                if !update {
                    self.timelines.push_public(status.id, status.local).await?;
                }
                self.publisher.publish(StreamChannel::Public, event).await?;
                if status.local {
                    self.publisher
                        .publish(StreamChannel::LocalPublic, event)
                        .await?;
                }
                Ok(())
            }
            DeliveryTarget::Search => self.search.index_status(status).await,
        }
    }
}

fn stream_event(status: &Status, options: &DistributionOptions) -> StreamEvent {
    if options.update {
        StreamEvent::StatusUpdated {
            status_id: status.id,
            account_id: status.account_id,
            references_changed: options.references_changed,
        }
    } else {
        StreamEvent::StatusCreated {
            status_id: status.id,
            account_id: status.account_id,
            visibility: status.visibility,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::{
        MemoryLockManager, MemorySearchIndexer, MemoryStore, MemoryTimelineStore,
        RecordingJobSubmitter, RecordingPublisher,
    };
    use crate::model::AccountId;
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::{Notify, Semaphore};

    const AUTHOR: AccountId = 1;
    const FOLLOWER_A: AccountId = 10;
    const FOLLOWER_B: AccountId = 11;
    const REMOTE_FOLLOWER: AccountId = 12;
    const MENTIONED: AccountId = 20;

    struct Harness {
        store: Arc<MemoryStore>,
        timelines: Arc<MemoryTimelineStore>,
        publisher: Arc<RecordingPublisher>,
        search: Arc<MemorySearchIndexer>,
        locks: Arc<MemoryLockManager>,
        jobs: Arc<RecordingJobSubmitter>,
        metrics: Arc<Metrics>,
    }

    impl Harness {
        async fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            store.insert_account(AUTHOR, "https://local.test/users/author", true).await;
            store.insert_account(FOLLOWER_A, "https://local.test/users/a", true).await;
            store.insert_account(FOLLOWER_B, "https://local.test/users/b", true).await;
            store
                .insert_account(REMOTE_FOLLOWER, "https://remote.example/users/c", false)
                .await;
            store.insert_account(MENTIONED, "https://local.test/users/m", true).await;
            store.follow(FOLLOWER_A, AUTHOR).await;
            store.follow(FOLLOWER_B, AUTHOR).await;
            store.follow(REMOTE_FOLLOWER, AUTHOR).await;

            Self {
                store,
                timelines: Arc::new(MemoryTimelineStore::new()),
                publisher: Arc::new(RecordingPublisher::new()),
                search: Arc::new(MemorySearchIndexer::new()),
                locks: Arc::new(MemoryLockManager::new()),
                jobs: Arc::new(RecordingJobSubmitter::new()),
                metrics: Arc::new(Metrics::new()),
            }
        }

        fn service_with_timelines(&self, timelines: Arc<dyn TimelineStore>) -> DistributionService {
            DistributionService::new(
                self.store.clone(),
                timelines,
                self.publisher.clone(),
                self.search.clone(),
                self.locks.clone(),
                self.jobs.clone(),
                self.metrics.clone(),
                Duration::from_secs(300),
            )
        }

        fn service(&self) -> DistributionService {
            self.service_with_timelines(self.timelines.clone())
        }

        async fn publish(&self, id: StatusId, visibility: Visibility) {
            self.store
                .insert_status(Status {
                    id,
                    account_id: AUTHOR,
                    local: true,
                    visibility,
                    uri: format!("https://local.test/statuses/{id}"),
                    url: None,
                    text: "hello".to_string(),
                    mentioned_account_ids: vec![MENTIONED],
                    reference_urls: vec![],
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
                .await;
        }
    }

    #[tokio::test]
    async fn test_happy_path_public_status() {
        let h = Harness::new().await;
        h.publish(42, Visibility::Public).await;

        let report = h
            .service()
            .distribute(42, &DistributionOptions::default())
            .await
            .unwrap();

        assert_eq!(report.phase, DistributionPhase::Done);
        assert!(report.failed.is_empty());
        assert_eq!(h.timelines.home(FOLLOWER_A).await, vec![42]);
        assert_eq!(h.timelines.home(FOLLOWER_B).await, vec![42]);
        assert_eq!(h.timelines.home(AUTHOR).await, vec![42]);
        assert!(h.timelines.home(REMOTE_FOLLOWER).await.is_empty());
        assert!(h.timelines.home(MENTIONED).await.is_empty());
        assert_eq!(h.timelines.public().await, vec![42]);
        assert_eq!(h.timelines.local().await, vec![42]);
        assert_eq!(h.search.indexed().await, vec![42]);
        assert!(!h.locks.is_locked("lock:distribute:42").await);
        assert_eq!(h.metrics.snapshot().distributions_completed, 1);

        let channels: Vec<StreamChannel> =
            h.publisher.events().await.into_iter().map(|(c, _)| c).collect();
        assert!(channels.contains(&StreamChannel::Home(FOLLOWER_A)));
        assert!(channels.contains(&StreamChannel::LocalPublic));
    }

    #[tokio::test]
    async fn test_busy_lock_is_conflict() {
        let h = Harness::new().await;
        h.publish(42, Visibility::Public).await;
        h.locks
            .acquire("lock:distribute:42", Duration::from_secs(300))
            .await
            .unwrap();

        let result = h.service().distribute(42, &DistributionOptions::default()).await;

        assert!(matches!(result, Err(AppError::Conflict(ref key)) if key == "lock:distribute:42"));
        assert!(result.unwrap_err().is_retryable());
        assert!(h.timelines.home(FOLLOWER_A).await.is_empty());
        assert_eq!(h.metrics.snapshot().distributions_skipped, 1);
    }

    #[tokio::test]
    async fn test_missing_status_is_noop() {
        let h = Harness::new().await;

        let report = h
            .service()
            .distribute(404, &DistributionOptions::default())
            .await
            .unwrap();

        assert!(!report.status_found);
        assert!(report.delivered.is_empty());
        assert!(!h.locks.is_locked("lock:distribute:404").await);
    }

    #[tokio::test]
    async fn test_direct_status_reaches_mentions_only() {
        let h = Harness::new().await;
        h.publish(43, Visibility::Direct).await;

        let report = h
            .service()
            .distribute(43, &DistributionOptions::default())
            .await
            .unwrap();

        assert_eq!(
            report.delivered,
            vec![
                DeliveryTarget::Home { account_id: AUTHOR },
                DeliveryTarget::Home { account_id: MENTIONED },
            ]
        );
        assert!(h.timelines.public().await.is_empty());
        assert!(h.search.indexed().await.is_empty());
    }

    #[tokio::test]
    async fn test_unlisted_is_indexed_but_not_public() {
        let h = Harness::new().await;
        h.publish(44, Visibility::Unlisted).await;

        h.service()
            .distribute(44, &DistributionOptions::default())
            .await
            .unwrap();

        assert!(h.timelines.public().await.is_empty());
        assert_eq!(h.search.indexed().await, vec![44]);
        assert_eq!(h.timelines.home(FOLLOWER_B).await, vec![44]);
    }

    #[tokio::test]
    async fn test_failed_target_is_resubmitted_alone() {
        let h = Harness::new().await;
        h.publish(42, Visibility::Public).await;
        h.timelines.fail_home(FOLLOWER_B).await;

        let report = h
            .service()
            .distribute(42, &DistributionOptions::default())
            .await
            .unwrap();

        assert_eq!(report.failed, vec![DeliveryTarget::Home { account_id: FOLLOWER_B }]);
        assert_eq!(h.timelines.home(FOLLOWER_A).await, vec![42]);
        assert_eq!(h.timelines.public().await, vec![42]);
        assert_eq!(h.metrics.snapshot().delivery_failures, 1);

        let retries = h.jobs.distributions(42).await;
        assert_eq!(retries.len(), 1);
        assert_eq!(
            retries[0].targets,
            Some(vec![DeliveryTarget::Home { account_id: FOLLOWER_B }])
        );
    }

    #[tokio::test]
    async fn test_scoped_retry_failure_propagates() {
        let h = Harness::new().await;
        h.publish(42, Visibility::Public).await;
        h.timelines.fail_home(FOLLOWER_B).await;

        let options =
            DistributionOptions::default().scoped_to(DeliveryTarget::Home { account_id: FOLLOWER_B });
        let result = h.service().distribute(42, &options).await;

        assert!(result.is_err());
        assert!(h.jobs.jobs().await.is_empty());
        assert!(h.timelines.home(FOLLOWER_A).await.is_empty());
    }

    #[tokio::test]
    async fn test_update_mode_streams_and_reindexes_only() {
        let h = Harness::new().await;
        h.publish(42, Visibility::Public).await;

        h.service()
            .distribute(42, &DistributionOptions::republish(true))
            .await
            .unwrap();

        assert!(h.timelines.home(FOLLOWER_A).await.is_empty());
        assert!(h.timelines.public().await.is_empty());
        assert_eq!(h.search.indexed().await, vec![42]);

        let events = h.publisher.events().await;
        assert!(!events.is_empty());
        assert!(events.iter().all(|(_, e)| matches!(
            e,
            StreamEvent::StatusUpdated {
                status_id: 42,
                references_changed: true,
                ..
            }
        )));
    }

    struct GatedTimeline {
        inner: MemoryTimelineStore,
        entered: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl TimelineStore for GatedTimeline {
        async fn push_home(&self, account_id: AccountId, status_id: StatusId) -> AppResult<()> {
            self.entered.notify_one();
            let _permit = self.gate.acquire().await.unwrap();
            self.inner.push_home(account_id, status_id).await
        }

        async fn push_public(&self, status_id: StatusId, local: bool) -> AppResult<()> {
            self.inner.push_public(status_id, local).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_single_distributing() {
        let h = Harness::new().await;
        h.publish(42, Visibility::Public).await;
        let gated = Arc::new(GatedTimeline {
            inner: MemoryTimelineStore::new(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        let service = h.service_with_timelines(gated.clone());

        let first = tokio::spawn({
            let service = service.clone();
            async move { service.distribute(42, &DistributionOptions::default()).await }
        });
        gated.entered.notified().await;

        let second = service.distribute(42, &DistributionOptions::default()).await;
        assert!(matches!(second, Err(AppError::Conflict(_))));

        gated.gate.add_permits(16);
        let report = first.await.unwrap().unwrap();
        assert_eq!(report.phase, DistributionPhase::Done);
        assert_eq!(gated.inner.home(FOLLOWER_A).await, vec![42]);
        assert_eq!(h.metrics.snapshot().distributions_completed, 1);
    }
}
