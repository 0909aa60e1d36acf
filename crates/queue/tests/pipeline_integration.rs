//! End-to-end pipeline tests on the in-memory backends.
//!
//! Jobs go through the real queue, worker pool and job handler; only storage,
//! feeds, streaming and remote fetches are in-process stand-ins.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fanout_common::Metrics;
use fanout_core::memory::{
    MemoryLockManager, MemoryResolutionTracker, MemorySearchIndexer, MemoryStore,
    MemoryTimelineStore, RecordingNotifier, RecordingPublisher, StubRemoteFetcher, StubResponse,
};
use fanout_core::{
    AccountId, CustomEmoji, DistributionOptions, DistributionService, EmojiReaction,
    EmojiReactionCacheService, JobSubmitter, LockAcquisition, LockManager, ReferenceResolver,
    RemoteStatus, ResolutionTracker, ResolverConfig, Status, StatusId, StatusStore, StreamChannel,
    StreamEvent, Visibility, lock_key,
};
use fanout_queue::{
    EnqueueOptions, FanoutJobHandler, Job, JobOutcome, JobQueue, Lane, MemoryJobQueue,
    QueueJobSubmitter, QueueSettings, RetryConfig, Scheduler, SchedulerConfig, WorkerPool,
    WorkerSettings,
};

const ALICE: AccountId = 1;
const FOLLOWER_A: AccountId = 10;
const FOLLOWER_B: AccountId = 11;
const REMOTE_FOLLOWER: AccountId = 12;

const DISTRIBUTION_RETRIES: u32 = 5;
const REFERENCE_RETRIES: u32 = 2;

struct Pipeline {
    store: Arc<MemoryStore>,
    timelines: Arc<MemoryTimelineStore>,
    publisher: Arc<RecordingPublisher>,
    search: Arc<MemorySearchIndexer>,
    locks: Arc<MemoryLockManager>,
    tracker: Arc<MemoryResolutionTracker>,
    fetcher: Arc<StubRemoteFetcher>,
    queue: Arc<MemoryJobQueue>,
    submitter: Arc<QueueJobSubmitter>,
    metrics: Arc<Metrics>,
    handler: Arc<FanoutJobHandler>,
    pool: WorkerPool,
}

impl Pipeline {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        store.insert_account(ALICE, "https://local.test/users/alice", true).await;
        store.insert_account(FOLLOWER_A, "https://local.test/users/a", true).await;
        store.insert_account(FOLLOWER_B, "https://local.test/users/b", true).await;
        store
            .insert_account(REMOTE_FOLLOWER, "https://remote.example/users/c", false)
            .await;
        for follower in [FOLLOWER_A, FOLLOWER_B, REMOTE_FOLLOWER] {
            store.follow(follower, ALICE).await;
        }

        let timelines = Arc::new(MemoryTimelineStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let search = Arc::new(MemorySearchIndexer::new());
        let locks = Arc::new(MemoryLockManager::new());
        let tracker = Arc::new(MemoryResolutionTracker::new());
        let fetcher = Arc::new(StubRemoteFetcher::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let metrics = Arc::new(Metrics::new());

        let queue = Arc::new(MemoryJobQueue::new(QueueSettings {
            execution_timeout: Duration::from_secs(60),
            retry: RetryConfig::fixed(Duration::from_secs(1), Duration::from_secs(1)),
            dead_letter_max: 100,
        }));
        let submitter = Arc::new(QueueJobSubmitter::new(
            queue.clone(),
            metrics.clone(),
            DISTRIBUTION_RETRIES,
            REFERENCE_RETRIES,
        ));

        let distribution = DistributionService::new(
            store.clone(),
            timelines.clone(),
            publisher.clone(),
            search.clone(),
            locks.clone(),
            submitter.clone(),
            metrics.clone(),
            Duration::from_secs(300),
        );
        let resolver = ReferenceResolver::new(
            store.clone(),
            fetcher.clone(),
            tracker.clone(),
            submitter.clone(),
            notifier,
            metrics.clone(),
            ResolverConfig {
                local_domain: "local.test".to_string(),
                max_references_per_status: 20,
            },
        );
        let reactions = EmojiReactionCacheService::new(store.clone(), metrics.clone());
        let handler = Arc::new(FanoutJobHandler::new(distribution, resolver, reactions));

        let pool = WorkerPool::new(
            queue.clone(),
            handler.clone(),
            metrics.clone(),
            WorkerSettings {
                poll_interval: Duration::from_millis(10),
                execution_timeout: Duration::from_secs(30),
            },
        );

        Self {
            store,
            timelines,
            publisher,
            search,
            locks,
            tracker,
            fetcher,
            queue,
            submitter,
            metrics,
            handler,
            pool,
        }
    }

    async fn post(&self, id: StatusId, visibility: Visibility, reference_urls: &[&str]) {
        self.store
            .insert_status(Status {
                id,
                account_id: ALICE,
                local: true,
                visibility,
                uri: format!("https://local.test/statuses/{id}"),
                url: None,
                text: "hello".to_string(),
                mentioned_account_ids: vec![],
                reference_urls: reference_urls.iter().map(ToString::to_string).collect(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await;
    }

    async fn remote_note(&self, url: &str) {
        self.fetcher
            .respond(
                url,
                StubResponse::Found(RemoteStatus {
                    uri: url.to_string(),
                    url: None,
                    account_uri: "https://remote.example/users/dave".to_string(),
                    visibility: Visibility::Public,
                    text: "remote".to_string(),
                    published: Utc::now(),
                }),
            )
            .await;
    }

    /// Run every ready job, waiting out retry delays, until nothing is queued.
    async fn settle(&self) {
        for _ in 0..50 {
            let mut ran = false;
            for lane in Lane::ALL {
                while self.pool.run_once(lane).await.unwrap().is_some() {
                    ran = true;
                }
            }
            // A job on a later lane may have queued one on an earlier lane.
            if ran {
                continue;
            }
            if self.queue.in_progress_count().await == 0 {
                return;
            }
            tokio::time::advance(Duration::from_secs(2)).await;
            for lane in Lane::ALL {
                self.queue.promote_due(lane).await.unwrap();
            }
        }
        panic!("queue did not settle");
    }

    async fn updates_on(&self, channel: StreamChannel) -> Vec<bool> {
        self.publisher
            .events()
            .await
            .into_iter()
            .filter(|(c, _)| *c == channel)
            .filter_map(|(_, event)| match event {
                StreamEvent::StatusUpdated {
                    references_changed, ..
                } => Some(references_changed),
                _ => None,
            })
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn test_public_status_reaches_every_audience() {
    let p = Pipeline::new().await;
    p.post(42, Visibility::Public, &[]).await;

    p.submitter
        .submit_distribution(42, DistributionOptions::default())
        .await
        .unwrap();
    p.settle().await;

    assert_eq!(p.timelines.home(ALICE).await, vec![42]);
    assert_eq!(p.timelines.home(FOLLOWER_A).await, vec![42]);
    assert_eq!(p.timelines.home(FOLLOWER_B).await, vec![42]);
    assert!(p.timelines.home(REMOTE_FOLLOWER).await.is_empty());
    assert_eq!(p.timelines.public().await, vec![42]);
    assert_eq!(p.timelines.local().await, vec![42]);
    assert_eq!(p.search.indexed().await, vec![42]);

    let created = p
        .publisher
        .events()
        .await
        .into_iter()
        .filter(|(_, event)| matches!(event, StreamEvent::StatusCreated { status_id: 42, .. }))
        .count();
    assert_eq!(created, 5);

    let snapshot = p.metrics.snapshot();
    assert_eq!(snapshot.distributions_completed, 1);
    assert_eq!(snapshot.jobs_completed, 1);
    assert!(!p.locks.is_locked(&lock_key("distribute", 42)).await);
}

#[tokio::test(start_paused = true)]
async fn test_busy_lock_defers_distribution() {
    let p = Pipeline::new().await;
    p.post(42, Visibility::Public, &[]).await;

    let LockAcquisition::Acquired(handle) = p
        .locks
        .acquire(&lock_key("distribute", 42), Duration::from_secs(300))
        .await
        .unwrap()
    else {
        panic!("lock should be free");
    };

    p.submitter
        .submit_distribution(42, DistributionOptions::default())
        .await
        .unwrap();
    let outcome = p.pool.run_once(Lane::Default).await.unwrap();

    assert!(matches!(outcome, Some(JobOutcome::Retrying { attempt: 1, .. })));
    assert!(p.timelines.home(FOLLOWER_A).await.is_empty());
    assert_eq!(p.metrics.snapshot().distributions_skipped, 1);

    assert!(p.locks.release(&handle).await.unwrap());
    p.settle().await;

    assert_eq!(p.timelines.home(FOLLOWER_A).await, vec![42]);
    assert!(p.queue.dead_letters(10).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_uniqueness_holds_while_job_runs() {
    let p = Pipeline::new().await;
    p.post(42, Visibility::Public, &[]).await;

    let first = p
        .submitter
        .submit_distribution(42, DistributionOptions::default())
        .await
        .unwrap();
    let queued_again = p
        .submitter
        .submit_distribution(42, DistributionOptions::default())
        .await
        .unwrap();
    assert_eq!(first, queued_again);
    assert_eq!(p.queue.ready_count(Lane::Default).await.unwrap(), 1);

    let running = p.queue.dequeue(Lane::Default).await.unwrap().unwrap();
    let while_running = p
        .submitter
        .submit_distribution(42, DistributionOptions::default())
        .await
        .unwrap();
    assert_eq!(first, while_running);

    // A republish is a different job.
    let republish = p
        .submitter
        .submit_distribution(42, DistributionOptions::republish(false))
        .await
        .unwrap();
    assert_ne!(first, republish);

    assert!(p.queue.ack(&running).await.unwrap());
    let after_ack = p
        .submitter
        .submit_distribution(42, DistributionOptions::default())
        .await
        .unwrap();
    assert_ne!(first, after_ack);
    assert_eq!(p.metrics.snapshot().jobs_deduplicated, 2);
}

#[tokio::test(start_paused = true)]
async fn test_references_republish_exactly_once() {
    let p = Pipeline::new().await;
    let notes = [
        "https://remote.example/notes/1",
        "https://remote.example/notes/2",
        "https://remote.example/notes/3",
    ];
    for note in notes {
        p.remote_note(note).await;
    }
    p.post(42, Visibility::Public, &notes).await;

    p.submitter
        .submit_distribution(42, DistributionOptions::default())
        .await
        .unwrap();

    // Initial fan-out, which queues the three resolutions.
    assert_eq!(
        p.pool.run_once(Lane::Default).await.unwrap(),
        Some(JobOutcome::Completed)
    );
    assert_eq!(p.queue.ready_count(Lane::Pull).await.unwrap(), 3);

    // Resolve all three concurrently.
    let outcomes = futures::future::join_all((0..3).map(|_| p.pool.run_once(Lane::Pull))).await;
    for outcome in outcomes {
        assert_eq!(outcome.unwrap(), Some(JobOutcome::Completed));
    }
    assert_eq!(p.queue.ready_count(Lane::Default).await.unwrap(), 1);

    p.settle().await;

    assert_eq!(p.updates_on(StreamChannel::Home(ALICE)).await, vec![true]);
    assert_eq!(p.updates_on(StreamChannel::Home(FOLLOWER_A)).await, vec![true]);
    assert_eq!(p.store.list_reference_ids(42).await.unwrap().len(), 3);
    assert!(p.tracker.pending(42).await.unwrap().is_empty());
    // The republish only re-indexes; feeds keep a single entry.
    assert_eq!(p.timelines.home(FOLLOWER_A).await, vec![42]);
    assert_eq!(p.search.indexed().await, vec![42, 42]);

    let snapshot = p.metrics.snapshot();
    assert_eq!(snapshot.references_resolved, 3);
    assert_eq!(snapshot.republishes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_reference_exhausts_retries_and_still_republishes() {
    let p = Pipeline::new().await;
    let url = "https://unreachable.example/notes/9";
    p.fetcher.respond(url, StubResponse::Unreachable).await;
    p.post(42, Visibility::Public, &[url]).await;

    p.submitter
        .submit_distribution(42, DistributionOptions::default())
        .await
        .unwrap();
    p.settle().await;

    assert_eq!(p.fetcher.calls(), REFERENCE_RETRIES as usize + 1);

    let dead = p.queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, REFERENCE_RETRIES + 1);
    assert!(matches!(dead[0].job, Job::ResolveReference { status_id: 42, .. }));

    assert!(p.tracker.pending(42).await.unwrap().is_empty());
    assert_eq!(p.updates_on(StreamChannel::Home(ALICE)).await, vec![false]);

    let snapshot = p.metrics.snapshot();
    assert_eq!(snapshot.jobs_retried, u64::from(REFERENCE_RETRIES));
    assert_eq!(snapshot.jobs_dead, 1);
    assert_eq!(snapshot.references_dropped, 1);
    assert_eq!(snapshot.republishes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_reference_is_cleared_after_timeouts() {
    let p = Pipeline::new().await;
    let url = "https://slow.example/notes/1";
    p.fetcher.respond(url, StubResponse::Hang).await;
    p.post(42, Visibility::Public, &[url]).await;

    p.submitter
        .submit_distribution(42, DistributionOptions::default())
        .await
        .unwrap();
    p.settle().await;

    let dead = p.queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert!(matches!(dead[0].job, Job::ResolveReference { status_id: 42, .. }));

    assert!(p.tracker.pending(42).await.unwrap().is_empty());
    assert_eq!(p.updates_on(StreamChannel::Home(ALICE)).await, vec![false]);

    let snapshot = p.metrics.snapshot();
    assert_eq!(snapshot.jobs_timed_out, u64::from(REFERENCE_RETRIES) + 1);
    assert_eq!(snapshot.references_dropped, 1);
    assert_eq!(snapshot.republishes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reaped_reference_job_is_cleared() {
    let p = Pipeline::new().await;
    let url = "https://remote.example/notes/lost";
    p.post(42, Visibility::Public, &[url]).await;
    p.tracker.track(42, &[url.to_string()], &[]).await.unwrap();

    let job = Job::ResolveReference {
        status_id: 42,
        reference_url: url.to_string(),
        options: fanout_core::ResolveOptions::default(),
    };
    p.queue
        .enqueue(job.clone(), EnqueueOptions::for_job(&job, 0))
        .await
        .unwrap();
    // The worker holding it dies without settling it.
    let _lost = p.queue.dequeue(Lane::Pull).await.unwrap().unwrap();

    let scheduler = Scheduler::new(p.queue.clone(), p.metrics.clone(), SchedulerConfig::default())
        .with_handler(p.handler.clone());
    tokio::time::advance(Duration::from_secs(61)).await;
    let report = scheduler.run_maintenance().await.unwrap();
    assert_eq!(report.dead, 1);
    assert!(p.tracker.pending(42).await.unwrap().is_empty());

    p.settle().await;
    assert_eq!(p.updates_on(StreamChannel::Home(ALICE)).await, vec![false]);
    assert_eq!(p.metrics.snapshot().republishes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_reference_clears_pending_set() {
    let p = Pipeline::new().await;
    // Unknown URLs are not found remotely.
    p.post(42, Visibility::Public, &["https://remote.example/notes/gone"])
        .await;

    p.submitter
        .submit_distribution(42, DistributionOptions::default())
        .await
        .unwrap();
    p.settle().await;

    assert!(p.tracker.pending(42).await.unwrap().is_empty());
    assert!(p.store.list_reference_ids(42).await.unwrap().is_empty());
    assert_eq!(p.updates_on(StreamChannel::Home(ALICE)).await, vec![false]);
    assert!(p.queue.dead_letters(10).await.unwrap().is_empty());
    assert_eq!(p.metrics.snapshot().references_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_emoji_invalidation_is_idempotent() {
    let p = Pipeline::new().await;
    p.post(42, Visibility::Public, &[]).await;
    p.post(43, Visibility::Public, &[]).await;
    p.store
        .insert_emoji(CustomEmoji {
            id: 7,
            shortcode: "blobcat".to_string(),
            domain: None,
            image_url: "https://local.test/emoji/blobcat.png".to_string(),
            static_image_url: None,
            disabled: false,
        })
        .await;
    let reactions = [
        (1, FOLLOWER_A, 42, "blobcat", Some(7)),
        (2, FOLLOWER_B, 42, "blobcat", Some(7)),
        (3, FOLLOWER_A, 42, "\u{1f44d}", None),
        (4, FOLLOWER_B, 43, "blobcat", Some(7)),
    ];
    for (id, account_id, status_id, name, custom_emoji_id) in reactions {
        p.store
            .insert_reaction(EmojiReaction {
                id,
                account_id,
                status_id,
                name: name.to_string(),
                custom_emoji_id,
            })
            .await;
    }

    let first = p.submitter.submit_cache_invalidation(vec![7]).await.unwrap();
    let duplicate = p.submitter.submit_cache_invalidation(vec![7, 7]).await.unwrap();
    assert_eq!(first, duplicate);
    p.settle().await;

    let summaries = p.store.reaction_summaries(42).await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].count, 2);
    assert_eq!(summaries[0].account_ids, vec![FOLLOWER_A, FOLLOWER_B]);
    assert_eq!(
        summaries[0].url.as_deref(),
        Some("https://local.test/emoji/blobcat.png")
    );
    let other = p.store.reaction_summaries(43).await.unwrap();

    p.submitter.submit_cache_invalidation(vec![7]).await.unwrap();
    p.settle().await;

    assert_eq!(p.store.reaction_summaries(42).await.unwrap(), summaries);
    assert_eq!(p.store.reaction_summaries(43).await.unwrap(), other);
    assert_eq!(p.metrics.snapshot().reaction_caches_refreshed, 4);
}
