//! In-process delivery sinks and collaborators.
//!
//! Each one records what it received so callers can inspect the outcome, and
//! several can be told to fail for specific inputs.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use fanout_common::{AppError, AppResult, IdGenerator};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::model::{AccountId, EmojiId, RemoteStatus, Status, StatusId};
use crate::services::event_publisher::{EventPublisher, StreamChannel, StreamEvent};
use crate::services::jobs::{DistributionOptions, JobSubmitter, ResolveOptions};
use crate::services::notifier::Notifier;
use crate::services::remote::{FetchError, FetchOptions, RemoteFetcher};
use crate::services::search::SearchIndexer;
use crate::services::timeline::TimelineStore;

#[derive(Default)]
struct Feeds {
    home: HashMap<AccountId, BTreeSet<StatusId>>,
    public: BTreeSet<StatusId>,
    local: BTreeSet<StatusId>,
    failing_homes: HashSet<AccountId>,
}

/// Timeline store keeping feeds in memory.
#[derive(Default)]
pub struct MemoryTimelineStore {
    feeds: Mutex<Feeds>,
}

impl MemoryTimelineStore {
    /// Create empty feeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses in an account's home feed, ascending.
    pub async fn home(&self, account_id: AccountId) -> Vec<StatusId> {
        self.feeds
            .lock()
            .await
            .home
            .get(&account_id)
            .map(|feed| feed.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Statuses on the public timeline, ascending.
    pub async fn public(&self) -> Vec<StatusId> {
        self.feeds.lock().await.public.iter().copied().collect()
    }

    /// Statuses on the local timeline, ascending.
    pub async fn local(&self) -> Vec<StatusId> {
        self.feeds.lock().await.local.iter().copied().collect()
    }

    /// Make pushes to `account_id`'s home feed fail until [`Self::recover_home`].
    pub async fn fail_home(&self, account_id: AccountId) {
        self.feeds.lock().await.failing_homes.insert(account_id);
    }

    /// Undo [`Self::fail_home`].
    pub async fn recover_home(&self, account_id: AccountId) {
        self.feeds.lock().await.failing_homes.remove(&account_id);
    }
}

#[async_trait]
impl TimelineStore for MemoryTimelineStore {
    async fn push_home(&self, account_id: AccountId, status_id: StatusId) -> AppResult<()> {
        let mut feeds = self.feeds.lock().await;
        if feeds.failing_homes.contains(&account_id) {
            return Err(AppError::Redis(format!("home feed {account_id} unavailable")));
        }
        feeds.home.entry(account_id).or_default().insert(status_id);
        Ok(())
    }

    async fn push_public(&self, status_id: StatusId, local: bool) -> AppResult<()> {
        let mut feeds = self.feeds.lock().await;
        feeds.public.insert(status_id);
        if local {
            feeds.local.insert(status_id);
        }
        Ok(())
    }
}

/// Publisher that records every event.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(StreamChannel, StreamEvent)>>,
}

impl RecordingPublisher {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order.
    pub async fn events(&self) -> Vec<(StreamChannel, StreamEvent)> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, channel: StreamChannel, event: &StreamEvent) -> AppResult<()> {
        self.events.lock().await.push((channel, event.clone()));
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedNotification {
    /// Recipient.
    pub account_id: AccountId,
    /// Notification type.
    pub event_type: String,
    /// Payload.
    pub payload: Value,
}

/// Notifier that records every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<RecordedNotification>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in order.
    pub async fn notifications(&self) -> Vec<RecordedNotification> {
        self.notifications.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        account_id: AccountId,
        event_type: &str,
        payload: Value,
    ) -> AppResult<()> {
        self.notifications.lock().await.push(RecordedNotification {
            account_id,
            event_type: event_type.to_string(),
            payload,
        });
        Ok(())
    }
}

/// A job captured by [`RecordingJobSubmitter`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmittedJob {
    Distribution {
        status_id: StatusId,
        options: DistributionOptions,
    },
    ReferenceResolution {
        status_id: StatusId,
        reference_url: String,
        options: ResolveOptions,
    },
    CacheInvalidation {
        emoji_ids: Vec<EmojiId>,
    },
}

/// Job submitter that records instead of enqueueing.
#[derive(Default)]
pub struct RecordingJobSubmitter {
    jobs: Mutex<Vec<SubmittedJob>>,
    id_gen: IdGenerator,
    distribution_failures: AtomicUsize,
}

impl RecordingJobSubmitter {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything submitted so far, in order.
    pub async fn jobs(&self) -> Vec<SubmittedJob> {
        self.jobs.lock().await.clone()
    }

    /// Distribution options submitted for `status_id`, in order.
    pub async fn distributions(&self, status_id: StatusId) -> Vec<DistributionOptions> {
        self.jobs
            .lock()
            .await
            .iter()
            .filter_map(|job| match job {
                SubmittedJob::Distribution {
                    status_id: id,
                    options,
                } if *id == status_id => Some(options.clone()),
                _ => None,
            })
            .collect()
    }

    /// Reject the next `count` distribution submissions with a Redis error.
    pub fn fail_distributions(&self, count: usize) {
        self.distribution_failures.store(count, Ordering::SeqCst);
    }

    async fn record(&self, job: SubmittedJob) -> String {
        self.jobs.lock().await.push(job);
        self.id_gen.generate()
    }
}

#[async_trait]
impl JobSubmitter for RecordingJobSubmitter {
    async fn submit_distribution(
        &self,
        status_id: StatusId,
        options: DistributionOptions,
    ) -> AppResult<String> {
        if self
            .distribution_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::Redis("connection reset".to_string()));
        }
        Ok(self
            .record(SubmittedJob::Distribution { status_id, options })
            .await)
    }

    async fn submit_reference_resolution(
        &self,
        status_id: StatusId,
        reference_url: &str,
        options: ResolveOptions,
    ) -> AppResult<String> {
        Ok(self
            .record(SubmittedJob::ReferenceResolution {
                status_id,
                reference_url: reference_url.to_string(),
                options,
            })
            .await)
    }

    async fn submit_cache_invalidation(&self, emoji_ids: Vec<EmojiId>) -> AppResult<String> {
        Ok(self
            .record(SubmittedJob::CacheInvalidation { emoji_ids })
            .await)
    }
}

/// Search indexer that records indexed status IDs.
#[derive(Default)]
pub struct MemorySearchIndexer {
    indexed: Mutex<Vec<StatusId>>,
}

impl MemorySearchIndexer {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every index call so far, in order.
    pub async fn indexed(&self) -> Vec<StatusId> {
        self.indexed.lock().await.clone()
    }
}

#[async_trait]
impl SearchIndexer for MemorySearchIndexer {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn index_status(&self, status: &Status) -> AppResult<()> {
        self.indexed.lock().await.push(status.id);
        Ok(())
    }
}

/// Canned answer of [`StubRemoteFetcher`].
#[derive(Debug, Clone)]
pub enum StubResponse {
    /// Return this status.
    Found(RemoteStatus),
    /// 404.
    NotFound,
    /// Transport failure, on every call.
    Unreachable,
    /// Never answers.
    Hang,
}

/// Remote fetcher answering from a fixed table. Unknown URLs are not found.
#[derive(Default)]
pub struct StubRemoteFetcher {
    responses: Mutex<HashMap<String, StubResponse>>,
    calls: AtomicUsize,
}

impl StubRemoteFetcher {
    /// Create a fetcher with no known URLs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the answer for `url`.
    pub async fn respond(&self, url: &str, response: StubResponse) {
        self.responses
            .lock()
            .await
            .insert(url.to_string(), response);
    }

    /// Number of fetches made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteFetcher for StubRemoteFetcher {
    async fn fetch_status(
        &self,
        url: &str,
        _options: &FetchOptions,
    ) -> Result<RemoteStatus, FetchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let response = self.responses.lock().await.get(url).cloned();
        match response {
            Some(StubResponse::Found(status)) => Ok(status),
            Some(StubResponse::Unreachable) => {
                Err(FetchError::Failed(format!("{url}: connection timed out")))
            }
            Some(StubResponse::Hang) => std::future::pending().await,
            Some(StubResponse::NotFound) | None => {
                Err(FetchError::NotFound(format!("{url} returned 404")))
            }
        }
    }
}
