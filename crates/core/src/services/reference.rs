//! Reference resolution.
//!
//! A status may link to other statuses. Each link is resolved by its own job;
//! the URLs still outstanding are tracked per status, and the job whose
//! terminal outcome empties that set submits the one republish of the status.

use std::collections::BTreeSet;
use std::sync::Arc;

use fanout_common::config::Config;
use fanout_common::{AppError, AppResult, Metrics};
use serde_json::json;
use tracing::{debug, error, info, warn};
use url::Url;

use super::coordination::{DrainOutcome, ResolutionTracker};
use super::jobs::{DistributionOptions, JobSubmitter, ResolveOptions};
use super::notifier::Notifier;
use super::remote::{FetchError, FetchOptions, RemoteFetcher};
use crate::model::{AccountId, RemoteStatus, Status, StatusId, Visibility};
use crate::store::StatusStore;

/// Notification type sent to the author of a referenced status.
pub const REFERENCE_NOTIFICATION: &str = "status_reference";

/// Resolver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Host of this instance. URLs on it are never fetched.
    pub local_domain: String,
    /// References considered per status; extra URLs are ignored.
    pub max_references_per_status: usize,
}

impl From<&Config> for ResolverConfig {
    fn from(config: &Config) -> Self {
        Self {
            local_domain: config.federation.local_domain.clone(),
            max_references_per_status: config.references.max_references_per_status,
        }
    }
}

/// Why a reference was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The referencing status was deleted.
    SourceGone,
    /// The target does not exist.
    NotFound,
    /// The target is not a status.
    Invalid,
    /// The referencing author may not see the target.
    Forbidden,
    /// The status links to itself.
    SelfReference,
    /// Retries ran out.
    Exhausted,
}

impl DropReason {
    /// Name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SourceGone => "source_gone",
            Self::NotFound => "not_found",
            Self::Invalid => "invalid",
            Self::Forbidden => "forbidden",
            Self::SelfReference => "self_reference",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Terminal outcome of resolving one reference URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The reference exists. `created` is `false` when it already did.
    Linked {
        /// Referenced status.
        target_id: StatusId,
        /// Whether this call created the link.
        created: bool,
    },
    /// The reference was discarded.
    Dropped(DropReason),
}

enum Found {
    Stored(Status),
    Remote(RemoteStatus),
}

/// Resolves reference URLs into status links.
#[derive(Clone)]
pub struct ReferenceResolver {
    store: Arc<dyn StatusStore>,
    fetcher: Arc<dyn RemoteFetcher>,
    tracker: Arc<dyn ResolutionTracker>,
    jobs: Arc<dyn JobSubmitter>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    config: ResolverConfig,
}

impl ReferenceResolver {
    /// Create a new resolver.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Arc<dyn StatusStore>,
        fetcher: Arc<dyn RemoteFetcher>,
        tracker: Arc<dyn ResolutionTracker>,
        jobs: Arc<dyn JobSubmitter>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<Metrics>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            tracker,
            jobs,
            notifier,
            metrics,
            config,
        }
    }

    /// Start resolving `urls` for a status.
    ///
    /// Snapshots the currently linked IDs, marks the URLs pending and submits
    /// one job per URL. Blank and repeated URLs are skipped, and at most
    /// `max_references_per_status` are taken. Returns the URLs submitted.
    pub async fn request(
        &self,
        status_id: StatusId,
        urls: &[String],
        options: &ResolveOptions,
    ) -> AppResult<Vec<String>> {
        let mut seen = BTreeSet::new();
        let urls: Vec<String> = urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty() && seen.insert(*url))
            .take(self.config.max_references_per_status)
            .map(ToString::to_string)
            .collect();

        if urls.is_empty() {
            return Ok(urls);
        }

        let baseline = self.store.list_reference_ids(status_id).await?;
        self.tracker.track(status_id, &urls, &baseline).await?;

        for url in &urls {
            self.jobs
                .submit_reference_resolution(status_id, url, options.clone())
                .await?;
        }

        info!(status_id, count = urls.len(), "Reference resolution requested");
        Ok(urls)
    }

    /// Resolve the references a stored status carries.
    pub async fn request_for_status(
        &self,
        status_id: StatusId,
        options: &ResolveOptions,
    ) -> AppResult<Vec<String>> {
        let status = match self.store.get_status(status_id).await {
            Ok(status) => status,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        self.request(status_id, &status.reference_urls, options).await
    }

    /// Resolve one reference URL of a status.
    ///
    /// Every terminal outcome removes the URL from the pending set. A retryable
    /// failure is returned as is, unless `final_attempt` is set; the URL is
    /// then removed too before the error is returned.
    pub async fn resolve(
        &self,
        status_id: StatusId,
        url: &str,
        options: &ResolveOptions,
        final_attempt: bool,
    ) -> AppResult<ResolutionOutcome> {
        match self.resolve_reference(status_id, url, options).await {
            Ok(outcome) => {
                match outcome {
                    ResolutionOutcome::Linked { target_id, created } => {
                        Metrics::incr(&self.metrics.references_resolved);
                        info!(status_id, url, target_id, created, "Reference resolved");
                    }
                    ResolutionOutcome::Dropped(reason) => {
                        Metrics::incr(&self.metrics.references_dropped);
                        info!(status_id, url, reason = reason.as_str(), "Reference dropped");
                    }
                }
                self.finish(status_id, url).await?;
                Ok(outcome)
            }
            Err(e) if final_attempt || !e.is_retryable() => {
                Metrics::incr(&self.metrics.references_dropped);
                warn!(
                    status_id,
                    url,
                    reason = DropReason::Exhausted.as_str(),
                    error = %e,
                    "Giving up on reference"
                );
                if let Err(finish_error) = self.finish(status_id, url).await {
                    warn!(status_id, url, error = %finish_error, "Failed to clear pending reference");
                }
                Err(e)
            }
            Err(e) => {
                debug!(status_id, url, error = %e, "Reference resolution will be retried");
                Err(e)
            }
        }
    }

    async fn resolve_reference(
        &self,
        status_id: StatusId,
        url: &str,
        options: &ResolveOptions,
    ) -> AppResult<ResolutionOutcome> {
        let source = match self.store.get_status(status_id).await {
            Ok(status) => status,
            Err(e) if e.is_not_found() => {
                return Ok(ResolutionOutcome::Dropped(DropReason::SourceGone));
            }
            Err(e) => return Err(e),
        };

        let found = match self.lookup(&source, url, options).await? {
            Ok(found) => found,
            Err(reason) => return Ok(ResolutionOutcome::Dropped(reason)),
        };

        let (target_id, target_uri, visibility, author) = match &found {
            Found::Stored(status) => (
                Some(status.id),
                status.uri.as_str(),
                status.visibility,
                Some(status.account_id),
            ),
            Found::Remote(remote) => (
                None,
                remote.uri.as_str(),
                remote.visibility,
                self.store.account_id_by_uri(&remote.account_uri).await?,
            ),
        };

        if target_id == Some(source.id) || target_uri == source.uri {
            return Ok(ResolutionOutcome::Dropped(DropReason::SelfReference));
        }
        if !self.may_reference(&source, visibility, author).await? {
            return Ok(ResolutionOutcome::Dropped(DropReason::Forbidden));
        }

        let target = match found {
            Found::Stored(status) => status,
            Found::Remote(remote) => self.store.upsert_remote_status(&remote).await?,
        };

        let created = self.store.create_reference(source.id, target.id).await?;
        if created && target.local && target.account_id != source.account_id {
            let payload = json!({
                "status_id": source.id,
                "target_status_id": target.id,
            });
            if let Err(e) = self
                .notifier
                .notify(target.account_id, REFERENCE_NOTIFICATION, payload)
                .await
            {
                warn!(status_id, target_id = target.id, error = %e, "Failed to notify referenced author");
            }
        }

        Ok(ResolutionOutcome::Linked {
            target_id: target.id,
            created,
        })
    }

    async fn lookup(
        &self,
        source: &Status,
        url: &str,
        options: &ResolveOptions,
    ) -> AppResult<Result<Found, DropReason>> {
        if let Some(status) = self.store.find_status_by_uri(url).await? {
            return Ok(Ok(Found::Stored(status)));
        }
        if options.local_only || self.is_local_url(url) {
            return Ok(Err(DropReason::NotFound));
        }

        let fetch_options = FetchOptions {
            on_behalf_of: source.local.then_some(source.account_id),
        };
        match self.fetcher.fetch_status(url, &fetch_options).await {
            Ok(remote) => Ok(Ok(Found::Remote(remote))),
            Err(FetchError::NotFound(_)) => Ok(Err(DropReason::NotFound)),
            Err(FetchError::Invalid(_)) => Ok(Err(DropReason::Invalid)),
            Err(FetchError::Failed(message)) => Err(AppError::Federation(message)),
        }
    }

    async fn may_reference(
        &self,
        source: &Status,
        visibility: Visibility,
        author: Option<AccountId>,
    ) -> AppResult<bool> {
        match visibility {
            Visibility::Public | Visibility::Unlisted => Ok(true),
            Visibility::Private | Visibility::Limited => match author {
                Some(author) if author == source.account_id => Ok(true),
                Some(author) => self.store.is_following(source.account_id, author).await,
                None => Ok(false),
            },
            Visibility::Direct | Visibility::Personal => Ok(false),
        }
    }

    fn is_local_url(&self, url: &str) -> bool {
        Url::parse(url)
            .is_ok_and(|parsed| parsed.host_str() == Some(self.config.local_domain.as_str()))
    }

    /// Settle a reference whose job was dead-lettered before reaching an
    /// outcome, such as one whose last attempt timed out.
    ///
    /// A no-op when the URL is no longer pending.
    pub async fn abandon(&self, status_id: StatusId, url: &str) -> AppResult<()> {
        if self.finish(status_id, url).await? {
            Metrics::incr(&self.metrics.references_dropped);
            warn!(
                status_id,
                url,
                reason = DropReason::Exhausted.as_str(),
                "Abandoned reference"
            );
        }
        Ok(())
    }

    /// Remove `url` from the pending set, republishing if that drained it.
    /// Returns whether the URL was still pending.
    ///
    /// If the republish cannot be submitted the URL is put back, so the next
    /// attempt drains the set again.
    async fn finish(&self, status_id: StatusId, url: &str) -> AppResult<bool> {
        let baseline = match self.tracker.finish(status_id, url).await? {
            DrainOutcome::Pending => {
                debug!(status_id, url, "Other references still pending");
                return Ok(true);
            }
            DrainOutcome::NotPending => {
                debug!(status_id, url, "Reference was already finished");
                return Ok(false);
            }
            DrainOutcome::Drained { baseline } => baseline,
        };

        let references_changed = match self.store.list_reference_ids(status_id).await {
            Ok(current) => {
                let before: BTreeSet<StatusId> = baseline.iter().copied().collect();
                let after: BTreeSet<StatusId> = current.into_iter().collect();
                before != after
            }
            Err(e) => {
                warn!(status_id, error = %e, "Failed to compare references, assuming changed");
                true
            }
        };

        if let Err(e) = self
            .jobs
            .submit_distribution(status_id, DistributionOptions::republish(references_changed))
            .await
        {
            warn!(status_id, url, error = %e, "Failed to submit republish, restoring pending reference");
            if let Err(restore_error) = self
                .tracker
                .track(status_id, &[url.to_string()], &baseline)
                .await
            {
                error!(status_id, url, error = %restore_error, "Failed to restore pending reference");
            }
            return Err(e);
        }

        Metrics::incr(&self.metrics.republishes);
        info!(status_id, references_changed, "All references settled, republishing");
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::{
        MemoryResolutionTracker, MemoryStore, RecordingJobSubmitter, RecordingNotifier,
        StubRemoteFetcher, StubResponse, SubmittedJob,
    };
    use chrono::Utc;

    const ALICE: AccountId = 1;
    const BOB: AccountId = 2;
    const CAROL: AccountId = 3;
    const REMOTE_AUTHOR: &str = "https://remote.example/users/dave";
    const REMOTE_NOTE: &str = "https://remote.example/notes/1";

    struct Harness {
        store: Arc<MemoryStore>,
        fetcher: Arc<StubRemoteFetcher>,
        tracker: Arc<MemoryResolutionTracker>,
        jobs: Arc<RecordingJobSubmitter>,
        notifier: Arc<RecordingNotifier>,
        metrics: Arc<Metrics>,
        resolver: ReferenceResolver,
    }

    fn status(id: StatusId, account_id: AccountId, visibility: Visibility) -> Status {
        Status {
            id,
            account_id,
            local: true,
            visibility,
            uri: format!("https://local.test/statuses/{id}"),
            url: Some(format!("https://local.test/@user/{id}")),
            text: String::new(),
            mentioned_account_ids: vec![],
            reference_urls: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn remote_note(visibility: Visibility) -> StubResponse {
        StubResponse::Found(RemoteStatus {
            uri: REMOTE_NOTE.to_string(),
            url: None,
            account_uri: REMOTE_AUTHOR.to_string(),
            visibility,
            text: "remote".to_string(),
            published: Utc::now(),
        })
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.insert_account(ALICE, "https://local.test/users/alice", true).await;
        store.insert_account(BOB, "https://local.test/users/bob", true).await;
        store.insert_account(CAROL, "https://local.test/users/carol", true).await;
        store.insert_status(status(42, ALICE, Visibility::Public)).await;

        let fetcher = Arc::new(StubRemoteFetcher::new());
        let tracker = Arc::new(MemoryResolutionTracker::new());
        let jobs = Arc::new(RecordingJobSubmitter::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let metrics = Arc::new(Metrics::new());
        let resolver = ReferenceResolver::new(
            store.clone(),
            fetcher.clone(),
            tracker.clone(),
            jobs.clone(),
            notifier.clone(),
            metrics.clone(),
            ResolverConfig {
                local_domain: "local.test".to_string(),
                max_references_per_status: 3,
            },
        );

        Harness {
            store,
            fetcher,
            tracker,
            jobs,
            notifier,
            metrics,
            resolver,
        }
    }

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_request_dedups_caps_and_submits() {
        let h = harness().await;
        let requested = h
            .resolver
            .request(
                42,
                &urls(&["https://a.example/1", " ", "https://a.example/1", "https://b.example/2", "https://c.example/3", "https://d.example/4"]),
                &ResolveOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            requested,
            urls(&["https://a.example/1", "https://b.example/2", "https://c.example/3"])
        );
        assert_eq!(h.tracker.pending(42).await.unwrap().len(), 3);
        assert_eq!(h.jobs.jobs().await.len(), 3);
    }

    #[tokio::test]
    async fn test_remote_public_reference_is_linked_and_republished() {
        let h = harness().await;
        h.fetcher.respond(REMOTE_NOTE, remote_note(Visibility::Public)).await;
        h.resolver
            .request(42, &urls(&[REMOTE_NOTE]), &ResolveOptions::default())
            .await
            .unwrap();

        let outcome = h
            .resolver
            .resolve(42, REMOTE_NOTE, &ResolveOptions::default(), false)
            .await
            .unwrap();

        let ResolutionOutcome::Linked { target_id, created } = outcome else {
            panic!("expected a link, got {outcome:?}");
        };
        assert!(created);
        assert_eq!(h.store.list_reference_ids(42).await.unwrap(), vec![target_id]);
        assert_eq!(
            h.jobs.distributions(42).await,
            vec![DistributionOptions::republish(true)]
        );
        assert_eq!(h.metrics.snapshot().republishes, 1);
        assert!(h.notifier.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_local_lookup_skips_fetch_and_notifies_author() {
        let h = harness().await;
        h.store.insert_status(status(7, BOB, Visibility::Public)).await;
        let url = "https://local.test/@user/7";
        h.tracker.track(42, &urls(&[url]), &[]).await.unwrap();

        let outcome = h
            .resolver
            .resolve(42, url, &ResolveOptions::default(), false)
            .await
            .unwrap();

        assert_eq!(outcome, ResolutionOutcome::Linked { target_id: 7, created: true });
        assert_eq!(h.fetcher.calls(), 0);

        let notifications = h.notifier.notifications().await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].account_id, BOB);
        assert_eq!(notifications[0].event_type, REFERENCE_NOTIFICATION);
        assert_eq!(notifications[0].payload["target_status_id"], 7);
    }

    #[tokio::test]
    async fn test_unknown_local_url_is_dropped_without_fetch() {
        let h = harness().await;
        let url = "https://local.test/@user/999";
        h.tracker.track(42, &urls(&[url]), &[]).await.unwrap();

        let outcome = h
            .resolver
            .resolve(42, url, &ResolveOptions::default(), false)
            .await
            .unwrap();

        assert_eq!(outcome, ResolutionOutcome::Dropped(DropReason::NotFound));
        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(
            h.jobs.distributions(42).await,
            vec![DistributionOptions::republish(false)]
        );
    }

    #[tokio::test]
    async fn test_remote_not_found_is_dropped() {
        let h = harness().await;
        h.fetcher.respond(REMOTE_NOTE, StubResponse::NotFound).await;
        h.tracker.track(42, &urls(&[REMOTE_NOTE]), &[]).await.unwrap();

        let outcome = h
            .resolver
            .resolve(42, REMOTE_NOTE, &ResolveOptions::default(), false)
            .await
            .unwrap();

        assert_eq!(outcome, ResolutionOutcome::Dropped(DropReason::NotFound));
        assert!(h.store.list_reference_ids(42).await.unwrap().is_empty());
        assert!(h.tracker.pending(42).await.unwrap().is_empty());
        assert_eq!(h.metrics.snapshot().references_dropped, 1);
    }

    #[tokio::test]
    async fn test_private_target_requires_follow() {
        let h = harness().await;
        h.store.insert_status(status(8, CAROL, Visibility::Private)).await;
        let url = "https://local.test/statuses/8";

        let denied = h
            .resolver
            .resolve(42, url, &ResolveOptions::default(), false)
            .await
            .unwrap();
        assert_eq!(denied, ResolutionOutcome::Dropped(DropReason::Forbidden));

        h.store.follow(ALICE, CAROL).await;
        let allowed = h
            .resolver
            .resolve(42, url, &ResolveOptions::default(), false)
            .await
            .unwrap();
        assert_eq!(allowed, ResolutionOutcome::Linked { target_id: 8, created: true });
    }

    #[tokio::test]
    async fn test_private_remote_target_from_unknown_author_is_forbidden() {
        let h = harness().await;
        h.fetcher.respond(REMOTE_NOTE, remote_note(Visibility::Private)).await;

        let outcome = h
            .resolver
            .resolve(42, REMOTE_NOTE, &ResolveOptions::default(), false)
            .await
            .unwrap();

        assert_eq!(outcome, ResolutionOutcome::Dropped(DropReason::Forbidden));
        assert!(h.store.find_status_by_uri(REMOTE_NOTE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_direct_and_self_references_are_rejected() {
        let h = harness().await;
        h.store.insert_status(status(9, ALICE, Visibility::Direct)).await;

        let direct = h
            .resolver
            .resolve(42, "https://local.test/statuses/9", &ResolveOptions::default(), false)
            .await
            .unwrap();
        let itself = h
            .resolver
            .resolve(42, "https://local.test/statuses/42", &ResolveOptions::default(), false)
            .await
            .unwrap();

        assert_eq!(direct, ResolutionOutcome::Dropped(DropReason::Forbidden));
        assert_eq!(itself, ResolutionOutcome::Dropped(DropReason::SelfReference));
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_pending_until_final_attempt() {
        let h = harness().await;
        h.fetcher.respond(REMOTE_NOTE, StubResponse::Unreachable).await;
        h.tracker.track(42, &urls(&[REMOTE_NOTE]), &[]).await.unwrap();

        let err = h
            .resolver
            .resolve(42, REMOTE_NOTE, &ResolveOptions::default(), false)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.tracker.pending(42).await.unwrap(), urls(&[REMOTE_NOTE]));
        assert!(h.jobs.jobs().await.is_empty());

        let err = h
            .resolver
            .resolve(42, REMOTE_NOTE, &ResolveOptions::default(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Federation(_)));
        assert!(h.tracker.pending(42).await.unwrap().is_empty());
        assert_eq!(
            h.jobs.distributions(42).await,
            vec![DistributionOptions::republish(false)]
        );
    }

    #[tokio::test]
    async fn test_repeated_finish_never_refires() {
        let h = harness().await;
        h.tracker.track(42, &urls(&[REMOTE_NOTE]), &[]).await.unwrap();

        for _ in 0..3 {
            h.resolver
                .resolve(42, REMOTE_NOTE, &ResolveOptions::default(), false)
                .await
                .unwrap();
        }

        assert_eq!(h.jobs.distributions(42).await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_republish_once() {
        let h = harness().await;
        let pending: Vec<String> = (0..8)
            .map(|i| format!("https://remote{i}.example/notes/{i}"))
            .collect();
        for url in &pending[..4] {
            h.fetcher.respond(url, remote_note(Visibility::Public)).await;
        }
        h.tracker.track(42, &pending, &[]).await.unwrap();

        let tasks = pending.iter().cloned().map(|url| {
            let resolver = h.resolver.clone();
            tokio::spawn(async move {
                resolver
                    .resolve(42, &url, &ResolveOptions::default(), false)
                    .await
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let republishes: Vec<_> = h
            .jobs
            .jobs()
            .await
            .into_iter()
            .filter(|job| matches!(job, SubmittedJob::Distribution { status_id: 42, .. }))
            .collect();
        assert_eq!(republishes.len(), 1);
        assert!(h.tracker.pending(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_source_still_clears_pending() {
        let h = harness().await;
        h.tracker.track(42, &urls(&[REMOTE_NOTE]), &[]).await.unwrap();
        h.store.remove_status(42).await;

        let outcome = h
            .resolver
            .resolve(42, REMOTE_NOTE, &ResolveOptions::default(), false)
            .await
            .unwrap();

        assert_eq!(outcome, ResolutionOutcome::Dropped(DropReason::SourceGone));
        assert_eq!(h.fetcher.calls(), 0);
        assert!(h.tracker.pending(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_republish_submission_is_retried() {
        let h = harness().await;
        h.tracker.track(42, &urls(&[REMOTE_NOTE]), &[]).await.unwrap();
        h.jobs.fail_distributions(1);

        let err = h
            .resolver
            .resolve(42, REMOTE_NOTE, &ResolveOptions::default(), false)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.tracker.pending(42).await.unwrap(), urls(&[REMOTE_NOTE]));
        assert!(h.jobs.distributions(42).await.is_empty());

        let outcome = h
            .resolver
            .resolve(42, REMOTE_NOTE, &ResolveOptions::default(), false)
            .await
            .unwrap();
        assert_eq!(outcome, ResolutionOutcome::Dropped(DropReason::NotFound));
        assert_eq!(
            h.jobs.distributions(42).await,
            vec![DistributionOptions::republish(false)]
        );
        assert!(h.tracker.pending(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restored_reference_keeps_baseline() {
        let h = harness().await;
        h.store.insert_status(status(7, BOB, Visibility::Public)).await;
        h.store.create_reference(42, 7).await.unwrap();
        h.tracker.track(42, &urls(&[REMOTE_NOTE]), &[7]).await.unwrap();
        h.jobs.fail_distributions(1);

        h.resolver
            .resolve(42, REMOTE_NOTE, &ResolveOptions::default(), false)
            .await
            .unwrap_err();
        h.resolver.abandon(42, REMOTE_NOTE).await.unwrap();

        assert_eq!(
            h.jobs.distributions(42).await,
            vec![DistributionOptions::republish(false)]
        );
    }

    #[tokio::test]
    async fn test_abandon_drains_once() {
        let h = harness().await;
        h.tracker
            .track(42, &urls(&[REMOTE_NOTE, "https://remote.example/notes/2"]), &[])
            .await
            .unwrap();

        h.resolver.abandon(42, REMOTE_NOTE).await.unwrap();
        h.resolver.abandon(42, REMOTE_NOTE).await.unwrap();
        assert!(h.jobs.distributions(42).await.is_empty());

        h.resolver
            .abandon(42, "https://remote.example/notes/2")
            .await
            .unwrap();
        assert_eq!(
            h.jobs.distributions(42).await,
            vec![DistributionOptions::republish(false)]
        );
        assert_eq!(h.metrics.snapshot().references_dropped, 2);
    }
}
