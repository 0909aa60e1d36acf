//! In-process status and reaction store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use fanout_common::{AppError, AppResult};
use tokio::sync::Mutex;

use crate::model::{
    AccountId, CustomEmoji, EmojiId, EmojiReaction, ReactionSummary, RemoteStatus, Status,
    StatusId,
};
use crate::store::{EmojiReactionStore, StatusStore};

#[derive(Debug, Clone)]
struct MemoryAccount {
    uri: String,
    local: bool,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, MemoryAccount>,
    statuses: HashMap<StatusId, Status>,
    follows: HashSet<(AccountId, AccountId)>,
    references: BTreeMap<StatusId, Vec<StatusId>>,
    emojis: HashMap<EmojiId, CustomEmoji>,
    reactions: Vec<EmojiReaction>,
    summaries: HashMap<StatusId, Vec<ReactionSummary>>,
    failing_summaries: HashSet<StatusId>,
}

/// Store keeping every table in memory.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    next_id: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicI64::new(1_000_000),
        }
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account.
    pub async fn insert_account(&self, id: AccountId, uri: &str, local: bool) {
        self.inner.lock().await.accounts.insert(
            id,
            MemoryAccount {
                uri: uri.to_string(),
                local,
            },
        );
    }

    /// Insert or replace a status.
    pub async fn insert_status(&self, status: Status) {
        self.inner.lock().await.statuses.insert(status.id, status);
    }

    /// Delete a status and its outgoing references.
    pub async fn remove_status(&self, id: StatusId) {
        let mut inner = self.inner.lock().await;
        inner.statuses.remove(&id);
        inner.references.remove(&id);
    }

    /// Record that `account_id` follows `target_account_id`.
    pub async fn follow(&self, account_id: AccountId, target_account_id: AccountId) {
        self.inner
            .lock()
            .await
            .follows
            .insert((account_id, target_account_id));
    }

    /// Register a custom emoji.
    pub async fn insert_emoji(&self, emoji: CustomEmoji) {
        self.inner.lock().await.emojis.insert(emoji.id, emoji);
    }

    /// Add a reaction.
    pub async fn insert_reaction(&self, reaction: EmojiReaction) {
        self.inner.lock().await.reactions.push(reaction);
    }

    /// Cached reaction summaries of a status, if ever written.
    pub async fn reaction_summaries(&self, status_id: StatusId) -> Option<Vec<ReactionSummary>> {
        self.inner.lock().await.summaries.get(&status_id).cloned()
    }

    /// Make summary writes for `status_id` fail.
    pub async fn fail_summaries_for(&self, status_id: StatusId) {
        self.inner
            .lock()
            .await
            .failing_summaries
            .insert(status_id);
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn get_status(&self, id: StatusId) -> AppResult<Status> {
        self.inner
            .lock()
            .await
            .statuses
            .get(&id)
            .cloned()
            .ok_or(AppError::StatusNotFound(id))
    }

    async fn find_status_by_uri(&self, uri: &str) -> AppResult<Option<Status>> {
        Ok(self
            .inner
            .lock()
            .await
            .statuses
            .values()
            .find(|s| s.uri == uri || s.url.as_deref() == Some(uri))
            .cloned())
    }

    async fn upsert_remote_status(&self, remote: &RemoteStatus) -> AppResult<Status> {
        let mut inner = self.inner.lock().await;

        let known = inner
            .accounts
            .iter()
            .find(|(_, a)| a.uri == remote.account_uri)
            .map(|(id, _)| *id);
        let account_id = if let Some(id) = known {
            id
        } else {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            inner.accounts.insert(
                id,
                MemoryAccount {
                    uri: remote.account_uri.clone(),
                    local: false,
                },
            );
            id
        };

        let existing = inner
            .statuses
            .values()
            .find(|s| s.uri == remote.uri)
            .map(|s| (s.id, s.created_at));

        let (id, created_at) = existing.unwrap_or_else(|| {
            (self.next_id.fetch_add(1, Ordering::Relaxed), remote.published)
        });

        let status = Status {
            id,
            account_id,
            local: false,
            visibility: remote.visibility,
            uri: remote.uri.clone(),
            url: remote.url.clone(),
            text: remote.text.clone(),
            mentioned_account_ids: Vec::new(),
            reference_urls: Vec::new(),
            created_at,
            updated_at: Utc::now(),
        };
        inner.statuses.insert(id, status.clone());
        Ok(status)
    }

    async fn account_id_by_uri(&self, uri: &str) -> AppResult<Option<AccountId>> {
        Ok(self
            .inner
            .lock()
            .await
            .accounts
            .iter()
            .find(|(_, a)| a.uri == uri)
            .map(|(id, _)| *id))
    }

    async fn filter_local_accounts(&self, ids: &[AccountId]) -> AppResult<Vec<AccountId>> {
        let inner = self.inner.lock().await;
        Ok(ids
            .iter()
            .copied()
            .filter(|id| inner.accounts.get(id).is_some_and(|a| a.local))
            .collect())
    }

    async fn create_reference(&self, status_id: StatusId, target_id: StatusId) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        let targets = inner.references.entry(status_id).or_default();
        if targets.contains(&target_id) {
            return Ok(false);
        }
        targets.push(target_id);
        Ok(true)
    }

    async fn list_reference_ids(&self, status_id: StatusId) -> AppResult<Vec<StatusId>> {
        Ok(self
            .inner
            .lock()
            .await
            .references
            .get(&status_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn local_follower_ids(&self, account_id: AccountId) -> AppResult<Vec<AccountId>> {
        let inner = self.inner.lock().await;
        let followers: BTreeSet<AccountId> = inner
            .follows
            .iter()
            .filter(|(_, target)| *target == account_id)
            .map(|(follower, _)| *follower)
            .filter(|id| inner.accounts.get(id).is_some_and(|a| a.local))
            .collect();
        Ok(followers.into_iter().collect())
    }

    async fn is_following(
        &self,
        account_id: AccountId,
        target_account_id: AccountId,
    ) -> AppResult<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .follows
            .contains(&(account_id, target_account_id)))
    }
}

#[async_trait]
impl EmojiReactionStore for MemoryStore {
    async fn status_ids_with_emojis(&self, emoji_ids: &[EmojiId]) -> AppResult<Vec<StatusId>> {
        let inner = self.inner.lock().await;
        let ids: BTreeSet<StatusId> = inner
            .reactions
            .iter()
            .filter(|r| r.custom_emoji_id.is_some_and(|id| emoji_ids.contains(&id)))
            .map(|r| r.status_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn emoji_reactions(&self, status_id: StatusId) -> AppResult<Vec<EmojiReaction>> {
        Ok(self
            .inner
            .lock()
            .await
            .reactions
            .iter()
            .filter(|r| r.status_id == status_id)
            .cloned()
            .collect())
    }

    async fn custom_emojis(&self, ids: &[EmojiId]) -> AppResult<Vec<CustomEmoji>> {
        let inner = self.inner.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.emojis.get(id).cloned())
            .collect())
    }

    async fn save_reaction_summaries(
        &self,
        status_id: StatusId,
        summaries: &[ReactionSummary],
    ) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.failing_summaries.contains(&status_id) {
            return Err(AppError::Database(format!(
                "write to status {status_id} failed"
            )));
        }
        if !inner.statuses.contains_key(&status_id) {
            return Ok(false);
        }
        inner.summaries.insert(status_id, summaries.to_vec());
        Ok(true)
    }
}
