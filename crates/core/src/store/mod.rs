//! Storage interfaces consumed by the pipeline.
//!
//! The content database is an external collaborator. [`DbStore`] maps these
//! traits onto the `fanout-db` repositories; [`crate::memory::MemoryStore`] keeps
//! everything in process.

mod db;

pub use db::DbStore;

use async_trait::async_trait;
use fanout_common::AppResult;

use crate::model::{
    AccountId, CustomEmoji, EmojiId, EmojiReaction, ReactionSummary, RemoteStatus, Status,
    StatusId,
};

/// Status, account and relationship lookups.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Fetch a status.
    ///
    /// Fails with [`fanout_common::AppError::StatusNotFound`] once the status is gone.
    async fn get_status(&self, id: StatusId) -> AppResult<Status>;

    /// Find a stored status by its URI or human-readable URL.
    async fn find_status_by_uri(&self, uri: &str) -> AppResult<Option<Status>>;

    /// Insert or refresh the local copy of a remote status, creating its
    /// author on first sight.
    async fn upsert_remote_status(&self, remote: &RemoteStatus) -> AppResult<Status>;

    /// Look up an account by actor URI.
    async fn account_id_by_uri(&self, uri: &str) -> AppResult<Option<AccountId>>;

    /// Keep only the IDs that belong to local accounts.
    async fn filter_local_accounts(&self, ids: &[AccountId]) -> AppResult<Vec<AccountId>>;

    /// Link `status_id` to `target_id`. Returns `false` when the link already existed.
    async fn create_reference(&self, status_id: StatusId, target_id: StatusId) -> AppResult<bool>;

    /// IDs of the statuses `status_id` currently links to.
    async fn list_reference_ids(&self, status_id: StatusId) -> AppResult<Vec<StatusId>>;

    /// Local accounts following `account_id`.
    async fn local_follower_ids(&self, account_id: AccountId) -> AppResult<Vec<AccountId>>;

    /// Whether `account_id` follows `target_account_id`.
    async fn is_following(
        &self,
        account_id: AccountId,
        target_account_id: AccountId,
    ) -> AppResult<bool>;
}

/// Emoji reaction reverse index and cache persistence.
#[async_trait]
pub trait EmojiReactionStore: Send + Sync {
    /// Distinct statuses carrying a reaction with any of the given emojis, ascending.
    async fn status_ids_with_emojis(&self, emoji_ids: &[EmojiId]) -> AppResult<Vec<StatusId>>;

    /// Every reaction on a status.
    async fn emoji_reactions(&self, status_id: StatusId) -> AppResult<Vec<EmojiReaction>>;

    /// Emoji definitions by ID. Unknown IDs are skipped.
    async fn custom_emojis(&self, ids: &[EmojiId]) -> AppResult<Vec<CustomEmoji>>;

    /// Replace the cached reaction summaries of a status.
    ///
    /// Returns `false` when the status no longer exists.
    async fn save_reaction_summaries(
        &self,
        status_id: StatusId,
        summaries: &[ReactionSummary],
    ) -> AppResult<bool>;
}
